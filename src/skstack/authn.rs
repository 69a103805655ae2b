// スマートメータールートB認証情報
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::skstack::arg;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("IDは32文字固定長です")]
    InvalidId,
    #[error("PASSWORDは1～32文字です")]
    InvalidPassword,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// 認証情報
pub struct Credentials {
    pub id: Id,
    pub password: Password,
}

impl Credentials {
    /// SKSETRBID の引数
    pub fn rbid_args(&self) -> Vec<String> {
        vec![arg::str(&self.id.to_string())]
    }

    /// SKSETPWD の引数(パスワード長, パスワード)
    pub fn password_args(&self) -> Vec<String> {
        let password = self.password.to_string();
        vec![arg::num8(password.len() as u8), password]
    }
}

#[derive(Clone, PartialEq, Eq)]
/// ID
pub struct Id([char; 32]);
impl std::str::FromStr for Id {
    type Err = Error;
    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_ascii() {
            return Err(Error::InvalidId);
        }
        s.chars()
            .collect::<Vec<char>>()
            .try_into()
            .map(Self)
            .map_err(|_| Error::InvalidId)
    }
}
impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0.iter().collect::<String>())
    }
}
impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Id({})", self)
    }
}

#[derive(Clone, PartialEq, Eq)]
/// パスワード
pub struct Password(String);
impl std::str::FromStr for Password {
    type Err = Error;
    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_ascii() && (1..=32).contains(&s.len()) && !s.contains(' ') {
            Ok(Self(s.to_owned()))
        } else {
            Err(Error::InvalidPassword)
        }
    }
}
impl std::fmt::Display for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::fmt::Debug for Password {
    // ログに出さない
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Password(########)")
    }
}

#[test]
fn test1() {
    use std::str::FromStr;

    let id = Id::from_str("00112233445566778899AABBCCDDEEFF").unwrap();
    assert_eq!(id.to_string(), "00112233445566778899AABBCCDDEEFF");
    assert_eq!(Id::from_str("0011"), Err(Error::InvalidId));
    assert_eq!(
        Id::from_str("00112233445566778899AABBCCDDEEFF0"),
        Err(Error::InvalidId)
    );

    let password = Password::from_str("0123456789AB").unwrap();
    assert_eq!(password.to_string(), "0123456789AB");
    assert_eq!(format!("{:?}", password), "Password(########)");
    assert_eq!(Password::from_str(""), Err(Error::InvalidPassword));
    assert_eq!(
        Password::from_str(&"X".repeat(33)),
        Err(Error::InvalidPassword)
    );

    let credentials = Credentials { id, password };
    assert_eq!(
        credentials.rbid_args(),
        vec!["00112233445566778899AABBCCDDEEFF"]
    );
    assert_eq!(credentials.password_args(), vec!["0C", "0123456789AB"]);
}
