// 設定ファイル
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::broute::BRouteConfig;
use crate::skstack::authn;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::{fs, io};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(r#"i/o "{0}""#)]
    Io(#[from] io::Error),

    #[error(r#"toml "{0}""#)]
    Toml(#[from] toml::de::Error),

    #[error(r#"route B "{0}""#)]
    Credentials(#[from] authn::Error),

    #[error("Route B ID and password must be set together")]
    IncompleteCredentials,

    #[error(r#""{0}" is too long"#)]
    OutOfRange(&'static str),
}

/// 計測間隔
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SensorSettings {
    /// 秒(省略時は既定値)
    pub update_interval: Option<u32>,
}

/// 無受信監視
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct WatchdogSettings {
    /// 秒(0は無効)
    pub rejoin_timeout: u32,
    pub rescan_timeout: u32,
    pub restart_timeout: u32,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            rejoin_timeout: 120,
            rescan_timeout: 240,
            restart_timeout: 360,
        }
    }
}

/// 設定ファイルの内容
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub device: Option<String>,
    pub baud_rate: u32,
    pub rbid: Option<String>,
    pub password: Option<String>,
    pub tick_interval_ms: u64,
    pub power: Option<SensorSettings>,
    pub energy: Option<SensorSettings>,
    pub watchdog: WatchdogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device: None,
            baud_rate: 115200,
            rbid: None,
            password: None,
            tick_interval_ms: 20,
            power: None,
            energy: None,
            watchdog: WatchdogSettings::default(),
        }
    }
}

impl FromStr for Settings {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str::<Settings>(s)?)
    }
}

fn millis(name: &'static str, seconds: u32) -> Result<u32, Error> {
    seconds.checked_mul(1000).ok_or(Error::OutOfRange(name))
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    /// ルートB認証情報(両方なければNone)
    pub fn credentials(&self) -> Result<Option<authn::Credentials>, Error> {
        match (&self.rbid, &self.password) {
            (Some(id), Some(password)) => Ok(Some(authn::Credentials {
                id: authn::Id::from_str(id)?,
                password: authn::Password::from_str(password)?,
            })),
            (None, None) => Ok(None),
            _ => Err(Error::IncompleteCredentials),
        }
    }

    pub fn broute_config(&self) -> Result<BRouteConfig, Error> {
        let defaults = BRouteConfig::default();
        let interval = |name, sensor: &Option<SensorSettings>, default_ms| {
            match sensor.as_ref().and_then(|a| a.update_interval) {
                Some(seconds) => millis(name, seconds),
                None => Ok(default_ms),
            }
        };
        Ok(BRouteConfig {
            credentials: self.credentials()?,
            power_interval_ms: interval("power.update_interval", &self.power, defaults.power_interval_ms)?,
            energy_interval_ms: interval(
                "energy.update_interval",
                &self.energy,
                defaults.energy_interval_ms,
            )?,
            rejoin_timeout_ms: millis("watchdog.rejoin_timeout", self.watchdog.rejoin_timeout)?,
            rescan_timeout_ms: millis("watchdog.rescan_timeout", self.watchdog.rescan_timeout)?,
            restart_timeout_ms: millis("watchdog.restart_timeout", self.watchdog.restart_timeout)?,
        })
    }
}

#[test]
fn test1() {
    let settings = Settings::from_str(
        r#"
device = "/dev/ttyUSB0"
rbid = "00112233445566778899AABBCCDDEEFF"
password = "0123456789AB"

[power]
update_interval = 10

[watchdog]
rejoin_timeout = 0
"#,
    )
    .unwrap();
    assert_eq!(settings.device.as_deref(), Some("/dev/ttyUSB0"));
    assert_eq!(settings.baud_rate, 115200);
    assert_eq!(settings.tick_interval_ms, 20);
    assert_eq!(settings.energy, None);
    assert_eq!(
        settings.power,
        Some(SensorSettings {
            update_interval: Some(10)
        })
    );

    let config = settings.broute_config().unwrap();
    assert_eq!(config.power_interval_ms, 10_000);
    assert_eq!(config.energy_interval_ms, 60_000);
    assert_eq!(config.rejoin_timeout_ms, 0);
    assert_eq!(config.rescan_timeout_ms, 240_000);
    assert_eq!(config.restart_timeout_ms, 360_000);
    let credentials = config.credentials.unwrap();
    assert_eq!(credentials.id.to_string(), "00112233445566778899AABBCCDDEEFF");
    assert_eq!(credentials.password.to_string(), "0123456789AB");
}

#[test]
fn test2() {
    // 認証情報なし
    let config = Settings::from_str("").unwrap().broute_config().unwrap();
    assert_eq!(config, BRouteConfig::default());

    // 片方だけ
    let settings = Settings::from_str(r#"rbid = "00112233445566778899AABBCCDDEEFF""#).unwrap();
    assert!(matches!(
        settings.broute_config(),
        Err(Error::IncompleteCredentials)
    ));

    // IDが短い
    let settings = Settings::from_str(
        r#"
rbid = "0011"
password = "0123456789AB"
"#,
    )
    .unwrap();
    assert!(matches!(
        settings.broute_config(),
        Err(Error::Credentials(authn::Error::InvalidId))
    ));

    // 知らないキー
    assert!(matches!(
        Settings::from_str("pasword = \"x\""),
        Err(Error::Toml(_))
    ));

    // 間隔の省略
    let settings = Settings::from_str("[energy]").unwrap();
    assert!(settings.energy.is_some());
    assert_eq!(settings.broute_config().unwrap().energy_interval_ms, 60_000);

    // ミリ秒にするとあふれる
    let settings = Settings::from_str("[energy]\nupdate_interval = 4294968").unwrap();
    assert!(matches!(
        settings.broute_config(),
        Err(Error::OutOfRange("energy.update_interval"))
    ));
}
