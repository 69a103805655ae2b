// 16進数文字列と値の相互変換
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//

/// 16進数1文字を値にする
pub fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

/// 4ビット値を16進数1文字(大文字)にする
pub fn hexchar(n: u8) -> char {
    match n & 0x0f {
        n @ 0..=9 => (b'0' + n) as char,
        n => (b'A' + n - 10) as char,
    }
}

/// 16進数2文字を1バイトにする
pub fn byte_from_pair(hi: Option<&u8>, lo: Option<&u8>) -> Option<u8> {
    let hi = nibble(*hi?)?;
    let lo = nibble(*lo?)?;
    Some((hi << 4) | lo)
}

/// 16進数文字列をバイト列にする
///
/// 奇数長、出力先に入りきらない長さ、16進数以外の文字はいずれも失敗。
/// 成功した場合は書き込んだバイト数を返す。
pub fn hex2bin(s: &str, out: &mut [u8]) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.len() % 2 == 1 || bytes.len() > out.len() * 2 {
        return None;
    }
    for (dst, pair) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        *dst = byte_from_pair(pair.first(), pair.get(1))?;
    }
    Some(bytes.len() / 2)
}

/// バイト列を16進数文字列(大文字)にする
pub fn bin2hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .flat_map(|b| [hexchar(b >> 4), hexchar(*b)])
        .collect::<String>()
}

/// 前後の空白文字を取り除く
pub fn trim(s: &str) -> &str {
    s.trim_matches(|c| matches!(c, ' ' | '\t' | '\r' | '\n'))
}

#[test]
fn test1() {
    assert_eq!(nibble(b'0'), Some(0));
    assert_eq!(nibble(b'9'), Some(9));
    assert_eq!(nibble(b'a'), Some(10));
    assert_eq!(nibble(b'F'), Some(15));
    assert_eq!(nibble(b'g'), None);
    assert_eq!(nibble(b' '), None);

    assert_eq!(hexchar(0), '0');
    assert_eq!(hexchar(0x0a), 'A');
    assert_eq!(hexchar(0xff), 'F');
}

#[test]
fn test2() {
    assert_eq!(byte_from_pair(Some(&b'1'), Some(&b'0')), Some(0x10));
    assert_eq!(byte_from_pair(Some(&b'e'), Some(&b'7')), Some(0xe7));
    assert_eq!(byte_from_pair(Some(&b'1'), None), None);
    assert_eq!(byte_from_pair(Some(&b'X'), Some(&b'0')), None);

    let mut buf = [0u8; 4];
    assert_eq!(hex2bin("1081", &mut buf), Some(2));
    assert_eq!(&buf[..2], &[0x10, 0x81]);
    assert_eq!(hex2bin("", &mut buf), Some(0));
    // 奇数長
    assert_eq!(hex2bin("108", &mut buf), None);
    // 入りきらない
    assert_eq!(hex2bin("0011223344", &mut buf), None);
    // 16進数以外
    assert_eq!(hex2bin("10ZZ", &mut buf), None);
}

#[test]
fn test3() {
    assert_eq!(bin2hex(&[0x10, 0x81, 0x00, 0xab]), "108100AB");
    assert_eq!(bin2hex(&[]), "");
    assert_eq!(trim("  Addr:0011223344556677\r"), "Addr:0011223344556677");
    assert_eq!(trim(" \t"), "");
}
