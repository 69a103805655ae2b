// SKSTACKコマンドの引数
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::hex::hexchar;
use std::net::Ipv6Addr;

/// 16進数1桁
pub fn nibble(n: u8) -> String {
    hexchar(n).to_string()
}

/// 0 / 1
pub fn flag(b: bool) -> String {
    if b { "1" } else { "0" }.to_owned()
}

/// 動作モード(16進数1桁)
pub fn mode(m: u8) -> String {
    nibble(m & 0x0f)
}

/// 16進数2桁
pub fn num8(n: u8) -> String {
    format!("{:02X}", n)
}

/// 16進数4桁
pub fn num16(n: u16) -> String {
    format!("{:04X}", n)
}

/// 16進数8桁
pub fn num32(n: u32) -> String {
    format!("{:08X}", n)
}

/// 仮想レジスタ番号(SFE, S02 ...)
pub fn reg(n: u8) -> String {
    format!("S{}", num8(n))
}

/// IPv6アドレス(FE80:0000:0000:0000:0000:0000:0000:0000)
pub fn ipv6(addr: &Ipv6Addr) -> String {
    addr.segments().map(num16).join(":")
}

/// MACアドレス(16進数16桁)
pub fn mac(addr: &[u8; 8]) -> String {
    addr.iter().map(|b| num8(*b)).collect::<String>()
}

/// 文字列そのまま
pub fn str(s: &str) -> String {
    s.to_owned()
}

#[test]
fn test1() {
    assert_eq!(nibble(6), "6");
    assert_eq!(nibble(0x1b), "B");
    assert_eq!(flag(true), "1");
    assert_eq!(flag(false), "0");
    assert_eq!(mode(0x12), "2");
    assert_eq!(num8(0x0c), "0C");
    assert_eq!(num16(0x0e1a), "0E1A");
    assert_eq!(num32(0xffff_ffff), "FFFFFFFF");
    assert_eq!(reg(0xfe), "SFE");
    assert_eq!(reg(0x02), "S02");
}

#[test]
fn test2() {
    let addr: Ipv6Addr = "FE80::1034:5678:ABCD:EF01".parse().unwrap();
    assert_eq!(ipv6(&addr), "FE80:0000:0000:0000:1034:5678:ABCD:EF01");
    assert_eq!(
        mac(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]),
        "0011223344556677"
    );
    assert_eq!(str("SKVER"), "SKVER");
}
