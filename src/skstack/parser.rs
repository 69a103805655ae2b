// SKSTACK/IPの応答パーサー
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::skstack::{Erxudp, Event, SkRxD};
use nom::Parser;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while_m_n};
use nom::character::complete::{char, one_of};
use nom::combinator::{eof, map, map_res, opt, rest};
use nom::multi::count;
use nom::sequence::preceded;
use std::net::Ipv6Addr;

// 8ビット16進数(2桁固定)
fn u8_hex_digit2(input: &str) -> nom::IResult<&str, u8> {
    map_res(take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()), |s| {
        u8::from_str_radix(s, 16)
    })
    .parse(input)
}

// 16ビット16進数(4桁固定)
fn u16_hex_digit4(input: &str) -> nom::IResult<&str, u16> {
    map_res(take_while_m_n(4, 4, |c: char| c.is_ascii_hexdigit()), |s| {
        u16::from_str_radix(s, 16)
    })
    .parse(input)
}

// 区切り(空白1文字)
fn sep(input: &str) -> nom::IResult<&str, char> {
    char(' ').parse(input)
}

// Ipv6アドレス(FE80:0000:0000:0000:0000:0000:0000:0000)
fn ipv6addr(input: &str) -> nom::IResult<&str, Ipv6Addr> {
    let (s, head) = u16_hex_digit4(input)?;
    let (s, tail) = count(preceded(char(':'), u16_hex_digit4), 7).parse(s)?;
    let mut segments = [0u16; 8];
    segments[0] = head;
    segments[1..].copy_from_slice(&tail);
    Ok((s, Ipv6Addr::from(segments)))
}

// MACアドレス(16進数16桁)
fn mac_address(input: &str) -> nom::IResult<&str, [u8; 8]> {
    map_res(count(u8_hex_digit2, 8), <[u8; 8]>::try_from).parse(input)
}

// 暗号化フラグ(0 or 1)
fn secured_flag(input: &str) -> nom::IResult<&str, bool> {
    map(one_of("01"), |c| c == '1').parse(input)
}

/// ERXUDP以降のヘッダ部を解析する
///
/// <SENDER> <DEST> <RPORT> <LPORT> <SENDERLLA> <SECURED> <DATALEN> <DATA>
pub fn rx_erxudp(remain: &str) -> nom::IResult<&str, Erxudp> {
    // 送信元アドレス
    let (s, sender) = ipv6addr(remain)?;
    let (s, _) = sep(s)?;
    // 送信先アドレス
    let (s, destination) = ipv6addr(s)?;
    let (s, _) = sep(s)?;
    // 送信元ポート番号
    let (s, sender_port) = u16_hex_digit4(s)?;
    let (s, _) = sep(s)?;
    // 送信先ポート番号
    let (s, destination_port) = u16_hex_digit4(s)?;
    let (s, _) = sep(s)?;
    // 送信元のMAC層アドレス
    let (s, senderlla) = mac_address(s)?;
    let (s, _) = sep(s)?;
    // 暗号化あり/なし
    let (s, secured) = secured_flag(s)?;
    let (s, _) = sep(s)?;
    // 受信したデータの長さ
    let (s, datalen) = u16_hex_digit4(s)?;
    let (s, _) = sep(s)?;
    // 受信データ(テキスト)はここから
    let data_pos = remain.len() - s.len();

    let erxudp = Erxudp {
        sender,
        destination,
        sender_port,
        destination_port,
        senderlla,
        secured,
        datalen,
        data_pos,
    };

    Ok((s, erxudp))
}

// EVENT以降
// 先頭2桁がイベント番号。番号が読めなければ0にする。
fn rx_event(s: &str) -> Event {
    match u8_hex_digit2(s) {
        Ok((s, code)) => {
            let (s, sender) = opt(preceded(sep, ipv6addr))
                .parse(s)
                .unwrap_or((s, None));
            let param = opt(preceded(sep, u8_hex_digit2))
                .parse(s)
                .map_or(None, |(_, param)| param);
            Event {
                code,
                sender,
                param,
            }
        }
        Err(_) => Event {
            code: 0,
            sender: None,
            param: None,
        },
    }
}

// FAIL以降(ERxx)
fn rx_fail(s: &str) -> Option<u8> {
    preceded(tag("ER"), u8_hex_digit2)
        .parse(s)
        .ok()
        .map(|(_, code)| code)
}

/// 1行を分類する
pub fn parse_rxd(line: &str) -> SkRxD {
    let parsed: nom::IResult<&str, SkRxD> = alt((
        map((tag("OK"), eof), |_| SkRxD::Ok(None)),
        map(preceded(tag("OK "), rest), |s: &str| {
            SkRxD::Ok(Some(s.to_owned()))
        }),
        map(preceded(tag("EVER "), rest), |s: &str| {
            SkRxD::Ever(s.to_owned())
        }),
        map(preceded(tag("EVENT "), rest), |s: &str| {
            SkRxD::Event(rx_event(s))
        }),
        map(preceded(tag("ERXUDP "), rest), |s: &str| {
            SkRxD::Erxudp(s.to_owned())
        }),
        map(preceded(tag("EPANDESC "), rest), |s: &str| {
            SkRxD::Epandesc(s.to_owned())
        }),
        map(preceded(tag("FAIL "), rest), |s: &str| SkRxD::Fail(rx_fail(s))),
    ))
    .parse(line);

    match parsed {
        Ok((_, rxd)) => rxd,
        Err(_) => SkRxD::Unknown(line.to_owned()),
    }
}

#[test]
fn test1() {
    assert_eq!(parse_rxd("OK"), SkRxD::Ok(None));
    assert_eq!(parse_rxd("OK 01"), SkRxD::Ok(Some("01".to_owned())));
    assert_eq!(parse_rxd("EVER 1.2.10"), SkRxD::Ever("1.2.10".to_owned()));
    assert_eq!(parse_rxd("FAIL ER10"), SkRxD::Fail(Some(16)));
    assert_eq!(parse_rxd("FAIL"), SkRxD::Unknown("FAIL".to_owned()));
    assert_eq!(parse_rxd("FAIL what"), SkRxD::Fail(None));
    assert_eq!(parse_rxd("OKAY"), SkRxD::Unknown("OKAY".to_owned()));
    assert_eq!(
        parse_rxd("  Channel:21"),
        SkRxD::Unknown("  Channel:21".to_owned())
    );
    assert_eq!(
        parse_rxd("EPANDESC "),
        SkRxD::Epandesc("".to_owned())
    );
}

#[test]
fn test2() {
    let sender = "FE80:0000:0000:0000:0000:0000:0000:0001";

    assert_eq!(
        parse_rxd(&format!("EVENT 22 {}", sender)),
        SkRxD::Event(Event {
            code: 0x22,
            sender: sender.parse().ok(),
            param: None,
        })
    );

    assert_eq!(
        parse_rxd(&format!("EVENT 21 {} 02", sender)),
        SkRxD::Event(Event {
            code: 0x21,
            sender: sender.parse().ok(),
            param: Some(2),
        })
    );

    // 番号が壊れていてもイベントとして扱う
    assert_eq!(
        parse_rxd("EVENT ZZ"),
        SkRxD::Event(Event {
            code: 0,
            sender: None,
            param: None,
        })
    );

    // 番号だけ
    assert_eq!(
        parse_rxd("EVENT 29"),
        SkRxD::Event(Event {
            code: 0x29,
            sender: None,
            param: None,
        })
    );
}

#[test]
fn test3() {
    let remain = concat!(
        "FE80:0001:0002:0003:0004:0005:0006:0007 ",
        "FE80:0008:0009:000A:000B:000C:000D:000E ",
        "0E1A 0E1A 123456789ABC0000 1 0010 ",
        "000102030405060708090A0B0C0D0E0F"
    );
    let (rest, erxudp) = rx_erxudp(remain).unwrap();

    assert_eq!(
        erxudp,
        Erxudp {
            sender: "FE80:1:2:3:4:5:6:7".parse().unwrap(),
            destination: "FE80:8:9:a:b:c:d:e".parse().unwrap(),
            sender_port: 0x0e1a,
            destination_port: 0x0e1a,
            senderlla: [0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0x00, 0x00],
            secured: true,
            datalen: 16,
            data_pos: remain.len() - 32,
        }
    );
    assert_eq!(rest, "000102030405060708090A0B0C0D0E0F");
    assert_eq!(&remain[erxudp.data_pos..], rest);
}

#[test]
fn test4() {
    let good = concat!(
        "FE80:0001:0002:0003:0004:0005:0006:0007 ",
        "FE80:0008:0009:000A:000B:000C:000D:000E ",
        "0E1A 0E1A 123456789ABC0000 1 0002 0102"
    );
    assert!(rx_erxudp(good).is_ok());

    // 区切りが2個
    let bad = good.replacen(' ', "  ", 1);
    assert!(rx_erxudp(&bad).is_err());
    // 短縮表記のIPv6アドレスは受け付けない
    assert!(rx_erxudp(&good.replacen("FE80:0001", "FE80:1", 1)).is_err());
    // 暗号化フラグは0か1
    assert!(rx_erxudp(&good.replacen(" 1 0002", " 2 0002", 1)).is_err());
    // MACアドレスが短い
    assert!(rx_erxudp(&good.replacen("123456789ABC0000", "123456789ABC", 1)).is_err());
    // データ長の後の区切りがない
    assert!(rx_erxudp(&good.replacen(" 0002 0102", " 0002", 1)).is_err());
    // 空
    assert!(rx_erxudp("").is_err());
}
