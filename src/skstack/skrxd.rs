// SKSTACK/IPの応答
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::hex;
use std::fmt;
use std::net::Ipv6Addr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub code: u8,
    pub sender: Option<Ipv6Addr>,
    pub param: Option<u8>,
}

impl Event {
    pub const RECEIVED_NS: u8 = 0x01;
    pub const RECEIVED_NA: u8 = 0x02;
    pub const RECEIVED_ECHO: u8 = 0x05;
    pub const DONE_ED_SCAN: u8 = 0x1f;
    pub const RECEIVED_BEACON: u8 = 0x20;
    pub const SENT_UDP: u8 = 0x21;
    pub const DONE_ACTIVE_SCAN: u8 = 0x22;
    pub const FAILED_PANA_CONNECTION: u8 = 0x24;
    pub const DONE_PANA_CONNECTION: u8 = 0x25;
    pub const RECEIVED_DISCONNECT: u8 = 0x26;
    pub const DONE_PANA_DISCONNECT: u8 = 0x27;
    pub const TIMEOUT_PANA_DISCONNECT: u8 = 0x28;
    pub const EXPIRED_SESSION: u8 = 0x29;
    pub const LIMIT_RATE: u8 = 0x32;
    pub const CANCELED_LIMIT: u8 = 0x33;

    /// イベント番号の名前
    pub fn name(&self) -> &'static str {
        match self.code {
            Self::RECEIVED_NS => "rcvNS",
            Self::RECEIVED_NA => "rcvNA",
            Self::RECEIVED_ECHO => "recvECHO",
            Self::DONE_ED_SCAN => "doneEDscan",
            Self::RECEIVED_BEACON => "recvBCN",
            Self::SENT_UDP => "sentUDP",
            Self::DONE_ACTIVE_SCAN => "doneAScan",
            Self::FAILED_PANA_CONNECTION => "failedPANAconn",
            Self::DONE_PANA_CONNECTION => "donePANAconn",
            Self::RECEIVED_DISCONNECT => "recvDISC",
            Self::DONE_PANA_DISCONNECT => "donePANAdisc",
            Self::TIMEOUT_PANA_DISCONNECT => "timeoutPANAdisc",
            Self::EXPIRED_SESSION => "expiredSession",
            Self::LIMIT_RATE => "limitRate",
            Self::CANCELED_LIMIT => "canceledLimit",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "EVENT {:02X}({})", self.code, self.name())
    }
}

/// ERXUDPのヘッダ部
///
/// 受信データそのものは持たない。
/// 受信行の`data_pos`以降に16進数テキストで残っている。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Erxudp {
    pub sender: Ipv6Addr,      // 送信元IPv6アドレス
    pub destination: Ipv6Addr, // 送信先IPv6アドレス
    pub sender_port: u16,      // 送信元UDPポート番号
    pub destination_port: u16, // 送信先UDPポート番号
    pub senderlla: [u8; 8],    // 送信元のMAC層アドレス
    pub secured: bool,         // 暗号化あり/なし
    pub datalen: u16,          // 受信データ長
    pub data_pos: usize,       // 受信データ(テキスト)の開始位置
}

impl Erxudp {
    /// 受信データをバイナリにする
    ///
    /// データ長がヘッダの値と一致しなければ失敗。
    pub fn payload(&self, remain: &str, out: &mut [u8]) -> Option<usize> {
        let text = remain.get(self.data_pos..)?;
        match hex::hex2bin(text, out) {
            Some(len) if len == self.datalen as usize => Some(len),
            _ => None,
        }
    }
}

/// 受信した1行を分類したもの
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkRxD {
    Void,                // 受信なし
    Fail(Option<u8>),    // FAIL ERxx
    Ever(String),        // EVER
    Erxudp(String),      // ERXUDP受信(ERXUDP以降のテキスト)
    Epandesc(String),    // EPANDESC受信
    Event(Event),        // イベント受信
    Ok(Option<String>),  // 成功
    Unknown(String),     // それ以外の行
}

impl SkRxD {
    pub fn kind(&self) -> &'static str {
        match self {
            SkRxD::Void => "none",
            SkRxD::Fail(_) => "error",
            SkRxD::Ever(_) => "ver",
            SkRxD::Erxudp(_) => "rxudp",
            SkRxD::Epandesc(_) => "pandesc",
            SkRxD::Event(_) => "event",
            SkRxD::Ok(_) => "ok",
            SkRxD::Unknown(_) => "unknown",
        }
    }
}

#[test]
fn test1() {
    let event = Event {
        code: 0x25,
        sender: None,
        param: None,
    };
    assert_eq!(event.name(), "donePANAconn");
    assert_eq!(event.to_string(), "EVENT 25(donePANAconn)");
    let event = Event { code: 0x99, ..event };
    assert_eq!(event.name(), "UNKNOWN");
}

#[test]
fn test2() {
    let remain = "0102";
    let erxudp = Erxudp {
        sender: Ipv6Addr::UNSPECIFIED,
        destination: Ipv6Addr::UNSPECIFIED,
        sender_port: 0x0e1a,
        destination_port: 0x0e1a,
        senderlla: [0; 8],
        secured: true,
        datalen: 2,
        data_pos: 0,
    };
    let mut buf = [0u8; 8];
    assert_eq!(erxudp.payload(remain, &mut buf), Some(2));
    assert_eq!(&buf[..2], &[1, 2]);

    // データ長不一致
    let short = Erxudp { datalen: 3, ..erxudp.clone() };
    assert_eq!(short.payload(remain, &mut buf), None);

    // 開始位置が範囲外
    let outside = Erxudp { data_pos: 10, ..erxudp };
    assert_eq!(outside.payload(remain, &mut buf), None);
}
