// アクティブスキャンでスマートメーターを探す
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::hex;
use crate::skstack::arg;

const SCAN_KEY_ADDR: &str = "Addr:";
const SCAN_KEY_PANID: &str = "Pan ID:";
const SCAN_KEY_CHANNEL: &str = "Channel:";

/// SKSCAN 2 FFFFFFFF 6 の引数
pub fn scan_args() -> Vec<String> {
    vec![
        arg::mode(2),            // アクティブスキャン(IE あり)
        arg::num32(0xffff_ffff), // 全チャンネル
        arg::nibble(6),          // スキャン時間
    ]
}

/// アクティブスキャン結果
///
/// EPANDESCに続く行("  Channel:21"など)を集める。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub mac: String,
    pub pan_id: String,
    pub channel: String,
}

impl ScanResult {
    pub fn clear(&mut self) {
        self.mac.clear();
        self.pan_id.clear();
        self.channel.clear();
    }

    /// 空白で始まるスキャン結果の1行を取り込む
    ///
    /// 取り込んだらtrue
    pub fn accept_line(&mut self, line: &str) -> bool {
        if !line.starts_with(' ') {
            return false;
        }
        let line = hex::trim(line);
        if let Some(v) = line.strip_prefix(SCAN_KEY_ADDR) {
            self.mac = v.to_owned();
        } else if let Some(v) = line.strip_prefix(SCAN_KEY_PANID) {
            self.pan_id = v.to_owned();
        } else if let Some(v) = line.strip_prefix(SCAN_KEY_CHANNEL) {
            self.channel = v.to_owned();
        } else {
            return false;
        }
        true
    }

    /// 接続に必要な情報が揃っているか
    pub fn is_complete(&self) -> bool {
        tracing::debug!(
            "scan data: mac={}, panid={}, channel={}",
            self.mac,
            self.pan_id,
            self.channel
        );
        if self.mac.is_empty() && self.pan_id.is_empty() && self.channel.is_empty() {
            return false;
        }
        if self.mac.len() != 16 || self.pan_id.len() != 4 || self.channel.len() != 2 {
            tracing::error!(
                "Unexpected scan data: mac={}, panid={}, channel={}",
                self.mac,
                self.pan_id,
                self.channel
            );
            return false;
        }
        true
    }
}

#[test]
fn test1() {
    assert_eq!(scan_args(), vec!["2", "FFFFFFFF", "6"]);

    let mut found = ScanResult::default();
    assert!(!found.is_complete());

    assert!(found.accept_line("  Channel:21"));
    assert!(found.accept_line("  Channel Page:09") == false);
    assert!(found.accept_line("  Pan ID:8888"));
    assert!(found.accept_line("  Addr:0011223344556677"));
    assert!(found.accept_line("  LQI:E1") == false);
    assert!(!found.accept_line("Addr:FFFFFFFFFFFFFFFF"));
    assert!(found.is_complete());
    assert_eq!(
        found,
        ScanResult {
            mac: "0011223344556677".to_owned(),
            pan_id: "8888".to_owned(),
            channel: "21".to_owned(),
        }
    );

    found.clear();
    assert_eq!(found, ScanResult::default());
}

#[test]
fn test2() {
    // どれかが欠けている、または長さが違う
    let found = ScanResult {
        mac: "0011223344556677".to_owned(),
        pan_id: "8888".to_owned(),
        channel: "".to_owned(),
    };
    assert!(!found.is_complete());
    let found = ScanResult {
        channel: "021".to_owned(),
        ..found
    };
    assert!(!found.is_complete());
    let found = ScanResult {
        channel: "21".to_owned(),
        mac: "00112233".to_owned(),
        ..found
    };
    assert!(!found.is_complete());
}
