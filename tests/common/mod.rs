// 結合テスト用の通信路、時計、センサー
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use wisun_broute::broute::{Setting, State};
use wisun_broute::hex;
use wisun_broute::scheduler::TimerTable;
use wisun_broute::sensor::SensorSink;
use wisun_broute::skstack::{Clock, Transport, authn};
use wisun_broute::{BRoute, BRouteConfig};

/// スマートメーターのリンクローカルアドレス
pub const METER_ADDR: &str = "FE80:0000:0000:0000:0211:2233:4455:6677";
/// Wi-SUNモジュール自身のアドレス
pub const SELF_ADDR: &str = "FE80:0000:0000:0000:021D:1290:1234:5678";

pub type TestBRoute = BRoute<ScriptedTransport, SharedClock, TimerTable>;

/// 受信する行を積んでおき、送信したバイト列を記録する通信路
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

impl ScriptedTransport {
    /// CRLF終端で1行積む
    pub fn push_line(&mut self, line: &str) {
        self.rx.extend(line.bytes());
        self.rx.extend(b"\r\n");
    }

    pub fn is_idle(&self) -> bool {
        self.rx.is_empty()
    }

    /// 送信したバイト列を取り出す
    pub fn take_tx(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tx)
    }
}

impl Transport for ScriptedTransport {
    fn read(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.tx.extend_from_slice(data);
        Ok(())
    }
}

/// テストから進められる時計
#[derive(Debug, Clone, Default)]
pub struct SharedClock(Rc<Cell<u32>>);

impl SharedClock {
    pub fn set(&self, ms: u32) {
        self.0.set(ms);
    }

    pub fn advance(&self, ms: u32) {
        self.0.set(self.0.get().wrapping_add(ms));
    }
}

impl Clock for SharedClock {
    fn now_ms(&self) -> u32 {
        self.0.get()
    }

    fn delay_ms(&self, ms: u32) {
        self.advance(ms);
    }
}

#[derive(Debug, Default)]
pub struct Recorded {
    pub values: Vec<f64>,
    pub accuracy_decimals: Option<u8>,
}

/// 出力した計測値を記録するセンサー
#[derive(Debug, Clone, Default)]
pub struct RecordingSink(Rc<RefCell<Recorded>>);

impl RecordingSink {
    pub fn values(&self) -> Vec<f64> {
        self.0.borrow().values.clone()
    }

    pub fn accuracy_decimals(&self) -> Option<u8> {
        self.0.borrow().accuracy_decimals
    }
}

impl SensorSink for RecordingSink {
    fn publish_state(&mut self, value: f64) {
        self.0.borrow_mut().values.push(value);
    }

    fn set_accuracy_decimals(&mut self, decimals: u8) {
        self.0.borrow_mut().accuracy_decimals = Some(decimals);
    }
}

pub fn credentials() -> authn::Credentials {
    authn::Credentials {
        id: "00112233445566778899AABBCCDDEEFF".parse().unwrap(),
        password: "0123456789AB".parse().unwrap(),
    }
}

pub fn config() -> BRouteConfig {
    BRouteConfig {
        credentials: Some(credentials()),
        ..Default::default()
    }
}

/// 瞬時電力と積算電力量の両方を計測する
pub struct Fixture {
    pub broute: TestBRoute,
    pub clock: SharedClock,
    pub power: RecordingSink,
    pub energy: RecordingSink,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: BRouteConfig) -> Self {
        let clock = SharedClock::default();
        let power = RecordingSink::default();
        let energy = RecordingSink::default();
        let mut broute = BRoute::new(
            ScriptedTransport::default(),
            clock.clone(),
            TimerTable::new(),
            config,
        )
        .with_power_sensor(Box::new(power.clone()))
        .with_energy_sensor(Box::new(energy.clone()));
        broute.setup().unwrap();
        Self {
            broute,
            clock,
            power,
            energy,
        }
    }

    /// 行を積む
    pub fn push(&mut self, lines: &[&str]) {
        for line in lines {
            self.broute.transport_mut().push_line(line);
        }
    }

    /// 積んだ行がなくなるまでtickする
    pub fn drain(&mut self) {
        while !self.broute.transport().is_idle() {
            self.broute.tick();
        }
    }

    /// 送信したバイト列
    pub fn take_tx_bytes(&mut self) -> Vec<u8> {
        self.broute.transport_mut().take_tx()
    }

    /// 送信した内容(文字列)
    pub fn take_tx(&mut self) -> String {
        String::from_utf8_lossy(&self.take_tx_bytes()).into_owned()
    }

    /// 初期化からスキャンを始めるまで
    pub fn run_until_scanning(&mut self) {
        self.broute.tick();
        self.push(&["EVER 1.5.2", "OK"]);
        self.drain();
        assert_eq!(self.broute.state(), State::ApplyingSettings(Setting::Echo));
        self.push(&["OK", "OK 01", "OK", "OK"]);
        self.drain();
        assert_eq!(self.broute.state(), State::Scanning);
    }

    /// スキャン結果を受け取る
    pub fn push_scan_result(&mut self) {
        let beacon = format!("EVENT 20 {METER_ADDR}");
        let done = format!("EVENT 22 {SELF_ADDR}");
        self.push(&[
            "OK",
            &beacon,
            "EPANDESC",
            "  Channel:21",
            "  Channel Page:09",
            "  Pan ID:8888",
            "  Addr:0011223344556677",
            "  LQI:E1",
            "  PairID:00AABBCC",
            &done,
        ]);
        self.drain();
    }

    /// スキャン済みの状態から接続完了まで
    pub fn run_until_joined(&mut self) {
        self.push(&["SKLL64 0011223344556677", METER_ADDR]);
        self.drain();
        self.push(&["OK", "OK"]);
        self.drain();
        assert_eq!(self.broute.state(), State::Joining);
        let sent = format!("EVENT 21 {METER_ADDR} 00");
        let joined = format!("EVENT 25 {METER_ADDR}");
        self.push(&["OK", &sent, &joined]);
        self.drain();
        assert_eq!(self.broute.state(), State::Running);
    }

    /// 最初から接続完了まで
    pub fn connect(&mut self) {
        self.run_until_scanning();
        self.push_scan_result();
        assert_eq!(self.broute.state(), State::ResolvingAddress);
        self.run_until_joined();
    }

    /// スマートメーターからの電文を受け取る
    pub fn receive(&mut self, packet: &[u8]) {
        let line = erxudp_line(packet);
        self.push(&[&line]);
        self.drain();
    }
}

/// スマートメーターから送られてくるERXUDP行
pub fn erxudp_line(packet: &[u8]) -> String {
    format!(
        "ERXUDP {METER_ADDR} {SELF_ADDR} 0E1A 0E1A 0011223344556677 1 {:04X} {}",
        packet.len(),
        hex::bin2hex(packet)
    )
}

/// スマートメーターが送る電文
pub fn meter_packet(esv: u8, props: &[(u8, &[u8])]) -> Vec<u8> {
    let mut packet = vec![
        0x10, 0x81, // EHD
        0x00, 0x01, // TID
        0x02, 0x88, 0x01, // SEOJ
        0x05, 0xff, 0x01, // DEOJ
        esv,
        props.len() as u8,
    ];
    for (epc, edt) in props {
        packet.push(*epc);
        packet.push(edt.len() as u8);
        packet.extend_from_slice(edt);
    }
    packet
}

/// 部分列を含むか
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
