// スマートメーターBルート 接続と計測
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
pub mod property;
pub mod state;
pub mod watchdog;

pub use property::EnergyScaling;
pub use state::*;
pub use watchdog::*;

use crate::echonetlite::{
    EOJ_CONTROLLER, EOJ_LOWV_SMART_METER, UDP_PORT, encode_property_get,
    smart_electric_energy_meter as SM,
};
use crate::scheduler::{Scheduler, TaskId, TimerTable};
use crate::sensor::SensorSink;
use crate::skstack::{self, Clock, ScanResult, SkRxD, SkStack, Transport, arg, authn};
use std::net::Ipv6Addr;
use thiserror::Error;

/// 送信できなかったときの再送間隔
pub const SEND_RETRY_INTERVAL: u32 = 2_000;
/// 応答がないときの再要求間隔
pub const REQUEST_RETRY_INTERVAL: u32 = 5_000;
/// 再起動を要求するまでの時間
pub const RESTART_DELAY: u32 = 5_000;
/// 1回のtickでイベントを待つ時間
pub const EVENT_TIMEOUT: u32 = 100;

const PROPS_MOMENTARY_POWER: [u8; 1] = [SM::InstantiousPower::EPC];
const PROPS_ENERGY_PARAMS: [u8; 2] = [SM::Coefficient::EPC, SM::UnitForCumlativeAmountsPower::EPC];
const PROPS_INTEGRAL_ENERGY: [u8; 1] = [SM::CumlativeAmountsPower::EPC];

/// 電文バッファ
const FRAME_BUFFER_SIZE: usize = 255;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Route B ID/Password not set")]
    MissingCredentials,
}

/// 設定(時間はすべてミリ秒, 0は無効)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BRouteConfig {
    pub credentials: Option<authn::Credentials>,
    pub power_interval_ms: u32,
    pub energy_interval_ms: u32,
    pub rejoin_timeout_ms: u32,
    pub rescan_timeout_ms: u32,
    pub restart_timeout_ms: u32,
}

impl Default for BRouteConfig {
    fn default() -> Self {
        Self {
            credentials: None,
            power_interval_ms: 30_000,
            energy_interval_ms: 60_000,
            rejoin_timeout_ms: 120_000,
            rescan_timeout_ms: 240_000,
            restart_timeout_ms: 360_000,
        }
    }
}

/// tickの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    /// 設定不備などで停止した
    Failed,
    /// 再起動して欲しい
    RebootRequested,
}

/// Bルート接続と計測
pub struct BRoute<T: Transport, C: Clock, S: Scheduler = TimerTable> {
    sk: SkStack<T, C>,
    scheduler: S,
    config: BRouteConfig,
    power_sensor: Option<Box<dyn SensorSink>>,
    energy_sensor: Option<Box<dyn SensorSink>>,
    connection: Connection,
    scan: ScanResult,
    v6_address: Option<Ipv6Addr>,
    scaling: EnergyScaling,
    watchdogs: StallWatchdogs,
    failed: bool,
}

impl<T: Transport, C: Clock, S: Scheduler> BRoute<T, C, S> {
    pub fn new(transport: T, clock: C, scheduler: S, config: BRouteConfig) -> Self {
        let sk = SkStack::new(transport, clock);
        let now = sk.now_ms();
        let watchdogs = StallWatchdogs::new(
            config.rescan_timeout_ms,
            config.rejoin_timeout_ms,
            config.restart_timeout_ms,
            now,
        );
        Self {
            sk,
            scheduler,
            config,
            power_sensor: None,
            energy_sensor: None,
            connection: Connection::new(now),
            scan: ScanResult::default(),
            v6_address: None,
            scaling: EnergyScaling::default(),
            watchdogs,
            failed: false,
        }
    }

    pub fn with_power_sensor(mut self, sensor: Box<dyn SensorSink>) -> Self {
        self.power_sensor = Some(sensor);
        self
    }

    pub fn with_energy_sensor(mut self, sensor: Box<dyn SensorSink>) -> Self {
        self.energy_sensor = Some(sensor);
        self
    }

    pub fn state(&self) -> State {
        self.connection.state()
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn scan_result(&self) -> &ScanResult {
        &self.scan
    }

    pub fn v6_address(&self) -> Option<Ipv6Addr> {
        self.v6_address
    }

    pub fn energy_scaling(&self) -> &EnergyScaling {
        &self.scaling
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn transport(&self) -> &T {
        self.sk.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.sk.transport_mut()
    }

    /// 計測要求を出す設定か
    pub fn is_measurement_requesting(&self) -> bool {
        (self.power_sensor.is_some() && self.config.power_interval_ms > 0)
            || (self.energy_sensor.is_some() && self.config.energy_interval_ms > 0)
    }

    /// 計測タスクを予約する
    pub fn setup(&mut self) -> Result<(), Error> {
        if self.config.credentials.is_none() {
            tracing::error!("Route B ID/Password not set");
            self.failed = true;
            return Err(Error::MissingCredentials);
        }
        let now = self.sk.now_ms();
        if self.power_sensor.is_some() || self.energy_sensor.is_some() {
            self.request_energy_parameters();
        }
        if self.power_sensor.is_some() {
            self.scheduler
                .set_interval(TaskId::PowerPoll, now, self.config.power_interval_ms);
        }
        if self.energy_sensor.is_some() {
            self.scheduler
                .set_interval(TaskId::EnergyPoll, now, self.config.energy_interval_ms);
        }
        self.watchdogs.reset_all(now);
        Ok(())
    }

    /// 1回分の処理
    ///
    /// EVENT_TIMEOUTより長くは止まらない。
    pub fn tick(&mut self) -> Status {
        if self.failed {
            return Status::Failed;
        }
        let now = self.sk.now_ms();
        if self.state() == State::Restarting {
            // 読み捨てる
            let rxd = self.sk.get_event(EVENT_TIMEOUT);
            if rxd != SkRxD::Void {
                tracing::debug!("restarting, ignored {}", rxd.kind());
            }
            if self.connection.elapsed(self.sk.now_ms()) >= RESTART_DELAY {
                for id in TaskId::ALL {
                    self.scheduler.cancel(id);
                }
                self.failed = true;
                return Status::RebootRequested;
            }
            return Status::Running;
        }
        if self.is_measurement_requesting() {
            if let Some(elapsed) = self.watchdogs.restart.expired(now) {
                tracing::error!(
                    "計測データを {} 秒間受信していません。再起動します",
                    elapsed / 1000
                );
                self.set_state(State::Restarting);
                return Status::Running;
            }
        }
        for id in self.scheduler.take_due(now) {
            self.run_task(id);
        }
        let rxd = self.get_event();
        match self.state() {
            State::Init => {
                self.send_sk("SKVER", &[]);
                self.set_state(State::WaitingVersion);
            }
            State::WaitingVersion => match rxd {
                SkRxD::Ever(version) => tracing::info!("VER={}", version),
                SkRxD::Ok(_) => {
                    // エコーバックを止める
                    self.send_sk("SKSREG", &[arg::reg(0xfe), arg::mode(0)]);
                    self.set_state(State::ApplyingSettings(Setting::Echo));
                }
                _ => {}
            },
            State::ApplyingSettings(setting) => {
                if let SkRxD::Ok(remain) = rxd {
                    self.apply_settings(setting, remain.as_deref());
                }
            }
            State::Scanning => self.on_scanning(rxd),
            State::ResolvingAddress => {
                if let SkRxD::Unknown(line) = rxd {
                    self.on_address_resolved(&line);
                }
            }
            State::Joining => self.on_joining(rxd),
            State::Running => self.on_running(rxd),
            State::Restarting => {}
        }
        let now = self.sk.now_ms();
        if self.connection.is_expired(now) {
            tracing::warn!("{}: State timeout, re-run from init", self.state());
            self.set_state(State::Init);
        }
        Status::Running
    }

    fn set_state(&mut self, state: State) {
        let now = self.sk.now_ms();
        self.connection.set(state, now);
    }

    fn get_event(&mut self) -> SkRxD {
        let rxd = self.sk.get_event(EVENT_TIMEOUT);
        match &rxd {
            SkRxD::Void => {}
            SkRxD::Event(event) => tracing::trace!("ev = {}", event),
            other => tracing::trace!("ev = {}, {:?}", other.kind(), other),
        }
        rxd
    }

    fn send_sk(&mut self, command: &str, args: &[String]) -> bool {
        report_send(command, self.sk.send_sk(command, args))
    }

    fn send_prod(&mut self, command: &str, args: &[String]) -> bool {
        report_send(command, self.sk.send_prod(command, args))
    }

    fn apply_settings(&mut self, setting: Setting, remain: Option<&str>) {
        match setting {
            Setting::Echo => {
                // ASCIIモードか確かめる
                self.send_prod("ROPT", &[]);
                self.set_state(State::ApplyingSettings(Setting::Ropt));
            }
            Setting::Ropt if remain != Some("01") => {
                tracing::debug!("ropt={:?}", remain);
                self.send_prod("WOPT", &[arg::num8(1)]);
                self.set_state(State::ApplyingSettings(Setting::Wopt));
            }
            Setting::Ropt | Setting::Wopt => {
                let Some(credentials) = self.config.credentials.clone() else {
                    tracing::error!("Route B ID/Password not set");
                    self.failed = true;
                    return;
                };
                self.send_sk("SKSETPWD", &credentials.password_args());
                self.set_state(State::ApplyingSettings(Setting::Password));
            }
            Setting::Password => {
                let Some(credentials) = self.config.credentials.clone() else {
                    tracing::error!("Route B ID/Password not set");
                    self.failed = true;
                    return;
                };
                self.send_sk("SKSETRBID", &credentials.rbid_args());
                self.set_state(State::ApplyingSettings(Setting::Rbid));
            }
            Setting::Rbid => self.start_scan(),
            Setting::Channel => {
                let pan_id = arg::str(&self.scan.pan_id);
                self.send_sk("SKSREG", &[arg::reg(0x03), pan_id]);
                self.set_state(State::ApplyingSettings(Setting::PanId));
            }
            Setting::PanId => self.start_join(),
        }
    }

    fn start_scan(&mut self) {
        self.scan.clear();
        self.send_sk("SKSCAN", &skstack::scan_args());
        self.set_state(State::Scanning);
    }

    fn start_join(&mut self) {
        let Some(address) = self.v6_address else {
            tracing::warn!("no address to join, scan again");
            self.start_scan();
            return;
        };
        self.send_sk("SKJOIN", &[arg::ipv6(&address)]);
        self.set_state(State::Joining);
    }

    fn on_scanning(&mut self, rxd: SkRxD) {
        match rxd {
            SkRxD::Ok(_) => tracing::info!("Scanning..."),
            SkRxD::Event(event) if event.code == skstack::Event::DONE_ACTIVE_SCAN => {
                if self.scan.is_complete() {
                    tracing::info!("Scan done");
                    let now = self.sk.now_ms();
                    self.watchdogs.rescan.reset(now);
                    let mac = arg::str(&self.scan.mac);
                    self.send_sk("SKLL64", &[mac]);
                    self.set_state(State::ResolvingAddress);
                } else {
                    tracing::warn!("Scan done but channel not received, scan again");
                    self.start_scan();
                }
            }
            SkRxD::Unknown(line) => {
                self.scan.accept_line(&line);
            }
            _ => {}
        }
    }

    fn on_address_resolved(&mut self, line: &str) {
        if line.starts_with("SKLL") || line.len() != 39 {
            return;
        }
        match line.parse::<Ipv6Addr>() {
            Ok(address) => {
                tracing::debug!("ipv6 address={}", address);
                self.v6_address = Some(address);
                let channel = arg::str(&self.scan.channel);
                self.send_sk("SKSREG", &[arg::reg(0x02), channel]);
                self.set_state(State::ApplyingSettings(Setting::Channel));
            }
            Err(e) => tracing::warn!("{}: {}", line, e),
        }
    }

    fn on_joining(&mut self, rxd: SkRxD) {
        match rxd {
            SkRxD::Ok(_) => tracing::info!("Joining..."),
            SkRxD::Event(event) => match event.code {
                skstack::Event::DONE_PANA_CONNECTION => {
                    tracing::info!("Joined");
                    self.set_state(State::Running);
                    let now = self.sk.now_ms();
                    self.watchdogs.rejoin.reset(now);
                }
                skstack::Event::FAILED_PANA_CONNECTION => {
                    tracing::warn!("Failed to join, try scan and join");
                    self.start_scan();
                }
                skstack::Event::SENT_UDP => {}
                _ => tracing::debug!("{}: Ignore event", event),
            },
            _ => {}
        }
    }

    fn on_running(&mut self, rxd: SkRxD) {
        match rxd {
            SkRxD::Event(event) => match event.code {
                skstack::Event::LIMIT_RATE => tracing::info!("Transmit time limit activated"),
                skstack::Event::CANCELED_LIMIT => tracing::warn!("Transmit time limit cleared"),
                skstack::Event::EXPIRED_SESSION => {
                    tracing::info!("Session expired, waiting re-join");
                    self.set_state(State::Joining);
                }
                _ => tracing::trace!("{}: Unhandled event", event),
            },
            SkRxD::Erxudp(remain) => self.handle_rxudp(&remain),
            SkRxD::Void => {}
            other => tracing::trace!("{}: Unhandled input", other.kind()),
        }
        if self.state() != State::Running || !self.is_measurement_requesting() {
            return;
        }
        let now = self.sk.now_ms();
        if let Some(elapsed) = self.watchdogs.rescan.expired(now) {
            tracing::error!(
                "計測データを {} 秒間受信していません。再スキャンします",
                elapsed / 1000
            );
            self.start_scan();
        } else if let Some(elapsed) = self.watchdogs.rejoin.expired(now) {
            tracing::warn!(
                "計測データを {} 秒間受信していません。再接続します",
                elapsed / 1000
            );
            self.start_join();
        }
    }

    fn run_task(&mut self, id: TaskId) {
        tracing::trace!("run task {}", id);
        match id {
            TaskId::EnergyParams => self.request_energy_parameters(),
            TaskId::PowerRequest | TaskId::PowerPoll => self.request_momentary_power(),
            TaskId::EnergyRequest | TaskId::EnergyPoll => self.request_integral_energy(),
        }
    }

    fn schedule_retry(&mut self, id: TaskId, requested: bool) {
        let now = self.sk.now_ms();
        let delay = if requested {
            REQUEST_RETRY_INTERVAL
        } else {
            SEND_RETRY_INTERVAL
        };
        self.scheduler.set_timeout(id, now, delay);
    }

    fn request_energy_parameters(&mut self) {
        let requested = self.request_property(&PROPS_ENERGY_PARAMS);
        if requested {
            tracing::debug!("Energy params requested");
        }
        self.schedule_retry(TaskId::EnergyParams, requested);
    }

    fn request_momentary_power(&mut self) {
        let requested = self.request_property(&PROPS_MOMENTARY_POWER);
        if requested {
            tracing::debug!("POWER requested");
        }
        self.schedule_retry(TaskId::PowerRequest, requested);
    }

    fn request_integral_energy(&mut self) {
        // 係数と単位がわかるまで要求しない
        let requested =
            self.scaling.is_known() && self.request_property(&PROPS_INTEGRAL_ENERGY);
        if requested {
            tracing::debug!("ENERGY requested");
        }
        self.schedule_retry(TaskId::EnergyRequest, requested);
    }

    /// プロパティ値読み出し要求を送信する
    fn request_property(&mut self, epcs: &[u8]) -> bool {
        if self.state() != State::Running {
            return false;
        }
        let Some(address) = self.v6_address else {
            return false;
        };
        let mut buffer = [0u8; FRAME_BUFFER_SIZE];
        let len = match encode_property_get(&mut buffer, EOJ_CONTROLLER, EOJ_LOWV_SMART_METER, epcs)
        {
            Ok(len) if len <= buffer.len() => len,
            Ok(len) => {
                tracing::error!("request too long {} bytes", len);
                return false;
            }
            Err(e) => {
                tracing::error!("{:?}", e);
                return false;
            }
        };
        let args = [
            arg::nibble(1),         // UDPハンドル
            arg::ipv6(&address),    // 宛先
            arg::num16(UDP_PORT),   // ポート番号
            arg::flag(true),        // 暗号化
            arg::num16(len as u16), // データ長
        ];
        let result = self.sk.send_sk_with_data("SKSENDTO", &args, &buffer[..len]);
        report_send("SKSENDTO", result)
    }
}

fn report_send(command: &str, result: Result<(), skstack::Error>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("{} send failed: {:?}", command, e);
            false
        }
    }
}

#[test]
fn test1() {
    use crate::skstack::send_receive::fake::{Loopback, ManualClock};
    let mut broute = BRoute::new(
        Loopback::default(),
        ManualClock::default(),
        TimerTable::new(),
        BRouteConfig::default(),
    );
    // 認証情報がないので始められない
    assert!(matches!(broute.setup(), Err(Error::MissingCredentials)));
    assert!(broute.is_failed());
    assert_eq!(broute.tick(), Status::Failed);
    assert!(broute.transport().tx.is_empty());
    assert_eq!(broute.state(), State::Init);
}

#[test]
fn test2() {
    use crate::skstack::send_receive::fake::{Loopback, ManualClock};
    let credentials = authn::Credentials {
        id: "00112233445566778899AABBCCDDEEFF".parse().unwrap(),
        password: "0123456789AB".parse().unwrap(),
    };
    let config = BRouteConfig {
        credentials: Some(credentials),
        ..Default::default()
    };
    let mut broute = BRoute::new(
        Loopback::default(),
        ManualClock::default(),
        TimerTable::new(),
        config,
    );
    // センサーがなければ計測タスクは予約しない
    broute.setup().unwrap();
    assert!(!broute.is_measurement_requesting());
    assert!(broute.scheduler().is_empty());

    assert_eq!(broute.tick(), Status::Running);
    assert_eq!(broute.state(), State::WaitingVersion);
    assert_eq!(broute.transport().tx, b"SKVER\r\n");
    // 応答がないまま1秒を超えると最初から
    broute.sk.clock().0.set(1_001);
    assert_eq!(broute.tick(), Status::Running);
    assert_eq!(broute.state(), State::Init);
}
