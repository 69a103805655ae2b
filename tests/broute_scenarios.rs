// 接続から計測までの流れ
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
mod common;

use common::{
    ScriptedTransport, SharedClock, Fixture, METER_ADDR, SELF_ADDR, contains, erxudp_line,
    meter_packet,
};
use wisun_broute::broute::{Setting, State};
use wisun_broute::echonetlite::esv;
use wisun_broute::scheduler::{Scheduler, TaskId, TimerTable};
use wisun_broute::{BRoute, Status};

/// 係数と積算電力量単位の読み出し要求
const ENERGY_PARAMS_REQUEST: [u8; 16] = [
    0x10, 0x81, 0x00, 0x00, 0x05, 0xff, 0x01, 0x02, 0x88, 0x01, 0x62, 0x02, 0xd3, 0x00, 0xe1, 0x00,
];
/// 瞬時電力計測値の読み出し要求
const POWER_REQUEST: [u8; 14] = [
    0x10, 0x81, 0x00, 0x00, 0x05, 0xff, 0x01, 0x02, 0x88, 0x01, 0x62, 0x01, 0xe7, 0x00,
];
/// 積算電力量計測値の読み出し要求(OPC以降)
const ENERGY_REQUEST_BODY: [u8; 4] = [0x62, 0x01, 0xe0, 0x00];

fn sendto_header(len: usize) -> String {
    format!("SKSENDTO 1 {METER_ADDR} 0E1A 1 {:04X} ", len)
}

/// 係数1, 単位0.1kWh
fn receive_energy_params(f: &mut Fixture) {
    f.receive(&meter_packet(
        esv::GET_RES,
        &[(0xd3, &[0x00, 0x00, 0x00, 0x01]), (0xe1, &[0x01])],
    ));
}

#[test]
fn test_settings_are_applied_in_order() {
    let mut f = Fixture::new();
    f.broute.tick();
    assert_eq!(f.broute.state(), State::WaitingVersion);
    assert_eq!(f.take_tx(), "SKVER\r\n");

    f.push(&["EVER 1.5.2", "OK"]);
    f.drain();
    assert_eq!(f.broute.state(), State::ApplyingSettings(Setting::Echo));
    assert_eq!(f.take_tx(), "SKSREG SFE 0\r\n");

    f.push(&["OK"]);
    f.drain();
    assert_eq!(f.broute.state(), State::ApplyingSettings(Setting::Ropt));
    assert_eq!(f.take_tx(), "ROPT\r");

    // バイナリモードなのでASCIIモードにする
    f.push(&["OK 00"]);
    f.drain();
    assert_eq!(f.broute.state(), State::ApplyingSettings(Setting::Wopt));
    assert_eq!(f.take_tx(), "WOPT 01\r");

    f.push(&["OK"]);
    f.drain();
    assert_eq!(f.broute.state(), State::ApplyingSettings(Setting::Password));
    assert_eq!(f.take_tx(), "SKSETPWD 0C 0123456789AB\r\n");

    f.push(&["OK"]);
    f.drain();
    assert_eq!(f.broute.state(), State::ApplyingSettings(Setting::Rbid));
    assert_eq!(f.take_tx(), "SKSETRBID 00112233445566778899AABBCCDDEEFF\r\n");

    f.push(&["OK"]);
    f.drain();
    assert_eq!(f.broute.state(), State::Scanning);
    assert_eq!(f.take_tx(), "SKSCAN 2 FFFFFFFF 6\r\n");
}

#[test]
fn test_ascii_mode_skips_wopt() {
    let mut f = Fixture::new();
    f.broute.tick();
    f.push(&["EVER 1.5.2", "OK", "OK"]);
    f.drain();
    f.take_tx();
    f.push(&["OK 01"]);
    f.drain();
    assert_eq!(f.broute.state(), State::ApplyingSettings(Setting::Password));
    assert_eq!(f.take_tx(), "SKSETPWD 0C 0123456789AB\r\n");
}

#[test]
fn test_scan_and_join() {
    let mut f = Fixture::new();
    f.run_until_scanning();
    f.take_tx();

    f.push_scan_result();
    assert_eq!(f.broute.state(), State::ResolvingAddress);
    assert_eq!(f.broute.scan_result().mac, "0011223344556677");
    assert_eq!(f.broute.scan_result().pan_id, "8888");
    assert_eq!(f.broute.scan_result().channel, "21");
    assert_eq!(f.take_tx(), "SKLL64 0011223344556677\r\n");

    // エコーバックは読み捨てて、アドレスの行を待つ
    f.push(&["SKLL64 0011223344556677", METER_ADDR]);
    f.drain();
    assert_eq!(f.broute.state(), State::ApplyingSettings(Setting::Channel));
    assert_eq!(f.broute.v6_address(), METER_ADDR.parse().ok());
    assert_eq!(f.take_tx(), "SKSREG S02 21\r\n");

    f.push(&["OK"]);
    f.drain();
    assert_eq!(f.broute.state(), State::ApplyingSettings(Setting::PanId));
    assert_eq!(f.take_tx(), "SKSREG S03 8888\r\n");

    f.push(&["OK"]);
    f.drain();
    assert_eq!(f.broute.state(), State::Joining);
    assert_eq!(f.take_tx(), format!("SKJOIN {METER_ADDR}\r\n"));

    let joined = format!("EVENT 25 {METER_ADDR}");
    f.push(&["OK", &joined]);
    f.drain();
    assert_eq!(f.broute.state(), State::Running);
}

#[test]
fn test_incomplete_scan_result_scans_again() {
    let mut f = Fixture::new();
    f.run_until_scanning();
    f.take_tx();

    // チャンネルを受け取っていない
    let done = format!("EVENT 22 {SELF_ADDR}");
    f.push(&["OK", "EPANDESC", "  Pan ID:8888", "  Addr:0011223344556677", &done]);
    f.drain();
    assert_eq!(f.broute.state(), State::Scanning);
    assert_eq!(f.take_tx(), "SKSCAN 2 FFFFFFFF 6\r\n");
    assert_eq!(f.broute.scan_result().pan_id, "");
}

#[test]
fn test_failed_join_scans_again() {
    let mut f = Fixture::new();
    f.run_until_scanning();
    f.push_scan_result();
    f.push(&[METER_ADDR, "OK", "OK"]);
    f.drain();
    assert_eq!(f.broute.state(), State::Joining);
    f.take_tx();

    let failed = format!("EVENT 24 {METER_ADDR}");
    f.push(&[&failed]);
    f.drain();
    assert_eq!(f.broute.state(), State::Scanning);
    assert_eq!(f.take_tx(), "SKSCAN 2 FFFFFFFF 6\r\n");
}

#[test]
fn test_state_timeout_restarts_from_init() {
    let mut f = Fixture::new();
    f.run_until_scanning();
    f.clock.set(20_000);
    f.broute.tick();
    assert_eq!(f.broute.state(), State::Scanning);
    f.clock.set(20_001);
    f.broute.tick();
    assert_eq!(f.broute.state(), State::Init);
    f.take_tx();
    f.broute.tick();
    assert_eq!(f.broute.state(), State::WaitingVersion);
    assert_eq!(f.take_tx(), "SKVER\r\n");
}

#[test]
fn test_energy_params_are_requested_after_join() {
    let mut f = Fixture::new();
    f.connect();
    f.take_tx();
    // 接続前の要求は送れなかったので再送を待つ
    assert!(f.broute.scheduler().is_scheduled(TaskId::EnergyParams));

    f.clock.set(2_000);
    f.broute.tick();
    let mut expected = sendto_header(ENERGY_PARAMS_REQUEST.len()).into_bytes();
    expected.extend_from_slice(&ENERGY_PARAMS_REQUEST);
    assert_eq!(f.take_tx_bytes(), expected);
    assert!(f.broute.scheduler().is_scheduled(TaskId::EnergyParams));

    receive_energy_params(&mut f);
    assert!(!f.broute.scheduler().is_scheduled(TaskId::EnergyParams));
    assert!(f.broute.energy_scaling().is_known());
    assert_eq!(f.energy.accuracy_decimals(), Some(1));
}

#[test]
fn test_meter_without_coefficient() {
    let mut f = Fixture::new();
    f.connect();
    // 係数は読み出し不可
    f.receive(&meter_packet(esv::GET_SNA, &[(0xd3, &[]), (0xe1, &[0x02])]));
    assert!(f.broute.energy_scaling().is_known());
    assert!(!f.broute.scheduler().is_scheduled(TaskId::EnergyParams));
    assert_eq!(f.energy.accuracy_decimals(), Some(2));
}

#[test]
fn test_momentary_power_is_published() {
    let mut f = Fixture::new();
    f.connect();
    f.take_tx();

    f.clock.set(30_000);
    f.broute.tick();
    let tx = f.take_tx_bytes();
    let mut expected = sendto_header(POWER_REQUEST.len()).into_bytes();
    expected.extend_from_slice(&POWER_REQUEST);
    assert!(contains(&tx, &expected));
    assert!(f.broute.scheduler().is_scheduled(TaskId::PowerRequest));

    f.receive(&meter_packet(esv::GET_RES, &[(0xe7, &[0x00, 0x00, 0x02, 0x58])]));
    assert_eq!(f.power.values(), vec![600.0]);
    assert!(!f.broute.scheduler().is_scheduled(TaskId::PowerRequest));
    assert!(f.broute.scheduler().is_scheduled(TaskId::PowerPoll));

    // 負の値
    f.receive(&meter_packet(esv::GET_RES, &[(0xe7, &[0xff, 0xff, 0xff, 0x9c])]));
    assert_eq!(f.power.values(), vec![600.0, -100.0]);
}

#[test]
fn test_malformed_reading_keeps_retry() {
    let mut f = Fixture::new();
    f.connect();
    receive_energy_params(&mut f);
    f.take_tx();

    f.clock.set(30_000);
    f.broute.tick();
    assert!(f.broute.scheduler().is_scheduled(TaskId::PowerRequest));
    // 長さ違いでは再送を止めない
    f.receive(&meter_packet(esv::GET_RES, &[(0xe7, &[0x02, 0x58])]));
    assert!(f.power.values().is_empty());
    assert!(f.broute.scheduler().is_scheduled(TaskId::PowerRequest));
    // 再送する
    f.clock.set(35_000);
    f.broute.tick();
    assert!(contains(&f.take_tx_bytes(), &POWER_REQUEST));
    f.receive(&meter_packet(esv::GET_RES, &[(0xe7, &[0x00, 0x00, 0x02, 0x58])]));
    assert_eq!(f.power.values(), vec![600.0]);
    assert!(!f.broute.scheduler().is_scheduled(TaskId::PowerRequest));

    f.clock.set(60_000);
    f.broute.tick();
    assert!(f.broute.scheduler().is_scheduled(TaskId::EnergyRequest));
    f.receive(&meter_packet(esv::GET_RES, &[(0xe0, &[0x01, 0xe2, 0x40])]));
    assert!(f.energy.values().is_empty());
    assert!(f.broute.scheduler().is_scheduled(TaskId::EnergyRequest));
    f.receive(&meter_packet(esv::GET_RES, &[(0xe0, &[0x00, 0x01, 0xe2, 0x40])]));
    assert_eq!(f.energy.values().len(), 1);
    assert!(!f.broute.scheduler().is_scheduled(TaskId::EnergyRequest));
}

#[test]
fn test_integral_energy_waits_for_scaling() {
    let mut f = Fixture::new();
    f.connect();
    f.take_tx();

    // 係数と単位がわかるまで積算電力量は要求しない
    f.clock.set(60_000);
    f.broute.tick();
    assert!(!contains(&f.take_tx_bytes(), &ENERGY_REQUEST_BODY));
    assert!(f.broute.scheduler().is_scheduled(TaskId::EnergyRequest));

    // 届いても捨てる
    f.receive(&meter_packet(esv::GET_RES, &[(0xe0, &[0x00, 0x01, 0xe2, 0x40])]));
    assert!(f.energy.values().is_empty());
    assert!(!f.broute.scheduler().is_scheduled(TaskId::EnergyRequest));

    receive_energy_params(&mut f);
    f.take_tx();
    f.clock.set(120_000);
    f.broute.tick();
    assert!(contains(&f.take_tx_bytes(), &ENERGY_REQUEST_BODY));
    assert!(f.broute.scheduler().is_scheduled(TaskId::EnergyRequest));

    f.receive(&meter_packet(esv::GET_RES, &[(0xe0, &[0x00, 0x01, 0xe2, 0x40])]));
    let values = f.energy.values();
    assert_eq!(values.len(), 1);
    assert!((values[0] - 12345.6).abs() < 1e-9);
    assert!(!f.broute.scheduler().is_scheduled(TaskId::EnergyRequest));
}

#[test]
fn test_unusable_frames_are_dropped() {
    let mut f = Fixture::new();
    f.connect();
    let packet = meter_packet(esv::GET_RES, &[(0xe7, &[0x00, 0x00, 0x02, 0x58])]);

    // データ長が合わない
    let line = erxudp_line(&packet).replacen(" 0012 ", " 0013 ", 1);
    f.push(&[&line]);
    f.drain();

    // ECHONET Lite以外のポート
    let line = erxudp_line(&packet).replacen("0E1A 0E1A", "0E1A 0E1B", 1);
    f.push(&[&line]);
    f.drain();

    // スマートメーター以外から
    let mut other = packet.clone();
    other[4..7].copy_from_slice(&[0x05, 0xff, 0x01]);
    f.receive(&other);

    // 通知不可応答
    f.receive(&meter_packet(esv::INF_SNA, &[(0xe7, &[0x00, 0x00, 0x02, 0x58])]));

    // 長さ違い
    f.receive(&meter_packet(esv::GET_RES, &[(0xe7, &[0x02, 0x58])]));

    assert!(f.power.values().is_empty());
    assert_eq!(f.broute.state(), State::Running);

    // 通知でも受け取る
    f.receive(&meter_packet(esv::INF, &[(0xe7, &[0x00, 0x00, 0x02, 0x58])]));
    assert_eq!(f.power.values(), vec![600.0]);
}

#[test]
fn test_session_expired_waits_rejoin() {
    let mut f = Fixture::new();
    f.connect();
    let expired = format!("EVENT 29 {METER_ADDR}");
    f.push(&[&expired]);
    f.drain();
    assert_eq!(f.broute.state(), State::Joining);

    let joined = format!("EVENT 25 {METER_ADDR}");
    f.push(&[&joined]);
    f.drain();
    assert_eq!(f.broute.state(), State::Running);
}

#[test]
fn test_stall_watchdogs_escalate() {
    let mut f = Fixture::new();
    f.connect();

    f.clock.set(100_000);
    f.receive(&meter_packet(esv::GET_RES, &[(0xe7, &[0x00, 0x00, 0x02, 0x58])]));
    f.clock.set(220_000);
    f.broute.tick();
    assert_eq!(f.broute.state(), State::Running);

    // 再接続
    f.take_tx();
    f.clock.set(220_001);
    f.broute.tick();
    assert_eq!(f.broute.state(), State::Joining);
    assert!(f.take_tx().contains(&format!("SKJOIN {METER_ADDR}\r\n")));
    let joined = format!("EVENT 25 {METER_ADDR}");
    f.push(&[&joined]);
    f.drain();
    assert_eq!(f.broute.state(), State::Running);

    // 再接続しても受信できないので再スキャン
    f.take_tx();
    f.clock.set(340_001);
    f.broute.tick();
    assert_eq!(f.broute.state(), State::Scanning);
    assert!(f.take_tx().contains("SKSCAN 2 FFFFFFFF 6\r\n"));
}

#[test]
fn test_restart_is_requested() {
    let mut f = Fixture::new();
    f.connect();

    f.clock.set(360_001);
    assert_eq!(f.broute.tick(), Status::Running);
    assert_eq!(f.broute.state(), State::Restarting);

    // 再起動待ちの間は何も受け付けない
    f.receive(&meter_packet(esv::GET_RES, &[(0xe7, &[0x00, 0x00, 0x02, 0x58])]));
    assert!(f.power.values().is_empty());
    let joined = format!("EVENT 25 {METER_ADDR}");
    f.push(&[&joined]);
    f.drain();
    assert_eq!(f.broute.state(), State::Restarting);

    f.take_tx();
    f.clock.set(365_000);
    assert_eq!(f.broute.tick(), Status::Running);
    f.clock.set(365_001);
    assert_eq!(f.broute.tick(), Status::RebootRequested);
    assert!(f.broute.scheduler().is_empty());
    assert!(f.take_tx().is_empty());
    assert_eq!(f.broute.tick(), Status::Failed);
}

#[test]
fn test_no_watchdog_without_sensors() {
    let clock = SharedClock::default();
    let mut broute = BRoute::new(
        ScriptedTransport::default(),
        clock.clone(),
        TimerTable::new(),
        common::config(),
    );
    broute.setup().unwrap();
    let mut f = Fixture {
        broute,
        clock,
        power: Default::default(),
        energy: Default::default(),
    };
    f.connect();
    f.clock.set(1_000_000);
    assert_eq!(f.broute.tick(), Status::Running);
    assert_eq!(f.broute.state(), State::Running);
    assert!(f.take_tx().ends_with(&format!("SKJOIN {METER_ADDR}\r\n")));
}
