// 受信したプロパティ値の処理
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::broute::BRoute;
use crate::echonetlite::{
    EchonetliteEdata, EchonetliteFrame, UDP_PORT, decode_packet, esv,
    smart_electric_energy_meter as SM,
};
use crate::hex;
use crate::scheduler::{Scheduler, TaskId};
use crate::skstack::{Clock, Transport, parser};
use rust_decimal::prelude::ToPrimitive;

/// ERXUDPで受け取れる最大のデータ長
const MAX_UDP_PAYLOAD: usize = 255;

/// 積算電力量の係数と単位
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnergyScaling {
    pub coefficient: Option<SM::Coefficient>,
    pub unit: Option<SM::UnitForCumlativeAmountsPower>,
}

impl EnergyScaling {
    /// 係数と単位の両方がわかっている
    pub fn is_known(&self) -> bool {
        self.coefficient.is_some_and(|c| c.is_known()) && self.unit.is_some()
    }

    /// kwh
    pub fn kwh(&self, value: SM::CumlativeAmountsPower) -> Option<f64> {
        match (self.coefficient, &self.unit) {
            (Some(coefficient), Some(unit)) if coefficient.is_known() => {
                value.kwh(unit, coefficient)?.to_f64()
            }
            _ => None,
        }
    }

    /// 表示桁数
    pub fn accuracy_decimals(&self) -> Option<u8> {
        match (self.coefficient, &self.unit) {
            (Some(coefficient), Some(unit)) => unit.accuracy_decimals(coefficient),
            _ => None,
        }
    }
}

impl<T: Transport, C: Clock, S: Scheduler> BRoute<T, C, S> {
    /// ERXUDPを受信した
    pub(super) fn handle_rxudp(&mut self, remain: &str) {
        tracing::trace!("RXUDP: {}", remain);
        let erxudp = match parser::rx_erxudp(remain) {
            Ok((_, erxudp)) => erxudp,
            Err(e) => {
                tracing::warn!("{}: Failed to parse rxudp, skipped ({:?})", remain, e);
                return;
            }
        };
        if erxudp.destination_port != UDP_PORT {
            tracing::debug!(
                "{}: Destination port is not for EchonetLite",
                erxudp.destination_port
            );
            return;
        }
        let mut buffer = [0u8; MAX_UDP_PAYLOAD];
        let Some(len) = erxudp.payload(remain, &mut buffer) else {
            tracing::warn!(
                "{}: Failed to decode udp data",
                remain.get(erxudp.data_pos..).unwrap_or_default()
            );
            return;
        };
        let frame = match decode_packet(&buffer[..len]) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    "{}: Failed to decode echonet packet, {}",
                    hex::bin2hex(&buffer[..len]),
                    e
                );
                return;
            }
        };
        // 低圧スマート電力量メータ以外は相手にしない
        if !frame.is_from_smart_meter() {
            return;
        }
        tracing::debug!(
            "{} {}",
            frame,
            frame
                .edata
                .iter()
                .map(|e| e.show(self.scaling.unit.as_ref()))
                .collect::<Vec<String>>()
                .join(" ")
        );
        if matches!(frame.esv, esv::GET_RES | esv::INF | esv::GET_SNA) {
            self.handle_property_response(&frame);
        }
    }

    fn handle_property_response(&mut self, frame: &EchonetliteFrame) {
        for edata in frame.edata.iter() {
            match edata.epc {
                SM::Coefficient::EPC => self.on_coefficient(frame.esv, edata),
                SM::UnitForCumlativeAmountsPower::EPC => self.on_unit(edata),
                // 読み出し不可
                _ if frame.esv == esv::GET_SNA => {}
                SM::InstantiousPower::EPC => self.on_momentary_power(edata),
                SM::CumlativeAmountsOfPowerAtFixedTime::EPC => self.on_scheduled_energy(edata),
                SM::CumlativeAmountsPower::EPC => self.on_integral_energy(edata),
                epc => tracing::debug!("Drop property response {:02X}", epc),
            }
        }
    }

    fn reset_watchdogs(&mut self) {
        let now = self.sk.now_ms();
        self.watchdogs.reset_all(now);
    }

    fn on_coefficient(&mut self, service: u8, edata: &EchonetliteEdata) {
        tracing::debug!("coeff received");
        let coefficient = if service == esv::GET_SNA && edata.pdc == 0 {
            // 係数がないメーター
            SM::Coefficient::default()
        } else {
            match SM::Coefficient::try_from(edata) {
                Ok(a) => a,
                Err(e) => {
                    tracing::warn!("property(coeff) len mismatch {} != 4, {}", edata.pdc, e);
                    return;
                }
            }
        };
        self.scaling.coefficient = Some(coefficient);
        self.on_energy_scaling_updated();
    }

    fn on_unit(&mut self, edata: &EchonetliteEdata) {
        tracing::debug!("unit received");
        if edata.pdc != 1 {
            tracing::warn!("Property(unit) len mismatch {} != 1", edata.pdc);
            return;
        }
        match SM::UnitForCumlativeAmountsPower::try_from(edata) {
            Ok(unit) => {
                self.scaling.unit = Some(unit);
                self.on_energy_scaling_updated();
            }
            Err(e) => tracing::warn!("Property(unit) {}", e),
        }
    }

    fn on_energy_scaling_updated(&mut self) {
        if !self.scaling.is_known() {
            return;
        }
        self.scheduler.cancel(TaskId::EnergyParams);
        if let (Some(decimals), Some(sensor)) =
            (self.scaling.accuracy_decimals(), self.energy_sensor.as_mut())
        {
            sensor.set_accuracy_decimals(decimals);
        }
    }

    fn on_momentary_power(&mut self, edata: &EchonetliteEdata) {
        tracing::debug!("POWER received");
        let power = match SM::InstantiousPower::try_from(edata) {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!("Property(momentary power) len mismatch {} != 4, {}", edata.pdc, e);
                return;
            }
        };
        // 正しい応答を受け取ったので再送を止める
        self.scheduler.cancel(TaskId::PowerRequest);
        self.reset_watchdogs();
        if let Some(sensor) = self.power_sensor.as_mut() {
            sensor.publish_state(f64::from(power.0));
        }
    }

    fn on_scheduled_energy(&mut self, edata: &EchonetliteEdata) {
        tracing::debug!("Scheduled ENERGY received");
        if edata.pdc != 11 {
            tracing::warn!("Property(sched integral energy) len mismatch {} != 11", edata.pdc);
            return;
        }
        self.reset_watchdogs();
        match SM::CumlativeAmountsOfPowerAtFixedTime::try_from(edata) {
            Ok(a) => tracing::info!("{}", a.show(self.scaling.unit.as_ref())),
            Err(e) => tracing::warn!("{}", e),
        }
    }

    fn on_integral_energy(&mut self, edata: &EchonetliteEdata) {
        tracing::debug!("ENERGY received");
        let value = match SM::CumlativeAmountsPower::try_from(edata) {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!("Property(integral energy fwd) len mismatch {} != 4, {}", edata.pdc, e);
                return;
            }
        };
        self.scheduler.cancel(TaskId::EnergyRequest);
        self.reset_watchdogs();
        let Some(sensor) = self.energy_sensor.as_mut() else {
            return;
        };
        match self.scaling.kwh(value) {
            Some(kwh) => {
                tracing::trace!("Energy {} = {:?} * {}", kwh, self.scaling, value.0);
                sensor.publish_state(kwh);
            }
            None => tracing::warn!("energy params not received, dropped {}", value),
        }
    }
}

#[test]
fn test1() {
    let mut scaling = EnergyScaling::default();
    assert!(!scaling.is_known());
    assert_eq!(scaling.kwh(SM::CumlativeAmountsPower(100)), None);

    scaling.unit = SM::UnitForCumlativeAmountsPower::from_code(0x01);
    assert!(!scaling.is_known());
    scaling.coefficient = Some(SM::Coefficient(0));
    assert!(!scaling.is_known());
    assert_eq!(scaling.kwh(SM::CumlativeAmountsPower(100)), None);

    scaling.coefficient = Some(SM::Coefficient(1));
    assert!(scaling.is_known());
    let kwh = scaling.kwh(SM::CumlativeAmountsPower(123456)).unwrap();
    assert!((kwh - 12345.6).abs() < 1e-9);
    assert_eq!(scaling.accuracy_decimals(), Some(1));
}
