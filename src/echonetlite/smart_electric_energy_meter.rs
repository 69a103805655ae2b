// Echonetlite 低圧スマートメータークラス
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::echonetlite::{EchonetliteEdata, get_signed_long, get_unsigned_long, get_unsigned_short};
use chrono::{DateTime, NaiveDate};
use chrono_tz::{Asia::Tokyo, Tz};
use rust_decimal::Decimal;
use std::fmt;

#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Properties {
    Coefficient(Coefficient),
    CumlativeAmountsPower(CumlativeAmountsPower),
    UnitForCumlativeAmountsPower(UnitForCumlativeAmountsPower),
    InstantiousPower(InstantiousPower),
    CumlativeAmountsOfPowerAtFixedTime(CumlativeAmountsOfPowerAtFixedTime),
}

impl Properties {
    pub fn show(&self, opt_unit: Option<&UnitForCumlativeAmountsPower>) -> String {
        match self {
            Self::Coefficient(a) => format!("{}", a),
            Self::CumlativeAmountsPower(a) => a.show(opt_unit),
            Self::UnitForCumlativeAmountsPower(a) => format!("{}", a),
            Self::InstantiousPower(a) => format!("{}", a),
            Self::CumlativeAmountsOfPowerAtFixedTime(a) => a.show(opt_unit),
        }
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for Properties {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        match edata.epc {
            Coefficient::EPC => Coefficient::try_from(edata).map(Self::Coefficient),
            CumlativeAmountsPower::EPC => {
                CumlativeAmountsPower::try_from(edata).map(Self::CumlativeAmountsPower)
            }
            UnitForCumlativeAmountsPower::EPC => {
                UnitForCumlativeAmountsPower::try_from(edata).map(Self::UnitForCumlativeAmountsPower)
            }
            InstantiousPower::EPC => InstantiousPower::try_from(edata).map(Self::InstantiousPower),
            CumlativeAmountsOfPowerAtFixedTime::EPC => {
                CumlativeAmountsOfPowerAtFixedTime::try_from(edata)
                    .map(Self::CumlativeAmountsOfPowerAtFixedTime)
            }
            _ => Err(format!("UNKNOWN EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.show(None))
    }
}

fn bad_edt(edata: &EchonetliteEdata) -> String {
    format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)
}

/// 0xd3 係数
///
/// 積算電力量計測値に掛ける。0以下は未取得扱い。
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Coefficient(pub i32);

impl Coefficient {
    pub const EPC: u8 = 0xd3; // 0xd3 係数

    pub fn is_known(&self) -> bool {
        self.0 > 0
    }
}

impl Default for Coefficient {
    // 係数プロパティがないメーターは × 1
    fn default() -> Self {
        Self(1)
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for Coefficient {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        match (edata.epc, edata.edt.len()) {
            (Self::EPC, 4) => get_signed_long(edata.edt, 0)
                .map(Self)
                .ok_or_else(|| bad_edt(edata)),
            _ => Err(bad_edt(edata)),
        }
    }
}

impl fmt::Display for Coefficient {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "係数={}", self.0)
    }
}

/// 0xe0 積算電力量計測値(正方向計測値)
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct CumlativeAmountsPower(pub u32);

impl CumlativeAmountsPower {
    pub const EPC: u8 = 0xe0; // 0xe0 積算電力量計測値(正方向計測値)

    /// 単位 × 計測値 × 係数
    pub fn kwh(&self, unit: &UnitForCumlativeAmountsPower, coefficient: Coefficient) -> Option<Decimal> {
        unit.unit
            .checked_mul(Decimal::from(self.0))?
            .checked_mul(Decimal::from(coefficient.0))
    }

    pub fn show(&self, opt_unit: Option<&UnitForCumlativeAmountsPower>) -> String {
        match opt_unit.and_then(|unit| self.kwh(unit, Coefficient::default())) {
            Some(kwh) => format!("積算電力量計測値(正方向計測値)={:8} kwh", kwh),
            None => format!("積算電力量計測値(正方向計測値)={:8}", self.0),
        }
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for CumlativeAmountsPower {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        match (edata.epc, edata.edt.len()) {
            (Self::EPC, 4) => get_unsigned_long(edata.edt, 0)
                .map(Self)
                .ok_or_else(|| bad_edt(edata)),
            _ => Err(bad_edt(edata)),
        }
    }
}

impl fmt::Display for CumlativeAmountsPower {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.show(None))
    }
}

/// 0xe1 積算電力量単位(正方向、逆方向計測値)
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct UnitForCumlativeAmountsPower {
    pub code: u8,
    pub unit: Decimal,
}

impl UnitForCumlativeAmountsPower {
    pub const EPC: u8 = 0xe1; // 0xe1 積算電力量単位(正方向、逆方向計測値)

    pub fn from_code(code: u8) -> Option<Self> {
        let unit = match code {
            0x00 => Decimal::new(1, 0),     // 1 kwh
            0x01 => Decimal::new(1, 1),     // 0.1 kwh
            0x02 => Decimal::new(1, 2),     // 0.01 kwh
            0x03 => Decimal::new(1, 3),     // 0.001 kwh
            0x04 => Decimal::new(1, 4),     // 0.0001 kwh
            0x0a => Decimal::new(10, 0),    // 10 kwh
            0x0b => Decimal::new(100, 0),   // 100 kwh
            0x0c => Decimal::new(1000, 0),  // 1000 kwh
            0x0d => Decimal::new(10000, 0), // 10000 kwh
            _ => return None,
        };
        Some(Self { code, unit })
    }

    /// 表示する小数点以下の桁数
    ///
    /// 単位が1kwh以下のときだけ決まる。
    pub fn accuracy_decimals(&self, coefficient: Coefficient) -> Option<u8> {
        if self.code >= 0x0a || !coefficient.is_known() {
            return None;
        }
        let digits = (f64::from(self.code) - f64::from(coefficient.0).log10()).ceil();
        Some(digits.max(0.0) as u8)
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for UnitForCumlativeAmountsPower {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        match edata.edt {
            &[code] if edata.epc == Self::EPC => {
                Self::from_code(code).ok_or_else(|| bad_edt(edata))
            }
            _ => Err(bad_edt(edata)),
        }
    }
}

impl fmt::Display for UnitForCumlativeAmountsPower {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "積算電力量単位(正方向、逆方向計測値)= {} kwh", self.unit)
    }
}

/// 0xe7 瞬時電力計測値
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct InstantiousPower(pub i32);

impl InstantiousPower {
    pub const EPC: u8 = 0xe7; // 0xe7 瞬時電力計測値
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for InstantiousPower {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        match (edata.epc, edata.edt.len()) {
            // マイナスの値もある
            (Self::EPC, 4) => get_signed_long(edata.edt, 0)
                .map(Self)
                .ok_or_else(|| bad_edt(edata)),
            _ => Err(bad_edt(edata)),
        }
    }
}

impl fmt::Display for InstantiousPower {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "瞬時電力={:5} W", self.0)
    }
}

/// 0xea 定時積算電力量計測値(正方向計測値)
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct CumlativeAmountsOfPowerAtFixedTime {
    pub time_point: DateTime<Tz>,
    pub cumlative_amounts_power: u32,
}

impl CumlativeAmountsOfPowerAtFixedTime {
    pub const EPC: u8 = 0xea; // 0xea 定時積算電力量計測値(正方向計測値)
    const EDT_LEN: usize = 11;

    pub fn show(&self, opt_unit: Option<&UnitForCumlativeAmountsPower>) -> String {
        let time_point = self.time_point.format("%Y-%m-%d %H:%M:%S");
        match opt_unit {
            Some(unit) => format!(
                "定時積算電力量計測値(正方向計測値)={} ({:8} kwh)",
                time_point,
                Decimal::from(self.cumlative_amounts_power) * unit.unit
            ),
            None => format!(
                "定時積算電力量計測値(正方向計測値)={} ({:8})",
                time_point, self.cumlative_amounts_power
            ),
        }
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for CumlativeAmountsOfPowerAtFixedTime {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        if edata.epc != Self::EPC || edata.edt.len() != Self::EDT_LEN {
            return Err(bad_edt(edata));
        }
        // 年 2bytes, 月日時分秒 各1byte, 積算電力量 4bytes
        let year = get_unsigned_short(edata.edt, 0).ok_or_else(|| bad_edt(edata))?;
        let [month, day, hour, minute, second] = [2, 3, 4, 5, 6].map(|i| u32::from(edata.edt[i]));
        let value = get_unsigned_long(edata.edt, 7).ok_or_else(|| bad_edt(edata))?;
        // 日本時間
        let time_point = NaiveDate::from_ymd_opt(i32::from(year), month, day)
            .and_then(|a| a.and_hms_opt(hour, minute, second))
            .and_then(|a| a.and_local_timezone(Tokyo).single())
            .ok_or_else(|| format!("BAD DATETIME EDT:{:?}", edata.edt))?;
        Ok(Self {
            time_point,
            cumlative_amounts_power: value,
        })
    }
}

impl fmt::Display for CumlativeAmountsOfPowerAtFixedTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.show(None))
    }
}

#[test]
fn test1() {
    let edata = EchonetliteEdata {
        epc: 0xe7,
        pdc: 4,
        edt: &[0x00, 0x00, 0x02, 0x58],
    };
    assert_eq!(
        Properties::try_from(&edata),
        Ok(Properties::InstantiousPower(InstantiousPower(600)))
    );
    let edata = EchonetliteEdata {
        epc: 0xe7,
        pdc: 4,
        edt: &[0xff, 0xff, 0xff, 0xf6],
    };
    assert_eq!(InstantiousPower::try_from(&edata), Ok(InstantiousPower(-10)));
    // 長さ違い
    let edata = EchonetliteEdata {
        epc: 0xe7,
        pdc: 2,
        edt: &[0x02, 0x58],
    };
    assert!(InstantiousPower::try_from(&edata).is_err());

    let edata = EchonetliteEdata {
        epc: 0xd3,
        pdc: 4,
        edt: &[0x00, 0x00, 0x00, 0x0a],
    };
    assert_eq!(Coefficient::try_from(&edata), Ok(Coefficient(10)));
    assert!(!Coefficient(0).is_known());
    assert!(Coefficient::default().is_known());
}

#[test]
fn test2() {
    let edata = EchonetliteEdata {
        epc: 0xe1,
        pdc: 1,
        edt: &[0x01],
    };
    let unit = UnitForCumlativeAmountsPower::try_from(&edata).unwrap();
    assert_eq!(unit.unit, Decimal::new(1, 1));
    // 範囲外の単位
    let edata = EchonetliteEdata {
        epc: 0xe1,
        pdc: 1,
        edt: &[0x05],
    };
    assert!(UnitForCumlativeAmountsPower::try_from(&edata).is_err());

    // 0.1kwh x 係数1 は小数1桁
    assert_eq!(unit.accuracy_decimals(Coefficient(1)), Some(1));
    // 0.1kwh x 係数10 は整数
    assert_eq!(unit.accuracy_decimals(Coefficient(10)), Some(0));
    assert_eq!(unit.accuracy_decimals(Coefficient(1000)), Some(0));
    assert_eq!(unit.accuracy_decimals(Coefficient(0)), None);
    let unit4 = UnitForCumlativeAmountsPower::from_code(0x04).unwrap();
    assert_eq!(unit4.accuracy_decimals(Coefficient(1)), Some(4));
    let unit10 = UnitForCumlativeAmountsPower::from_code(0x0a).unwrap();
    assert_eq!(unit10.accuracy_decimals(Coefficient(1)), None);

    let energy = CumlativeAmountsPower(123456);
    assert_eq!(
        energy.kwh(&unit, Coefficient(1)),
        Some(Decimal::new(123456, 1))
    );
    assert_eq!(
        energy.kwh(&unit, Coefficient(10)),
        Some(Decimal::new(123456, 0))
    );
}

#[test]
fn test3() {
    let edata = EchonetliteEdata {
        epc: 0xea,
        pdc: 11,
        edt: &[
            0x07, 0xe9, 0x03, 0x1c, 0x0f, 0x00, 0x00, 0x00, 0x01, 0xe2, 0x40,
        ],
    };
    let fixed = CumlativeAmountsOfPowerAtFixedTime::try_from(&edata).unwrap();
    assert_eq!(
        fixed.time_point.to_rfc3339(),
        "2025-03-28T15:00:00+09:00"
    );
    assert_eq!(fixed.cumlative_amounts_power, 123456);

    // 13月
    let edata = EchonetliteEdata {
        epc: 0xea,
        pdc: 11,
        edt: &[
            0x07, 0xe9, 0x0d, 0x1c, 0x0f, 0x00, 0x00, 0x00, 0x01, 0xe2, 0x40,
        ],
    };
    assert!(CumlativeAmountsOfPowerAtFixedTime::try_from(&edata).is_err());
}
