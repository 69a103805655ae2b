// Echonetlite EDATA
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::echonetlite::smart_electric_energy_meter as SM;
use bincode::de::read::BorrowReader;
use core::result;
use std::fmt;

/// プロパティ
///
/// EDTは受信バッファを借用する。コピーはしない。
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct EchonetliteEdata<'a> {
    pub epc: u8,
    pub pdc: u8,
    pub edt: &'a [u8],
}

impl<'a> EchonetliteEdata<'a> {
    /// Get要求用(EDTなし)
    pub fn request(epc: u8) -> Self {
        EchonetliteEdata {
            epc,
            ..Default::default()
        }
    }

    pub fn show(&self, opt_unit: Option<&SM::UnitForCumlativeAmountsPower>) -> String {
        if let Ok(a) = SM::Properties::try_from(self) {
            a.show(opt_unit)
        } else {
            format!(
                "UNKNOWN EPC:0x{:02X}, EDT:[{}]",
                self.epc,
                self.edt
                    .iter()
                    .map(|x| format!("0x{:02X}", x))
                    .collect::<Vec<String>>()
                    .join(",")
            )
        }
    }
}

impl<'a, 'de: 'a, Context> bincode::BorrowDecode<'de, Context> for EchonetliteEdata<'a> {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let epc: u8 = bincode::BorrowDecode::borrow_decode(decoder)?;
        let pdc: u8 = bincode::BorrowDecode::borrow_decode(decoder)?;
        decoder.claim_bytes_read(pdc as usize)?;
        // 残りがPDCより短ければここで失敗する
        let edt = decoder.borrow_reader().take_bytes(pdc as usize)?;
        Ok(Self { epc, pdc, edt })
    }
}

impl<'a> bincode::Encode for EchonetliteEdata<'a> {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.epc, encoder)?;
        bincode::Encode::encode(&self.pdc, encoder)?;
        for v in self.edt {
            bincode::Encode::encode(v, encoder)?;
        }
        Ok(())
    }
}

impl<'a> fmt::Display for EchonetliteEdata<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.show(None))
    }
}

impl<'a> Default for EchonetliteEdata<'a> {
    #[inline]
    fn default() -> Self {
        EchonetliteEdata {
            epc: 0,
            pdc: 0,
            edt: &[],
        }
    }
}

// offsetからNバイト
fn take<const N: usize>(buffer: &[u8], offset: usize) -> Option<[u8; N]> {
    let end = offset.checked_add(N)?;
    buffer.get(offset..end)?.try_into().ok()
}

/// 16ビット符号なし(ビッグエンディアン)
pub fn get_unsigned_short(buffer: &[u8], offset: usize) -> Option<u16> {
    take::<2>(buffer, offset).map(u16::from_be_bytes)
}

/// 16ビット符号あり(ビッグエンディアン)
pub fn get_signed_short(buffer: &[u8], offset: usize) -> Option<i16> {
    take::<2>(buffer, offset).map(i16::from_be_bytes)
}

/// 32ビット符号なし(ビッグエンディアン)
pub fn get_unsigned_long(buffer: &[u8], offset: usize) -> Option<u32> {
    take::<4>(buffer, offset).map(u32::from_be_bytes)
}

/// 32ビット符号あり(ビッグエンディアン)
pub fn get_signed_long(buffer: &[u8], offset: usize) -> Option<i32> {
    take::<4>(buffer, offset).map(i32::from_be_bytes)
}

#[test]
fn test1() {
    let e7 = EchonetliteEdata {
        epc: 0xe7,
        pdc: 4,
        edt: &[1, 2, 3, 4],
    };
    let edata = e7.clone();

    let binary: Vec<u8> = vec![0xe7, 0x04, 0x01, 0x02, 0x03, 0x04];
    let config = crate::echonetlite::bincode_config();
    let encoded = bincode::encode_to_vec(&edata, config).unwrap();
    assert_eq!(encoded, binary);

    let (decoded, _len): (EchonetliteEdata, usize) =
        bincode::borrow_decode_from_slice(&encoded[..], config).unwrap();

    assert_eq!(e7, decoded);

    // PDCより短い
    let truncated: Vec<u8> = vec![0xe7, 0x04, 0x01, 0x02];
    let decoded: Result<(EchonetliteEdata, usize), _> =
        bincode::borrow_decode_from_slice(&truncated[..], config);
    assert!(decoded.is_err());
}

#[test]
fn test2() {
    let buffer = [0x00, 0x00, 0x02, 0x58, 0xff, 0xff, 0xff, 0xfe];
    assert_eq!(get_unsigned_long(&buffer, 0), Some(600));
    assert_eq!(get_signed_long(&buffer, 4), Some(-2));
    assert_eq!(get_unsigned_long(&buffer, 4), Some(0xffff_fffe));
    assert_eq!(get_unsigned_short(&buffer, 2), Some(0x0258));
    assert_eq!(get_signed_short(&buffer, 6), Some(-2));
    // 範囲外
    assert_eq!(get_unsigned_long(&buffer, 5), None);
    assert_eq!(get_signed_short(&buffer, 7), None);
    assert_eq!(get_unsigned_short(&buffer, usize::MAX), None);
}
