// Echonetlite FRAME
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::echonetlite::{EchonetliteEdata, Error, bincode_config};
use core::result;
use std::fmt;

/// ECHONET Lite UDPポート番号
pub const UDP_PORT: u16 = 0x0e1a;
pub const EHD1: u8 = 0x10;
/// 規定電文形式
pub const EHD2_FORMAT1: u8 = 0x81;
/// ヘッダ長(EHD..OPC)
pub const HEADER_LEN: usize = 12;
/// 1電文で受け付けるプロパティ数の上限
pub const MAX_PROPERTIES: usize = 16;

pub type Eoj = [u8; 3];
/// コントローラー
pub const EOJ_CONTROLLER: Eoj = [0x05, 0xff, 0x01];
/// 低圧スマート電力量メータ
pub const EOJ_LOWV_SMART_METER: Eoj = [0x02, 0x88, 0x01];

/// サービスコード
pub mod esv {
    pub const SETI_SNA: u8 = 0x50;
    pub const SETC_SNA: u8 = 0x51;
    pub const GET_SNA: u8 = 0x52;
    pub const INF_SNA: u8 = 0x53;
    pub const GET: u8 = 0x62;
    pub const SET_RES: u8 = 0x71;
    pub const GET_RES: u8 = 0x72;
    pub const INF: u8 = 0x73;
    pub const INFC: u8 = 0x74;
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct EchonetliteFrame<'a> {
    pub ehd: u16,
    pub tid: u16,
    pub seoj: Eoj,
    pub deoj: Eoj,
    pub esv: u8,
    pub opc: u8,
    pub edata: Vec<EchonetliteEdata<'a>>,
}

impl<'a> EchonetliteFrame<'a> {
    pub fn show(&self) -> String {
        match self.esv {
            esv::SETI_SNA => format!("SetI_SNAプロパティ値書き込み要求不可応答 N={}", self.opc),
            esv::SETC_SNA => format!("SetC_SNAプロパティ値書き込み要求不可応答 N={}", self.opc),
            esv::GET_SNA => format!("Get_SNAプロパティ値読み出し不可応答 N={}", self.opc),
            esv::INF_SNA => format!("INF_SNAプロパティ値通知不可応答 N={}", self.opc),
            esv::GET => format!("Getプロパティ値読み出し要求 N={}", self.opc),
            esv::SET_RES => format!("Set_resプロパティ値書き込み応答 N={}", self.opc),
            esv::GET_RES => format!("Get_resプロパティ値読み出し応答 N={}", self.opc),
            esv::INF => format!("INFプロパティ値通知 N={}", self.opc),
            esv::INFC => format!("INFCプロパティ値通知(応答要) N={}", self.opc),
            other => format!("よくわからないESV値 ESV=0x{:02X} N={}", other, self.opc),
        }
    }

    /// 送信元が低圧スマート電力量メータクラスか
    pub fn is_from_smart_meter(&self) -> bool {
        self.seoj[..2] == EOJ_LOWV_SMART_METER[..2]
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(bincode::encode_to_vec(self, bincode_config())?)
    }
}

/// プロパティ値読み出し要求(Get)電文を組み立てる
///
/// outに入りきらない分は書かない。戻り値は電文全体の長さなので、
/// outより長ければ切り詰められたとわかる。
pub fn encode_property_get(
    out: &mut [u8],
    seoj: Eoj,
    deoj: Eoj,
    epcs: &[u8],
) -> Result<usize, Error> {
    let epcs = &epcs[..epcs.len().min(u8::MAX as usize)];
    let frame = EchonetliteFrame {
        seoj,
        deoj,
        esv: esv::GET,
        opc: epcs.len() as u8,
        edata: epcs.iter().copied().map(EchonetliteEdata::request).collect(),
        ..Default::default()
    };
    let encoded = frame.encode()?;
    let n = encoded.len().min(out.len());
    out[..n].copy_from_slice(&encoded[..n]);
    Ok(encoded.len())
}

/// 受信電文を解析する
///
/// プロパティ値(EDT)は引数のバッファを借用する。
pub fn decode_packet(data: &[u8]) -> Result<EchonetliteFrame<'_>, Error> {
    if data.len() < HEADER_LEN {
        return Err(Error::TooShort(data.len()));
    }
    if data[0] != EHD1 || data[1] != EHD2_FORMAT1 {
        return Err(Error::UnsupportedFormat(data[0], data[1]));
    }
    let (frame, _len): (EchonetliteFrame, usize) =
        bincode::borrow_decode_from_slice(data, bincode_config())?;
    Ok(frame)
}

impl<'de, Context> bincode::BorrowDecode<'de, Context> for EchonetliteFrame<'de> {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let ehd: u16 = bincode::BorrowDecode::borrow_decode(decoder)?;
        let tid: u16 = bincode::BorrowDecode::borrow_decode(decoder)?;
        let seoj: Eoj = bincode::BorrowDecode::borrow_decode(decoder)?;
        let deoj: Eoj = bincode::BorrowDecode::borrow_decode(decoder)?;
        let esv: u8 = bincode::BorrowDecode::borrow_decode(decoder)?;
        let opc: u8 = bincode::BorrowDecode::borrow_decode(decoder)?;
        if opc as usize > MAX_PROPERTIES {
            return Err(bincode::error::DecodeError::Other("too many properties"));
        }
        let mut edata: Vec<EchonetliteEdata> = Vec::with_capacity(opc as usize);
        for _idx in 0..opc {
            edata.push(bincode::BorrowDecode::borrow_decode(decoder)?);
        }
        Ok(Self {
            ehd,
            tid,
            seoj,
            deoj,
            esv,
            opc,
            edata,
        })
    }
}

impl<'a> bincode::Encode for EchonetliteFrame<'a> {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.ehd, encoder)?;
        bincode::Encode::encode(&self.tid, encoder)?;
        bincode::Encode::encode(&self.seoj, encoder)?;
        bincode::Encode::encode(&self.deoj, encoder)?;
        bincode::Encode::encode(&self.esv, encoder)?;
        bincode::Encode::encode(&self.opc, encoder)?;
        for v in &self.edata {
            bincode::Encode::encode(v, encoder)?;
        }
        Ok(())
    }
}

impl<'a> fmt::Display for EchonetliteFrame<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.show())
    }
}

impl<'a> Default for EchonetliteFrame<'a> {
    #[inline]
    fn default() -> Self {
        EchonetliteFrame {
            ehd: u16::from_be_bytes([EHD1, EHD2_FORMAT1]),
            tid: 0,
            seoj: [0, 0, 0],
            deoj: [0, 0, 0],
            esv: 0,
            opc: 0,
            edata: vec![],
        }
    }
}

#[test]
fn test1() {
    let frame = EchonetliteFrame {
        ehd: 0x1081,
        tid: 0x1234,
        seoj: EOJ_CONTROLLER,
        deoj: EOJ_LOWV_SMART_METER,
        esv: esv::GET,
        opc: 0x01,
        edata: vec![EchonetliteEdata::request(0xe7)],
    };

    let binary: Vec<u8> = vec![
        0x10, 0x81, //
        0x12, 0x34, //
        0x05, 0xff, 0x01, //
        0x02, 0x88, 0x01, //
        0x62, //
        0x01, //
        0xe7, 0x00, //
    ];
    let encoded = frame.encode().unwrap();
    assert_eq!(encoded.len(), 14);
    assert_eq!(encoded, binary);

    let decoded = decode_packet(&encoded).unwrap();
    assert_eq!(frame, decoded);
}

#[test]
fn test2() {
    // 係数と単位の読み出し要求
    let mut out = [0u8; 64];
    let len = encode_property_get(
        &mut out,
        EOJ_CONTROLLER,
        EOJ_LOWV_SMART_METER,
        &[0xd3, 0xe1],
    )
    .unwrap();
    assert_eq!(len, 16);
    assert_eq!(
        &out[..len],
        &[
            0x10, 0x81, 0x00, 0x00, 0x05, 0xff, 0x01, 0x02, 0x88, 0x01, 0x62, 0x02, 0xd3, 0x00,
            0xe1, 0x00
        ]
    );
    assert!(out[len..].iter().all(|&b| b == 0));

    // 入りきらない
    let mut small = [0u8; 10];
    let len = encode_property_get(
        &mut small,
        EOJ_CONTROLLER,
        EOJ_LOWV_SMART_METER,
        &[0xd3, 0xe1],
    )
    .unwrap();
    assert_eq!(len, 16);
    assert_eq!(&small, &out[..10]);
}

#[test]
fn test3() {
    // Get_res 瞬時電力計測値 600W
    let packet: Vec<u8> = vec![
        0x10, 0x81, 0x00, 0x01, 0x02, 0x88, 0x01, 0x05, 0xff, 0x01, 0x72, 0x01, 0xe7, 0x04,
        0x00, 0x00, 0x02, 0x58,
    ];
    let frame = decode_packet(&packet).unwrap();
    assert_eq!(frame.tid, 1);
    assert_eq!(frame.esv, esv::GET_RES);
    assert!(frame.is_from_smart_meter());
    assert_eq!(frame.edata.len(), 1);
    assert_eq!(frame.edata[0].epc, 0xe7);
    assert_eq!(frame.edata[0].edt, &[0x00, 0x00, 0x02, 0x58]);

    // 短すぎる
    assert!(matches!(
        decode_packet(&packet[..11]),
        Err(Error::TooShort(11))
    ));
    // 形式2
    let mut format2 = packet.clone();
    format2[1] = 0x82;
    assert!(matches!(
        decode_packet(&format2),
        Err(Error::UnsupportedFormat(0x10, 0x82))
    ));
    // PDCが残りより長い
    assert!(matches!(
        decode_packet(&packet[..packet.len() - 1]),
        Err(Error::Decode(_))
    ));
    // OPCの数だけプロパティがない
    let mut opc = packet.clone();
    opc[11] = 2;
    assert!(matches!(decode_packet(&opc), Err(Error::Decode(_))));
    // 上限を超える
    let mut opc = packet.clone();
    opc[11] = (MAX_PROPERTIES + 1) as u8;
    assert!(matches!(decode_packet(&opc), Err(Error::Decode(_))));
}
