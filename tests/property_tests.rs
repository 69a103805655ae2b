// 任意の入力に対する性質
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use proptest::prelude::*;
use wisun_broute::echonetlite::{
    EOJ_CONTROLLER, EOJ_LOWV_SMART_METER, HEADER_LEN, MAX_PROPERTIES, decode_packet,
    encode_property_get,
};
use wisun_broute::hex;
use wisun_broute::skstack::{SkRxD, parser};

const METER_ADDR: &str = "FE80:0000:0000:0000:021D:1290:0003:C890";
const SELF_ADDR: &str = "FE80:0000:0000:0000:021D:1290:1234:5678";

/// EPCの並び(0x80..=0xFF)
fn epc_list() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0x80u8..=0xff, 0..=MAX_PROPERTIES)
}

/// EHDだけ正しいヘッダ(TID, SEOJ, DEOJ, ESVは任意)
fn header(opc: u8) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 9).prop_map(move |middle| {
        let mut packet = vec![0x10, 0x81];
        packet.extend_from_slice(&middle);
        packet.push(opc);
        packet
    })
}

/// プロパティ(EPC, EDT)の並び
fn properties(max: usize) -> impl Strategy<Value = Vec<(u8, Vec<u8>)>> {
    prop::collection::vec(
        (any::<u8>(), prop::collection::vec(any::<u8>(), 0..8)),
        0..=max,
    )
}

/// 受け取ったEDTは入力の一部を指している
fn borrows_from(input: &[u8], edt: &[u8]) -> bool {
    let range = input.as_ptr_range();
    let start = edt.as_ptr();
    let end = start.wrapping_add(edt.len());
    edt.is_empty() || (range.start <= start && end <= range.end)
}

proptest! {
    /// 大文字小文字が混ざった16進数でも読めて、大文字で書き戻る
    #[test]
    fn prop_hex_mixed_case(text in "([0-9a-fA-F]{2}){0,64}") {
        let mut out = vec![0u8; text.len() / 2];
        prop_assert_eq!(hex::hex2bin(&text, &mut out), Some(text.len() / 2));
        prop_assert_eq!(hex::bin2hex(&out), text.to_ascii_uppercase());
    }

    /// 奇数長は失敗する
    #[test]
    fn prop_hex_odd_length(text in "[0-9a-fA-F]([0-9a-fA-F]{2}){0,32}") {
        let mut out = [0u8; 64];
        prop_assert_eq!(hex::hex2bin(&text, &mut out), None);
    }

    /// プロパティ部分がでたらめでもパニックせず、成功したら入力を借用している
    #[test]
    fn prop_decode_packet_arbitrary_body(
        packet in (0u8..=(MAX_PROPERTIES as u8 + 4)).prop_flat_map(|opc| {
            (header(opc), prop::collection::vec(any::<u8>(), 0..96))
        }).prop_map(|(mut head, tail)| {
            head.extend_from_slice(&tail);
            head
        })
    ) {
        let opc = packet[HEADER_LEN - 1] as usize;
        match decode_packet(&packet) {
            Ok(frame) => {
                prop_assert!(opc <= MAX_PROPERTIES);
                prop_assert_eq!(frame.opc as usize, opc);
                prop_assert_eq!(frame.edata.len(), opc);
                for edata in &frame.edata {
                    prop_assert_eq!(edata.edt.len(), edata.pdc as usize);
                    prop_assert!(borrows_from(&packet, edata.edt));
                }
            }
            // プロパティが無ければ必ず読める
            Err(_) => prop_assert!(opc > 0),
        }
    }

    /// 正しく組み立てた電文は最後のプロパティまで読める
    #[test]
    fn prop_decode_packet_well_formed(props in properties(MAX_PROPERTIES)) {
        let mut packet = vec![
            0x10, 0x81, 0x00, 0x01, 0x02, 0x88, 0x01, 0x05, 0xff, 0x01, 0x72,
            props.len() as u8,
        ];
        for (epc, edt) in &props {
            packet.push(*epc);
            packet.push(edt.len() as u8);
            packet.extend_from_slice(edt);
        }
        let frame = decode_packet(&packet).unwrap();
        prop_assert_eq!(frame.edata.len(), props.len());
        for (edata, (epc, edt)) in frame.edata.iter().zip(&props) {
            prop_assert_eq!(edata.epc, *epc);
            prop_assert_eq!(edata.edt, edt.as_slice());
            prop_assert!(borrows_from(&packet, edata.edt));
        }
        // 末尾が1バイト欠けると失敗
        if !props.is_empty() {
            prop_assert!(decode_packet(&packet[..packet.len() - 1]).is_err());
        }
    }

    /// 上限を超えるプロパティ数は受け付けない
    #[test]
    fn prop_decode_packet_too_many(
        opc in (MAX_PROPERTIES as u8 + 1)..=u8::MAX,
        tail in prop::collection::vec(Just(0u8), 0..600),
    ) {
        let mut packet = vec![0x10, 0x81, 0x00, 0x01, 0x02, 0x88, 0x01, 0x05, 0xff, 0x01, 0x72, opc];
        packet.extend_from_slice(&tail);
        prop_assert!(decode_packet(&packet).is_err());
    }

    /// 組み立てた読み出し要求はそのまま解析できる
    #[test]
    fn prop_property_get_decodes(epcs in epc_list()) {
        let mut out = [0u8; 64];
        let len = encode_property_get(&mut out, EOJ_CONTROLLER, EOJ_LOWV_SMART_METER, &epcs).unwrap();
        prop_assert_eq!(len, HEADER_LEN + 2 * epcs.len());
        let frame = decode_packet(&out[..len]).unwrap();
        prop_assert_eq!(frame.seoj, EOJ_CONTROLLER);
        prop_assert_eq!(frame.deoj, EOJ_LOWV_SMART_METER);
        let decoded: Vec<u8> = frame.edata.iter().map(|e| e.epc).collect();
        prop_assert_eq!(decoded, epcs);
        prop_assert!(frame.edata.iter().all(|e| e.pdc == 0 && e.edt.is_empty()));
    }

    /// 出力先が短くても全体の長さを返して、入る分だけ書く
    #[test]
    fn prop_property_get_truncates(epcs in epc_list(), capacity in 0usize..48) {
        let mut full = [0u8; 64];
        let len = encode_property_get(&mut full, EOJ_CONTROLLER, EOJ_LOWV_SMART_METER, &epcs).unwrap();
        let mut out = vec![0u8; capacity];
        let truncated = encode_property_get(&mut out, EOJ_CONTROLLER, EOJ_LOWV_SMART_METER, &epcs).unwrap();
        prop_assert_eq!(truncated, len);
        let n = len.min(capacity);
        prop_assert_eq!(&out[..n], &full[..n]);
    }

    /// ERXUDP行はヘッダの長さと実際のデータ長が一致したときだけデータを取り出せる
    #[test]
    fn prop_erxudp_payload_length(
        data in prop::collection::vec(any::<u8>(), 0..300),
        declared in prop_oneof![Just(None), (0u16..300).prop_map(Some)],
        secured in any::<bool>(),
    ) {
        let datalen = declared.unwrap_or(data.len() as u16);
        let line = format!(
            "ERXUDP {METER_ADDR} {SELF_ADDR} 0E1A 0E1A 001D129000123456 {} {:04X} {}",
            u8::from(secured),
            datalen,
            hex::bin2hex(&data)
        );
        let SkRxD::Erxudp(remain) = parser::parse_rxd(&line) else {
            return Err(TestCaseError::fail("not ERXUDP"));
        };
        let (_, erxudp) = parser::rx_erxudp(&remain).unwrap();
        prop_assert_eq!(erxudp.datalen, datalen);
        prop_assert_eq!(erxudp.secured, secured);
        prop_assert_eq!(erxudp.sender_port, 0x0e1a);
        prop_assert_eq!(erxudp.sender.to_string(), "fe80::21d:1290:3:c890");

        let mut out = [0u8; 255];
        let payload = erxudp.payload(&remain, &mut out);
        if datalen as usize == data.len() && data.len() <= out.len() {
            prop_assert_eq!(payload, Some(data.len()));
            prop_assert_eq!(&out[..data.len()], data.as_slice());
        } else {
            prop_assert_eq!(payload, None);
        }
    }

    /// 受信行の分類はパニックしない
    #[test]
    fn prop_parse_rxd_never_panics(line in "[ -~]{0,120}") {
        let _ = parser::parse_rxd(&line);
        if let Ok((_, erxudp)) = parser::rx_erxudp(&line) {
            let mut out = [0u8; 255];
            let _ = erxudp.payload(&line, &mut out);
        }
    }
}
