// 計測値の出力先
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use chrono::{DateTime, Local, SecondsFormat};
use serde::Serialize;
use std::io::Write;

pub trait SensorSink {
    /// 計測値を出力する
    fn publish_state(&mut self, value: f64);
    /// 表示桁数(小数点以下)
    fn set_accuracy_decimals(&mut self, decimals: u8);
}

#[derive(Debug, Serialize)]
struct Reading<'a> {
    sensor: &'a str,
    value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    accuracy_decimals: Option<u8>,
    recorded_at: String,
}

/// 1計測値1行のJSONで書き出す
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    name: String,
    accuracy_decimals: Option<u8>,
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(name: &str, writer: W) -> Self {
        Self {
            name: name.to_owned(),
            accuracy_decimals: None,
            writer,
        }
    }

    pub fn accuracy_decimals(&self) -> Option<u8> {
        self.accuracy_decimals
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_reading(&mut self, value: f64, recorded_at: DateTime<Local>) -> anyhow::Result<()> {
        let value = match self.accuracy_decimals {
            Some(n) => {
                let scale = 10f64.powi(i32::from(n));
                (value * scale).round() / scale
            }
            None => value,
        };
        let reading = Reading {
            sensor: &self.name,
            value,
            accuracy_decimals: self.accuracy_decimals,
            recorded_at: recorded_at.to_rfc3339_opts(SecondsFormat::Secs, false),
        };
        serde_json::to_writer(&mut self.writer, &reading)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write> SensorSink for JsonLinesSink<W> {
    fn publish_state(&mut self, value: f64) {
        tracing::info!("{}: {}", self.name, value);
        if let Err(e) = self.write_reading(value, Local::now()) {
            tracing::error!("{} write failed: {:?}", self.name, e);
        }
    }

    fn set_accuracy_decimals(&mut self, decimals: u8) {
        tracing::debug!("{} accuracy_decimals={}", self.name, decimals);
        self.accuracy_decimals = Some(decimals);
    }
}

#[test]
fn test1() {
    let mut sink = JsonLinesSink::new("power", Vec::<u8>::new());
    sink.publish_state(600.0);
    sink.set_accuracy_decimals(1);
    sink.publish_state(12345.6789);
    assert_eq!(sink.accuracy_decimals(), Some(1));

    let written = String::from_utf8(sink.into_inner()).unwrap();
    let lines: Vec<serde_json::Value> = written
        .lines()
        .map(|s| serde_json::from_str(s).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["sensor"], "power");
    assert_eq!(lines[0]["value"], 600.0);
    assert!(lines[0].get("accuracy_decimals").is_none());
    assert!(
        DateTime::parse_from_rfc3339(lines[0]["recorded_at"].as_str().unwrap()).is_ok()
    );
    assert_eq!(lines[1]["value"], 12345.7);
    assert_eq!(lines[1]["accuracy_decimals"], 1);
}
