// シリアル通信路と時計
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use serialport::SerialPort;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

/// バイト単位の通信路
pub trait Transport {
    /// 1バイト読む。読めるデータがなければ直ちにNoneを返す(待たない)
    fn read(&mut self) -> Option<u8>;
    /// 書き込む
    fn write(&mut self, data: &[u8]) -> io::Result<()>;
}

/// 単調増加するミリ秒時計
///
/// 32ビットで一周するので経過時間は`wrapping_sub`で求めること。
pub trait Clock {
    fn now_ms(&self) -> u32;
    /// 他に処理を譲って少し待つ
    fn delay_ms(&self, ms: u32);
}

/// 経過時間(ミリ秒)
#[inline]
pub fn elapsed_ms(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// serialportクレートのポートをTransportにする
pub struct SerialPortTransport {
    port: Box<dyn SerialPort>,
    buffer: VecDeque<u8>,
}

impl SerialPortTransport {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            port,
            buffer: VecDeque::with_capacity(256),
        }
    }

    // 受信済みのデータをバッファに移す
    fn fill(&mut self) -> io::Result<()> {
        let available = self.port.bytes_to_read()? as usize;
        if available > 0 {
            let mut chunk = vec![0u8; available];
            let n = self.port.read(&mut chunk)?;
            self.buffer.extend(&chunk[..n]);
        }
        Ok(())
    }
}

impl Transport for SerialPortTransport {
    fn read(&mut self) -> Option<u8> {
        if self.buffer.is_empty() {
            if let Err(e) = self.fill() {
                match e.kind() {
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {}
                    _ => tracing::error!("serial port read failed: {e}"),
                }
                return None;
            }
        }
        self.buffer.pop_front()
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }
}

/// プロセス起動からの経過時間を返す時計
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        // 49.7日で一周する
        self.origin.elapsed().as_millis() as u32
    }

    fn delay_ms(&self, ms: u32) {
        thread::sleep(Duration::from_millis(ms as u64));
    }
}

#[test]
fn test1() {
    assert_eq!(elapsed_ms(1_500, 1_000), 500);
    // 一周しても経過時間は正しい
    assert_eq!(elapsed_ms(100, u32::MAX - 99), 200);
}

#[test]
fn test2() {
    let clock = SystemClock::new();
    let t0 = clock.now_ms();
    clock.delay_ms(2);
    assert!(elapsed_ms(clock.now_ms(), t0) >= 2);
}
