// シリアル通信 送受信
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::hex;
use crate::skstack::{Clock, Error, SkRxD, Transport, elapsed_ms, parser};

/// コマンドのエコーバック
const ECHO_PREFIX: &str = "SK";

/// 1行の上限(ERXUDPで最大のデータを受信しても収まる長さ)
const MAX_LINE_LENGTH: usize = 1024;

/// SKSTACK/IPの行プロトコル
pub struct SkStack<T: Transport, C: Clock> {
    transport: T,
    clock: C,
    // CRを受信するまでの行
    pending: String,
    // 長すぎる行をCRまで読み捨てている
    discarding: bool,
}

impl<T: Transport, C: Clock> SkStack<T, C> {
    pub fn new(transport: T, clock: C) -> Self {
        Self {
            transport,
            clock,
            pending: String::with_capacity(MAX_LINE_LENGTH),
            discarding: false,
        }
    }

    pub fn now_ms(&self) -> u32 {
        self.clock.now_ms()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn write(&mut self, command: &[u8]) -> Result<(), Error> {
        let s = command
            .iter()
            .map(|n| *n as char)
            .filter(|n| n.is_ascii())
            .collect::<String>();
        tracing::trace!(target:"Tx->","{}", s.escape_debug());
        self.transport.write(command).map_err(Error::from)
    }

    fn command_line(command: &str, args: &[String]) -> String {
        let mut line = String::from(command);
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// SKコマンドを送信する(CRLF終端)
    pub fn send_sk(&mut self, command: &str, args: &[String]) -> Result<(), Error> {
        let line = Self::command_line(command, args) + "\r\n";
        self.write(line.as_bytes())
    }

    /// 製品/試験用コマンドを送信する(CR終端)
    ///
    /// ROPT, WOPTはCRLFで送ると受け付けない。
    pub fn send_prod(&mut self, command: &str, args: &[String]) -> Result<(), Error> {
        let line = Self::command_line(command, args) + "\r";
        self.write(line.as_bytes())
    }

    /// バイナリデータ付きのSKコマンドを送信する(終端なし)
    pub fn send_sk_with_data(
        &mut self,
        command: &str,
        args: &[String],
        data: &[u8],
    ) -> Result<(), Error> {
        let head = Self::command_line(command, args) + " ";
        tracing::trace!(target:"Tx->","{}{}", head.escape_debug(), hex::bin2hex(data));
        let command = [head.as_bytes(), data].concat();
        self.transport.write(&command).map_err(Error::from)
    }

    /// 1行受信する
    ///
    /// 何も受信していなければ直ちにNoneを返す。
    /// 受信途中でタイムアウトした場合もNoneを返すが、途中までの行は保持していて
    /// 次回の呼び出しでCRを受信したときに1行になる。
    pub fn read_line(&mut self, timeout_ms: u32) -> Option<String> {
        let started = self.clock.now_ms();
        loop {
            match self.transport.read() {
                Some(b'\r') if self.discarding => {
                    self.discarding = false;
                    return None;
                }
                Some(b'\r') => {
                    let line = std::mem::take(&mut self.pending);
                    tracing::trace!(target:"<-Rx","{}", line.escape_debug());
                    return if line.is_empty() { None } else { Some(line) };
                }
                Some(b'\n') => {}
                Some(_) if self.discarding => {}
                Some(c) => {
                    if self.pending.len() >= MAX_LINE_LENGTH {
                        tracing::warn!("line too long, dropped {} bytes", self.pending.len());
                        self.pending.clear();
                        self.discarding = true;
                    } else {
                        self.pending.push(c as char);
                    }
                }
                None if self.pending.is_empty() => return None,
                None => self.clock.delay_ms(1),
            }
            if elapsed_ms(self.clock.now_ms(), started) >= timeout_ms {
                return None;
            }
        }
    }

    /// 受信した行を分類して返す
    ///
    /// コマンドのエコーバックは読み捨てて、残り時間で次の行を待つ。
    pub fn get_event(&mut self, timeout_ms: u32) -> SkRxD {
        let mut remain = timeout_ms;
        while remain > 0 {
            let started = self.clock.now_ms();
            let Some(line) = self.read_line(remain) else {
                return SkRxD::Void;
            };
            if line.starts_with(ECHO_PREFIX) {
                let elapsed = elapsed_ms(self.clock.now_ms(), started);
                if remain > elapsed {
                    remain -= elapsed;
                    continue;
                }
                return SkRxD::Void;
            }
            return parser::parse_rxd(&line);
        }
        SkRxD::Void
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use crate::skstack::{Clock, Transport};
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::io;

    #[derive(Default)]
    pub struct Loopback {
        pub rx: VecDeque<u8>,
        pub tx: Vec<u8>,
    }

    impl Transport for Loopback {
        fn read(&mut self) -> Option<u8> {
            self.rx.pop_front()
        }
        fn write(&mut self, data: &[u8]) -> io::Result<()> {
            self.tx.extend_from_slice(data);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct ManualClock(pub Cell<u32>);

    impl Clock for ManualClock {
        fn now_ms(&self) -> u32 {
            self.0.get()
        }
        fn delay_ms(&self, ms: u32) {
            self.0.set(self.0.get().wrapping_add(ms));
        }
    }
}

#[cfg(test)]
fn loopback(rx: &str) -> SkStack<fake::Loopback, fake::ManualClock> {
    let transport = fake::Loopback {
        rx: rx.bytes().collect(),
        tx: Vec::new(),
    };
    SkStack::new(transport, fake::ManualClock::default())
}

#[test]
fn test1() {
    let mut sk = loopback("");
    sk.send_sk("SKSREG", &["SFE".to_owned(), "0".to_owned()])
        .unwrap();
    sk.send_prod("WOPT", &["01".to_owned()]).unwrap();
    sk.send_sk("SKVER", &[]).unwrap();
    assert_eq!(sk.transport().tx, b"SKSREG SFE 0\r\nWOPT 01\rSKVER\r\n");
}

#[test]
fn test2() {
    let mut sk = loopback("");
    sk.send_sk_with_data("SKSENDTO", &["1".to_owned(), "000E".to_owned()], &[0x10, 0x81])
        .unwrap();
    assert_eq!(sk.transport().tx, b"SKSENDTO 1 000E \x10\x81");
}

#[test]
fn test3() {
    let mut sk = loopback("\nEVER 1.2.3\r\n\r\nOK\r\n");
    assert_eq!(sk.read_line(100), Some("EVER 1.2.3".to_owned()));
    // 空行
    assert_eq!(sk.read_line(100), None);
    assert_eq!(sk.read_line(100), Some("OK".to_owned()));
    // 何も受信していなければ即座に戻る
    assert_eq!(sk.read_line(100), None);
    assert_eq!(sk.clock().now_ms(), 0);
}

#[test]
fn test4() {
    let mut sk = loopback("EVENT 2");
    // 受信途中でタイムアウト
    assert_eq!(sk.read_line(100), None);
    assert!(sk.clock().now_ms() >= 100);
    // 続きを受信すると1行になる
    sk.transport_mut().rx.extend(b"5 FE80:0000:0000:0000:0000:0000:0000:0001\r\n");
    assert_eq!(
        sk.read_line(100),
        Some("EVENT 25 FE80:0000:0000:0000:0000:0000:0000:0001".to_owned())
    );
}

#[test]
fn test5() {
    // エコーバックは読み捨てる
    let mut sk = loopback("SKVER\r\nEVER 1.2.3\r\n");
    assert_eq!(sk.get_event(100), SkRxD::Ever("1.2.3".to_owned()));
    let mut sk = loopback("SKSREG SFE 0\r\n");
    assert_eq!(sk.get_event(100), SkRxD::Void);
    let mut sk = loopback("   Addr:0011223344556677\r\n");
    assert_eq!(
        sk.get_event(100),
        SkRxD::Unknown("   Addr:0011223344556677".to_owned())
    );
    assert_eq!(sk.get_event(0), SkRxD::Void);
}

#[test]
fn test6() {
    // 長すぎる行はCRまで丸ごと捨てる
    let rx = format!("{}\r\nOK\r\n", "A".repeat(MAX_LINE_LENGTH + 100));
    let mut sk = loopback(&rx);
    assert_eq!(sk.read_line(100), None);
    assert_eq!(sk.read_line(100), Some("OK".to_owned()));
    // 上限ちょうどは1行になる
    let rx = format!("{}\r\n", "B".repeat(MAX_LINE_LENGTH));
    let mut sk = loopback(&rx);
    assert_eq!(sk.read_line(100), Some("B".repeat(MAX_LINE_LENGTH)));
}
