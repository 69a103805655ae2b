// 計測データ受信の監視
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::skstack::elapsed_ms;

/// 最後に計測データを受信してからの時間を見る
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watchdog {
    timeout: u32,
    since: u32,
}

impl Watchdog {
    /// timeout_msが0なら監視しない
    pub fn new(timeout_ms: u32, now: u32) -> Self {
        Self {
            timeout: timeout_ms,
            since: now,
        }
    }

    pub fn reset(&mut self, now: u32) {
        self.since = now;
    }

    pub fn is_enabled(&self) -> bool {
        self.timeout != 0
    }

    /// 期限を過ぎていれば経過時間を返す
    pub fn expired(&self, now: u32) -> Option<u32> {
        let elapsed = elapsed_ms(now, self.since);
        (self.is_enabled() && elapsed > self.timeout).then_some(elapsed)
    }
}

/// 再スキャン、再接続、再起動の3段階
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallWatchdogs {
    pub rescan: Watchdog,
    pub rejoin: Watchdog,
    pub restart: Watchdog,
}

impl StallWatchdogs {
    pub fn new(rescan_ms: u32, rejoin_ms: u32, restart_ms: u32, now: u32) -> Self {
        Self {
            rescan: Watchdog::new(rescan_ms, now),
            rejoin: Watchdog::new(rejoin_ms, now),
            restart: Watchdog::new(restart_ms, now),
        }
    }

    /// 計測データを受信した
    pub fn reset_all(&mut self, now: u32) {
        self.rescan.reset(now);
        self.rejoin.reset(now);
        self.restart.reset(now);
    }
}

#[test]
fn test1() {
    let mut wd = StallWatchdogs::new(240_000, 120_000, 360_000, 0);
    assert_eq!(wd.rejoin.expired(120_000), None);
    assert_eq!(wd.rejoin.expired(120_001), Some(120_001));
    assert_eq!(wd.rescan.expired(200_000), None);

    wd.reset_all(100_000);
    assert_eq!(wd.rejoin.expired(220_000), None);
    assert_eq!(wd.restart.expired(460_001), Some(360_001));

    // 0は監視しない
    let off = Watchdog::new(0, 0);
    assert!(!off.is_enabled());
    assert_eq!(off.expired(u32::MAX), None);

    // 時計の桁あふれ
    let mut wrap = Watchdog::new(1_000, u32::MAX - 10);
    assert_eq!(wrap.expired(500), None);
    assert_eq!(wrap.expired(990), Some(1_001));
    wrap.reset(990);
    assert_eq!(wrap.expired(1_990), None);
}
