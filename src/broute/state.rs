// 接続状態
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::skstack::elapsed_ms;
use std::fmt;

/// 初期設定の段階
///
/// 送信済みでOKを待っているコマンド
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    Echo,     // SKSREG SFE 0
    Ropt,     // ROPT
    Wopt,     // WOPT 01
    Password, // SKSETPWD
    Rbid,     // SKSETRBID
    Channel,  // SKSREG S02
    PanId,    // SKSREG S03
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    WaitingVersion,
    ApplyingSettings(Setting),
    Scanning,
    ResolvingAddress,
    Joining,
    Running,
    Restarting,
}

impl State {
    /// この状態にとどまれる時間(0は無制限)
    pub fn deadline_ms(&self) -> u32 {
        match self {
            State::Init => 0,
            State::WaitingVersion => 1_000,
            State::ApplyingSettings(_) => 1_000,
            State::Scanning => 20_000,
            State::ResolvingAddress => 1_000,
            State::Joining => 10_000,
            State::Running => 0,
            State::Restarting => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            State::Init => "init",
            State::WaitingVersion => "ver",
            State::ApplyingSettings(_) => "settings",
            State::Scanning => "scanning",
            State::ResolvingAddress => "addr_conv",
            State::Joining => "joining",
            State::Running => "running",
            State::Restarting => "restarting",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            State::ApplyingSettings(s) => write!(f, "{}({:?})", self.name(), s),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// 現在の状態と、その状態に入った時刻
#[derive(Debug, Clone)]
pub struct Connection {
    state: State,
    started: u32,
}

impl Connection {
    pub fn new(now: u32) -> Self {
        Self {
            state: State::Init,
            started: now,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// 状態を変える
    ///
    /// Restartingに入ったあとは変えない。変えたらtrue
    pub fn set(&mut self, state: State, now: u32) -> bool {
        if self.state == State::Restarting {
            tracing::debug!("restarting, ignored state {}", state);
            return false;
        }
        if self.state != state {
            tracing::info!("state {} -> {}", self.state, state);
        }
        self.state = state;
        self.started = now;
        true
    }

    pub fn elapsed(&self, now: u32) -> u32 {
        elapsed_ms(now, self.started)
    }

    /// 期限切れか
    pub fn is_expired(&self, now: u32) -> bool {
        let deadline = self.state.deadline_ms();
        deadline != 0 && self.elapsed(now) > deadline
    }
}

#[test]
fn test1() {
    let mut conn = Connection::new(0);
    assert_eq!(conn.state(), State::Init);
    assert!(!conn.is_expired(u32::MAX));

    assert!(conn.set(State::WaitingVersion, 100));
    assert!(!conn.is_expired(1_100));
    assert!(conn.is_expired(1_101));

    assert!(conn.set(State::ApplyingSettings(Setting::Echo), 2_000));
    assert_eq!(conn.state().to_string(), "settings(Echo)");
    assert_eq!(conn.elapsed(2_500), 500);

    assert!(conn.set(State::Running, 3_000));
    assert!(!conn.is_expired(1_000_000));

    // 一度入ったら抜けない
    assert!(conn.set(State::Restarting, 4_000));
    assert!(!conn.set(State::Init, 5_000));
    assert_eq!(conn.state(), State::Restarting);
    assert_eq!(conn.elapsed(5_000), 1_000);
}
