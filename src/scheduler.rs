// 名前付きタイマー
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::skstack::elapsed_ms;
use std::collections::BTreeMap;
use std::fmt;

/// タスク
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum TaskId {
    /// 係数と積算電力量単位の要求(再送)
    EnergyParams,
    /// 瞬時電力計測値の要求(再送)
    PowerRequest,
    /// 積算電力量計測値の要求(再送)
    EnergyRequest,
    /// 瞬時電力計測値の定期要求
    PowerPoll,
    /// 積算電力量計測値の定期要求
    EnergyPoll,
}

impl TaskId {
    pub const ALL: [TaskId; 5] = [
        TaskId::EnergyParams,
        TaskId::PowerRequest,
        TaskId::EnergyRequest,
        TaskId::PowerPoll,
        TaskId::EnergyPoll,
    ];
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            TaskId::EnergyParams => "energy_params",
            TaskId::PowerRequest => "power_request",
            TaskId::EnergyRequest => "energy_request",
            TaskId::PowerPoll => "power_poll",
            TaskId::EnergyPoll => "energy_poll",
        };
        write!(f, "{}", name)
    }
}

/// 予約と取り消し
///
/// 同じTaskIdで予約し直すと前の予約は置き換わる。
pub trait Scheduler {
    /// delay_ms後に1回
    fn set_timeout(&mut self, id: TaskId, now: u32, delay_ms: u32);
    /// interval_msごと(0は予約しない)
    fn set_interval(&mut self, id: TaskId, now: u32, interval_ms: u32);
    /// 予約があれば取り消してtrue
    fn cancel(&mut self, id: TaskId) -> bool;
    fn is_scheduled(&self, id: TaskId) -> bool;
    /// 時刻が来たタスクを取り出す
    fn take_due(&mut self, now: u32) -> Vec<TaskId>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Timer {
    start: u32,
    delay: u32,
    repeat: bool,
}

/// BTreeMapで持つScheduler
#[derive(Debug, Default)]
pub struct TimerTable {
    timers: BTreeMap<TaskId, Timer>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Scheduler for TimerTable {
    fn set_timeout(&mut self, id: TaskId, now: u32, delay_ms: u32) {
        tracing::trace!("set_timeout {} {}ms", id, delay_ms);
        self.timers.insert(
            id,
            Timer {
                start: now,
                delay: delay_ms,
                repeat: false,
            },
        );
    }

    fn set_interval(&mut self, id: TaskId, now: u32, interval_ms: u32) {
        if interval_ms == 0 {
            self.cancel(id);
            return;
        }
        tracing::trace!("set_interval {} {}ms", id, interval_ms);
        self.timers.insert(
            id,
            Timer {
                start: now,
                delay: interval_ms,
                repeat: true,
            },
        );
    }

    fn cancel(&mut self, id: TaskId) -> bool {
        let canceled = self.timers.remove(&id).is_some();
        if canceled {
            tracing::trace!("cancel {}", id);
        }
        canceled
    }

    fn is_scheduled(&self, id: TaskId) -> bool {
        self.timers.contains_key(&id)
    }

    fn take_due(&mut self, now: u32) -> Vec<TaskId> {
        let due: Vec<TaskId> = self
            .timers
            .iter()
            .filter(|(_, t)| elapsed_ms(now, t.start) >= t.delay)
            .map(|(id, _)| *id)
            .collect();
        for id in &due {
            if let Some(timer) = self.timers.get_mut(id) {
                if timer.repeat {
                    timer.start = now;
                } else {
                    self.timers.remove(id);
                }
            }
        }
        due
    }
}

#[test]
fn test1() {
    let mut table = TimerTable::new();
    table.set_timeout(TaskId::PowerRequest, 0, 2000);
    table.set_interval(TaskId::PowerPoll, 0, 30_000);
    assert_eq!(table.take_due(1999), Vec::<TaskId>::new());
    assert_eq!(table.take_due(2000), vec![TaskId::PowerRequest]);
    // 1回きり
    assert!(!table.is_scheduled(TaskId::PowerRequest));
    assert_eq!(table.take_due(2500), Vec::<TaskId>::new());

    // 繰り返し
    assert_eq!(table.take_due(30_000), vec![TaskId::PowerPoll]);
    assert!(table.is_scheduled(TaskId::PowerPoll));
    assert_eq!(table.take_due(59_999), Vec::<TaskId>::new());
    assert_eq!(table.take_due(60_000), vec![TaskId::PowerPoll]);

    // 置き換え
    table.set_timeout(TaskId::EnergyParams, 60_000, 2000);
    table.set_timeout(TaskId::EnergyParams, 61_000, 5000);
    assert!(table.is_scheduled(TaskId::EnergyParams));
    assert!(table.is_scheduled(TaskId::PowerPoll));
    assert_eq!(table.take_due(63_000), Vec::<TaskId>::new());
    assert_eq!(table.take_due(66_000), vec![TaskId::EnergyParams]);

    assert!(table.cancel(TaskId::PowerPoll));
    assert!(!table.cancel(TaskId::PowerPoll));
    assert!(table.is_empty());

    // 間隔0は予約しない
    table.set_interval(TaskId::EnergyPoll, 0, 0);
    assert!(!table.is_scheduled(TaskId::EnergyPoll));
}

#[test]
fn test2() {
    // 時計の桁あふれ
    let mut table = TimerTable::new();
    let start = u32::MAX - 1000;
    table.set_timeout(TaskId::EnergyRequest, start, 5000);
    assert_eq!(table.take_due(start.wrapping_add(4999)), Vec::<TaskId>::new());
    assert_eq!(
        table.take_due(start.wrapping_add(5000)),
        vec![TaskId::EnergyRequest]
    );
}
