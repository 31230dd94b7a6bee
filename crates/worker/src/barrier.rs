use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

use ensemble_dispatcher::CancellationFlag;
use ensemble_domain::{EnsembleError, EnsembleResult, WorkerRole};

#[derive(Debug, Default)]
struct DayState {
    arrived: Vec<WorkerRole>,
    posted: bool,
}

#[derive(Debug, Default)]
struct BarrierState {
    days: BTreeMap<usize, DayState>,
    failed: HashSet<WorkerRole>,
    closed: Option<String>,
}

impl BarrierState {
    fn day(&mut self, index: usize) -> &mut DayState {
        self.days.entry(index).or_default()
    }

    fn closed_error(&self) -> Option<EnsembleError> {
        self.closed.as_ref().map(|reason| EnsembleError::Cancelled(reason.clone()))
    }
}

/// 按天的显式屏障
///
/// 同化步骤等到所有预期角色都写入先验（或已失败）后才读取；
/// 工作线程等到当天后验发布后才继续下一天。
#[derive(Debug)]
pub struct DayBarrier {
    expected: Vec<WorkerRole>,
    state: Mutex<BarrierState>,
    changed: Condvar,
    poll_interval: Duration,
}

impl DayBarrier {
    pub fn new(expected: Vec<WorkerRole>) -> Self {
        Self {
            expected,
            state: Mutex::new(BarrierState::default()),
            changed: Condvar::new(),
            poll_interval: Duration::from_millis(100),
        }
    }

    /// 取消检查的间隔
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn expected(&self) -> &[WorkerRole] {
        &self.expected
    }

    /// 某个角色已写入当天先验
    pub fn arrive_prior(&self, day_index: usize, role: WorkerRole) -> EnsembleResult<()> {
        let mut state = self.state.lock();
        if let Some(err) = state.closed_error() {
            return Err(err);
        }
        let day = state.day(day_index);
        if !day.arrived.contains(&role) {
            day.arrived.push(role);
        }
        debug!(day = day_index, role = %role, "先验到达屏障");
        drop(state);
        self.changed.notify_all();
        Ok(())
    }

    /// 阻塞直到所有预期角色都已到达或失败，返回当天实际写入先验的角色
    pub fn wait_for_priors(
        &self,
        day_index: usize,
        cancel: &CancellationFlag,
    ) -> EnsembleResult<Vec<WorkerRole>> {
        let mut state = self.state.lock();
        loop {
            if let Some(err) = state.closed_error() {
                return Err(err);
            }
            let arrived = state
                .days
                .get(&day_index)
                .map(|d| d.arrived.clone())
                .unwrap_or_default();
            let ready = self
                .expected
                .iter()
                .all(|role| arrived.contains(role) || state.failed.contains(role));
            if ready {
                let present = self
                    .expected
                    .iter()
                    .filter(|role| arrived.contains(role))
                    .copied()
                    .collect();
                return Ok(present);
            }
            if cancel.is_cancelled() {
                return Err(EnsembleError::Cancelled(format!(
                    "等待第 {day_index} 天先验时被取消"
                )));
            }
            self.changed.wait_for(&mut state, self.poll_interval);
        }
    }

    /// 当天后验已写入状态表
    pub fn publish_posterior(&self, day_index: usize) {
        let mut state = self.state.lock();
        state.day(day_index).posted = true;
        // 更早的天不会再被等待
        state.days.retain(|&d, _| d + 1 >= day_index);
        drop(state);
        self.changed.notify_all();
    }

    /// 阻塞直到当天后验发布
    pub fn wait_for_posterior(
        &self,
        day_index: usize,
        cancel: &CancellationFlag,
    ) -> EnsembleResult<()> {
        let mut state = self.state.lock();
        loop {
            if state.days.get(&day_index).is_some_and(|d| d.posted) {
                return Ok(());
            }
            if let Some(err) = state.closed_error() {
                return Err(err);
            }
            if cancel.is_cancelled() {
                return Err(EnsembleError::Cancelled(format!(
                    "等待第 {day_index} 天后验时被取消"
                )));
            }
            self.changed.wait_for(&mut state, self.poll_interval);
        }
    }

    pub fn is_posted(&self, day_index: usize) -> bool {
        self.state
            .lock()
            .days
            .get(&day_index)
            .is_some_and(|d| d.posted)
    }

    /// 角色退出，之后的每一天都不再等待它
    pub fn mark_failed(&self, role: WorkerRole) {
        warn!(role = %role, "工作角色失败，屏障不再等待");
        self.state.lock().failed.insert(role);
        self.changed.notify_all();
    }

    pub fn failed(&self) -> Vec<WorkerRole> {
        let state = self.state.lock();
        self.expected
            .iter()
            .filter(|role| state.failed.contains(role))
            .copied()
            .collect()
    }

    /// 关闭屏障，所有等待者以 `Cancelled` 返回
    pub fn close(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "日屏障已关闭");
        self.state.lock().closed = Some(reason);
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }
}
