use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::cancellation::CancellationFlag;
use crate::job::{JobContext, JobHandle, JobRecord, JobSnapshot, Runnable};
use ensemble_core::{EnsembleError, EnsembleResult, SchedulerConfig};

/// 被选中执行的任务
struct Claim {
    handle: JobHandle,
    runnable: Arc<dyn Runnable>,
    cancel: CancellationFlag,
    name: String,
    kind: &'static str,
}

/// 扁平的任务注册表，覆盖整棵任务树，按插入顺序排列
#[derive(Default)]
struct Registry {
    jobs: IndexMap<JobHandle, JobRecord>,
    internal_errors: Vec<String>,
    /// `stop()` 之后为 true，直到下一次 `start()`
    stopped: bool,
}

impl Registry {
    /// 停止后加入的任务直接标记为已完成并取消，不再等待调度
    fn insert(&mut self, handle: JobHandle, mut record: JobRecord) {
        if self.stopped {
            debug!(job_id = %handle, job = %record.name, "调度器已停止，任务不会运行");
            record.completed = true;
            record.cancel.cancel();
        }
        self.jobs.insert(handle, record);
    }

    fn running_intensive(&self) -> usize {
        self.jobs
            .values()
            .filter(|r| r.running && r.resource_intensive)
            .count()
    }

    /// 按插入顺序选出下一个可运行任务并标记为运行中
    ///
    /// 资源密集型任务达到上限后被跳过，轻量任务仍可启动。
    fn claim_next(&mut self, max_concurrent: usize) -> Option<Claim> {
        let budget_left = max_concurrent.saturating_sub(self.running_intensive());
        let (handle, record) = self
            .jobs
            .iter_mut()
            .find(|(_, r)| r.is_pending() && (!r.resource_intensive || budget_left > 0))?;
        record.running = true;
        Some(Claim {
            handle: *handle,
            runnable: record.runnable.clone(),
            cancel: record.cancel.clone(),
            name: record.name.clone(),
            kind: record.kind,
        })
    }

    /// 选出子树中第一个待运行的任务（先序）
    fn claim_in_subtree(&mut self, root: JobHandle) -> Option<Claim> {
        let handle = self
            .subtree(root)
            .into_iter()
            .find(|h| self.jobs.get(h).is_some_and(JobRecord::is_pending))?;
        let record = self.jobs.get_mut(&handle)?;
        record.running = true;
        Some(Claim {
            handle,
            runnable: record.runnable.clone(),
            cancel: record.cancel.clone(),
            name: record.name.clone(),
            kind: record.kind,
        })
    }

    fn subtree(&self, root: JobHandle) -> Vec<JobHandle> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(handle) = stack.pop() {
            if let Some(record) = self.jobs.get(&handle) {
                out.push(handle);
                stack.extend(record.children.iter().rev().copied());
            }
        }
        out
    }

    /// 任务及其全部后代都已完成；已清理的子任务视为完成
    fn is_complete(&self, handle: JobHandle) -> Option<bool> {
        let record = self.jobs.get(&handle)?;
        Some(
            record.completed
                && record
                    .children
                    .iter()
                    .all(|child| self.is_complete(*child).unwrap_or(true)),
        )
    }

    fn collect_errors(&self, handle: JobHandle, out: &mut Vec<EnsembleError>) {
        let Some(record) = self.jobs.get(&handle) else {
            return;
        };
        if let Some(message) = &record.error {
            out.push(EnsembleError::JobFailure {
                job: record.name.clone(),
                message: message.clone(),
            });
        }
        for child in &record.children {
            self.collect_errors(*child, out);
        }
    }

    fn finish(&mut self, handle: JobHandle, error: Option<String>, elapsed: Duration) {
        if let Some(record) = self.jobs.get_mut(&handle) {
            record.running = false;
            record.completed = true;
            record.elapsed = elapsed;
            if error.is_some() {
                record.error = error;
            }
        }
    }
}

struct SchedulerInner {
    max_concurrent: usize,
    dispatch_interval: Duration,
    registry: Mutex<Registry>,
    changed: Condvar,
    shutdown: AtomicBool,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

/// 层级任务调度器
///
/// 协调线程按固定间隔扫描注册表，为每个被选中的任务启动一个工作线程。
/// 同时运行的资源密集型任务数不超过 `max_concurrent`。
/// 所有注册表读写共用一把锁，任务执行本身不持锁。
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(max_concurrent: usize, dispatch_interval: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                max_concurrent: max_concurrent.max(1),
                dispatch_interval,
                registry: Mutex::new(Registry::default()),
                changed: Condvar::new(),
                shutdown: AtomicBool::new(false),
                coordinator: Mutex::new(None),
            }),
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(
            config.max_concurrent,
            Duration::from_millis(config.dispatch_interval_ms),
        )
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// 注册顶层任务
    pub fn add(&self, job: Arc<dyn Runnable>) -> JobHandle {
        let handle = JobHandle::new();
        let record = JobRecord::new(job, None);
        debug!(job_id = %handle, job = %record.name, "添加任务");
        self.inner.registry.lock().insert(handle, record);
        self.inner.changed.notify_all();
        handle
    }

    /// 在已有任务下注册子任务
    pub fn add_child(&self, parent: JobHandle, job: Arc<dyn Runnable>) -> EnsembleResult<JobHandle> {
        let handle = JobHandle::new();
        {
            let mut registry = self.inner.registry.lock();
            let parent_record = registry
                .jobs
                .get_mut(&parent)
                .ok_or(EnsembleError::JobNotFound { id: parent.0 })?;
            parent_record.children.push(handle);
            let record = JobRecord::new(job, Some(parent));
            debug!(job_id = %handle, parent_id = %parent, job = %record.name, "添加子任务");
            registry.insert(handle, record);
        }
        self.inner.changed.notify_all();
        Ok(handle)
    }

    /// 启动协调线程；`wait` 为 true 时阻塞直到所有任务完成
    pub fn start(&self, wait: bool) -> EnsembleResult<()> {
        {
            let mut coordinator = self.inner.coordinator.lock();
            if coordinator.is_none() {
                self.inner.shutdown.store(false, Ordering::SeqCst);
                self.inner.registry.lock().stopped = false;
                let scheduler = self.clone();
                let handle = thread::Builder::new()
                    .name("ensemble-scheduler".to_string())
                    .spawn(move || scheduler.coordinate())
                    .map_err(|e| EnsembleError::Internal(format!("启动调度线程失败: {e}")))?;
                *coordinator = Some(handle);
                info!(max_concurrent = self.inner.max_concurrent, "调度器已启动");
            }
        }

        if wait {
            self.wait_until_done();
            self.shutdown();
        }
        Ok(())
    }

    fn coordinate(&self) {
        while !self.inner.shutdown.load(Ordering::SeqCst) {
            let claim = {
                let mut registry = self.inner.registry.lock();
                let claim = registry.claim_next(self.inner.max_concurrent);
                if claim.is_none() {
                    self.inner
                        .changed
                        .wait_for(&mut registry, self.inner.dispatch_interval);
                }
                claim
            };
            if let Some(claim) = claim {
                self.launch(claim);
            }
        }
        debug!("调度线程退出");
    }

    fn launch(&self, claim: Claim) {
        let handle = claim.handle;
        let thread_name = format!("{}-{}", claim.kind, claim.name);
        let scheduler = self.clone();
        let spawned = thread::Builder::new()
            .name(thread_name)
            .spawn(move || scheduler.execute(claim, false));

        if let Err(e) = spawned {
            let message = format!("启动任务线程失败: {e}");
            error!(job_id = %handle, "{}", message);
            metrics::counter!("ensemble_jobs_failed_total").increment(1);
            {
                let mut registry = self.inner.registry.lock();
                registry.internal_errors.push(message.clone());
                registry.finish(handle, Some(message), Duration::ZERO);
            }
            self.inner.changed.notify_all();
        }
    }

    fn execute(&self, claim: Claim, inline: bool) {
        let ctx = JobContext::new(self.clone(), claim.handle, claim.cancel.clone(), inline);
        debug!(job_id = %claim.handle, job = %claim.name, kind = claim.kind, "任务开始执行");
        metrics::counter!("ensemble_jobs_started_total", "kind" => claim.kind).increment(1);

        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| claim.runnable.run(&ctx)));
        let elapsed = start.elapsed();

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(format!("任务发生panic: {}", panic_message(payload.as_ref()))),
        };

        match &error {
            None => {
                debug!(
                    job_id = %claim.handle,
                    job = %claim.name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "任务执行完成"
                );
                metrics::counter!("ensemble_jobs_completed_total", "kind" => claim.kind)
                    .increment(1);
            }
            Some(message) => {
                warn!(job_id = %claim.handle, job = %claim.name, error = %message, "任务执行失败");
                metrics::counter!("ensemble_jobs_failed_total", "kind" => claim.kind).increment(1);
            }
        }

        self.inner
            .registry
            .lock()
            .finish(claim.handle, error, elapsed);
        self.inner.changed.notify_all();
    }

    /// 阻塞直到没有未完成的任务
    pub fn wait_until_done(&self) {
        let mut registry = self.inner.registry.lock();
        while registry.jobs.values().any(|r| !r.completed) {
            self.inner
                .changed
                .wait_for(&mut registry, self.inner.dispatch_interval);
        }
    }

    /// 阻塞直到指定任务及其子树完成
    pub fn wait_for_job(
        &self,
        handle: JobHandle,
        poll_interval: Duration,
        cancel: &CancellationFlag,
    ) -> EnsembleResult<()> {
        let mut registry = self.inner.registry.lock();
        loop {
            match registry.is_complete(handle) {
                None => return Err(EnsembleError::JobNotFound { id: handle.0 }),
                Some(true) => return Ok(()),
                Some(false) => {}
            }
            if cancel.is_cancelled() {
                return Err(EnsembleError::Cancelled(format!("等待任务 {handle} 时被取消")));
            }
            self.inner.changed.wait_for(&mut registry, poll_interval);
        }
    }

    /// 尽力取消：所有任务标记为完成并请求协作取消，然后结束协调线程
    ///
    /// 此后加入的任务同样直接标记为完成，直到再次 `start()`。
    pub fn stop(&self) {
        info!("正在停止调度器");
        {
            let mut registry = self.inner.registry.lock();
            registry.stopped = true;
            for record in registry.jobs.values_mut() {
                record.completed = true;
                record.cancel.cancel();
            }
        }
        self.shutdown();
    }

    /// 结束协调线程，不改变任务状态
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.changed.notify_all();
        let handle = self.inner.coordinator.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                self.inner
                    .registry
                    .lock()
                    .internal_errors
                    .push("调度线程异常退出".to_string());
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.inner.coordinator.lock().is_some()
    }

    /// 在当前线程按插入顺序同步执行所有任务，不使用工作线程
    pub fn run_inline(&self) -> EnsembleResult<()> {
        info!("同步执行全部任务");
        loop {
            let claim = self.inner.registry.lock().claim_next(usize::MAX);
            match claim {
                Some(claim) => self.execute(claim, true),
                None => break,
            }
        }
        Ok(())
    }

    /// 在当前线程同步执行某个任务及其子树中尚未运行的任务
    pub fn run_inline_job(&self, handle: JobHandle) -> EnsembleResult<()> {
        loop {
            let claim = {
                let mut registry = self.inner.registry.lock();
                if !registry.jobs.contains_key(&handle) {
                    return Err(EnsembleError::JobNotFound { id: handle.0 });
                }
                registry.claim_in_subtree(handle)
            };
            match claim {
                Some(claim) => self.execute(claim, true),
                None => return Ok(()),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.registry.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn percent_complete(&self) -> f64 {
        let registry = self.inner.registry.lock();
        let total = registry.jobs.len();
        if total == 0 {
            return 100.0;
        }
        let completed = registry.jobs.values().filter(|r| r.completed).count();
        completed as f64 * 100.0 / total as f64
    }

    pub fn incomplete_count(&self) -> usize {
        self.inner
            .registry
            .lock()
            .jobs
            .values()
            .filter(|r| !r.completed)
            .count()
    }

    pub fn running_intensive_count(&self) -> usize {
        self.inner.registry.lock().running_intensive()
    }

    pub fn count_of_kind(&self, kind: &str) -> usize {
        self.inner
            .registry
            .lock()
            .jobs
            .values()
            .filter(|r| r.kind == kind)
            .count()
    }

    pub fn completed_of_kind(&self, kind: &str) -> usize {
        self.inner
            .registry
            .lock()
            .jobs
            .values()
            .filter(|r| r.kind == kind && r.completed)
            .count()
    }

    pub fn contains_kind(&self, kind: &str) -> bool {
        self.inner
            .registry
            .lock()
            .jobs
            .values()
            .any(|r| r.kind == kind)
    }

    /// 任务及其整棵子树是否完成
    pub fn is_complete(&self, handle: JobHandle) -> EnsembleResult<bool> {
        self.inner
            .registry
            .lock()
            .is_complete(handle)
            .ok_or(EnsembleError::JobNotFound { id: handle.0 })
    }

    /// 直接子任务是否都已完成
    pub fn are_children_complete(&self, handle: JobHandle) -> EnsembleResult<bool> {
        let registry = self.inner.registry.lock();
        let record = registry
            .jobs
            .get(&handle)
            .ok_or(EnsembleError::JobNotFound { id: handle.0 })?;
        Ok(record
            .children
            .iter()
            .all(|child| registry.jobs.get(child).map_or(true, |c| c.completed)))
    }

    /// 调度器内部错误在前，然后是任务自身错误，再按深度优先列出后代错误
    pub fn errors(&self, handle: JobHandle) -> EnsembleResult<Vec<EnsembleError>> {
        let registry = self.inner.registry.lock();
        if !registry.jobs.contains_key(&handle) {
            return Err(EnsembleError::JobNotFound { id: handle.0 });
        }
        let mut errors: Vec<EnsembleError> = registry
            .internal_errors
            .iter()
            .map(|m| EnsembleError::Internal(m.clone()))
            .collect();
        registry.collect_errors(handle, &mut errors);
        Ok(errors)
    }

    /// 所有顶层任务树的错误
    pub fn all_errors(&self) -> Vec<EnsembleError> {
        let registry = self.inner.registry.lock();
        let mut errors: Vec<EnsembleError> = registry
            .internal_errors
            .iter()
            .map(|m| EnsembleError::Internal(m.clone()))
            .collect();
        for (handle, record) in &registry.jobs {
            if record.parent.is_none() {
                registry.collect_errors(*handle, &mut errors);
            }
        }
        errors
    }

    /// 任务自身与整棵子树的耗时之和
    pub fn elapsed(&self, handle: JobHandle) -> EnsembleResult<Duration> {
        let registry = self.inner.registry.lock();
        if !registry.jobs.contains_key(&handle) {
            return Err(EnsembleError::JobNotFound { id: handle.0 });
        }
        Ok(registry
            .subtree(handle)
            .iter()
            .filter_map(|h| registry.jobs.get(h))
            .map(|r| r.elapsed)
            .sum())
    }

    /// 移除已完成的顶层任务树，返回移除的记录数
    pub fn clear_completed(&self) -> usize {
        let mut registry = self.inner.registry.lock();
        let finished: Vec<JobHandle> = registry
            .jobs
            .iter()
            .filter(|(_, r)| r.parent.is_none())
            .map(|(h, _)| *h)
            .filter(|h| {
                registry.is_complete(*h).unwrap_or(false)
                    && registry
                        .subtree(*h)
                        .iter()
                        .all(|c| registry.jobs.get(c).is_some_and(|r| !r.running))
            })
            .collect();

        let mut removed = 0;
        for root in finished {
            for handle in registry.subtree(root) {
                if registry.jobs.shift_remove(&handle).is_some() {
                    removed += 1;
                }
            }
        }
        debug!(removed, "已清理完成的任务");
        removed
    }

    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        self.inner
            .registry
            .lock()
            .jobs
            .iter()
            .map(|(h, r)| JobSnapshot::from_record(*h, r))
            .collect()
    }

    pub fn job(&self, handle: JobHandle) -> Option<JobSnapshot> {
        self.inner
            .registry
            .lock()
            .jobs
            .get(&handle)
            .map(|r| JobSnapshot::from_record(handle, r))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop {
        name: &'static str,
        heavy: bool,
    }

    impl Runnable for Noop {
        fn name(&self) -> String {
            self.name.to_string()
        }

        fn kind(&self) -> &'static str {
            "noop"
        }

        fn is_resource_intensive(&self) -> bool {
            self.heavy
        }

        fn run(&self, _ctx: &JobContext) -> EnsembleResult<()> {
            Ok(())
        }
    }

    fn noop(name: &'static str, heavy: bool) -> Arc<dyn Runnable> {
        Arc::new(Noop { name, heavy })
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(2, Duration::from_millis(10))
    }

    #[test]
    fn test_add_child_unknown_parent() {
        let s = scheduler();
        let err = s.add_child(JobHandle::new(), noop("a", false)).unwrap_err();
        assert!(matches!(err, EnsembleError::JobNotFound { .. }));
    }

    #[test]
    fn test_claim_skips_heavy_jobs_over_budget() {
        let s = Scheduler::new(1, Duration::from_millis(10));
        s.add(noop("heavy-1", true));
        s.add(noop("heavy-2", true));
        s.add(noop("light", false));

        let mut registry = s.inner.registry.lock();
        let first = registry.claim_next(1).unwrap();
        assert_eq!(first.name, "heavy-1");
        let second = registry.claim_next(1).unwrap();
        assert_eq!(second.name, "light");
        assert!(registry.claim_next(1).is_none());
    }

    #[test]
    fn test_subtree_completion() {
        let s = scheduler();
        let root = s.add(noop("root", false));
        let child = s.add_child(root, noop("child", false)).unwrap();
        let grandchild = s.add_child(child, noop("grandchild", false)).unwrap();

        {
            let mut registry = s.inner.registry.lock();
            registry.finish(root, None, Duration::from_millis(5));
            registry.finish(child, None, Duration::from_millis(7));
        }
        assert!(!s.is_complete(root).unwrap());
        assert!(s.are_children_complete(root).unwrap());
        assert!(!s.are_children_complete(child).unwrap());

        s.inner
            .registry
            .lock()
            .finish(grandchild, Some("boom".into()), Duration::from_millis(3));
        assert!(s.is_complete(root).unwrap());
        assert_eq!(s.elapsed(root).unwrap(), Duration::from_millis(15));
        assert_eq!(s.elapsed(child).unwrap(), Duration::from_millis(10));
    }

    #[test]
    fn test_errors_depth_first_after_internal() {
        let s = scheduler();
        let root = s.add(noop("root", false));
        let a = s.add_child(root, noop("a", false)).unwrap();
        let a1 = s.add_child(a, noop("a1", false)).unwrap();
        let b = s.add_child(root, noop("b", false)).unwrap();
        {
            let mut registry = s.inner.registry.lock();
            registry.internal_errors.push("spawn".into());
            registry.finish(b, Some("b failed".into()), Duration::ZERO);
            registry.finish(a1, Some("a1 failed".into()), Duration::ZERO);
            registry.finish(root, Some("root failed".into()), Duration::ZERO);
        }

        let errors = s.errors(root).unwrap();
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        assert_eq!(messages.len(), 4);
        assert!(matches!(errors[0], EnsembleError::Internal(_)));
        assert!(messages[1].contains("root failed"));
        assert!(messages[2].contains("a1 failed"));
        assert!(messages[3].contains("b failed"));
    }

    #[test]
    fn test_kind_queries_and_percent() {
        let s = scheduler();
        assert_eq!(s.percent_complete(), 100.0);
        let a = s.add(noop("a", false));
        s.add(noop("b", false));
        assert!(s.contains_kind("noop"));
        assert!(!s.contains_kind("member"));
        assert_eq!(s.count_of_kind("noop"), 2);

        s.inner.registry.lock().finish(a, None, Duration::ZERO);
        assert_eq!(s.completed_of_kind("noop"), 1);
        assert_eq!(s.incomplete_count(), 1);
        assert_eq!(s.percent_complete(), 50.0);
    }

    #[test]
    fn test_clear_completed_removes_whole_trees() {
        let s = scheduler();
        let done = s.add(noop("done", false));
        let child = s.add_child(done, noop("child", false)).unwrap();
        let pending = s.add(noop("pending", false));
        {
            let mut registry = s.inner.registry.lock();
            registry.finish(done, None, Duration::ZERO);
            registry.finish(child, None, Duration::ZERO);
        }

        assert_eq!(s.clear_completed(), 2);
        assert_eq!(s.len(), 1);
        assert!(s.job(pending).is_some());
        assert!(s.is_complete(done).is_err());
    }

    #[test]
    fn test_stop_marks_everything_complete() {
        let s = scheduler();
        let a = s.add(noop("a", true));
        s.stop();
        assert!(s.is_complete(a).unwrap());
        assert_eq!(s.incomplete_count(), 0);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
