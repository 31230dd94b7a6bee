use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cancellation::CancellationFlag;
use crate::scheduler::Scheduler;
use ensemble_core::EnsembleResult;

/// 可被调度器执行的工作单元
pub trait Runnable: Send + Sync {
    fn name(&self) -> String;

    /// 任务类别，用于按类别统计
    fn kind(&self) -> &'static str;

    /// 资源密集型任务受最大并发数限制，协调类任务不受限制
    fn is_resource_intensive(&self) -> bool {
        false
    }

    fn run(&self, ctx: &JobContext) -> EnsembleResult<()>;
}

/// 任务句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub Uuid);

impl JobHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 任务运行时上下文
///
/// 组合任务通过它向调度器添加子任务并等待子任务完成。
#[derive(Clone)]
pub struct JobContext {
    scheduler: Scheduler,
    handle: JobHandle,
    cancel: CancellationFlag,
    inline: bool,
}

impl JobContext {
    pub(crate) fn new(
        scheduler: Scheduler,
        handle: JobHandle,
        cancel: CancellationFlag,
        inline: bool,
    ) -> Self {
        Self {
            scheduler,
            handle,
            cancel,
            inline,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn handle(&self) -> JobHandle {
        self.handle
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_inline(&self) -> bool {
        self.inline
    }

    pub fn add_child(&self, job: Arc<dyn Runnable>) -> EnsembleResult<JobHandle> {
        self.scheduler.add_child(self.handle, job)
    }

    /// 等待子任务及其子树完成；同步运行模式下直接在当前线程执行
    pub fn wait_for_child(&self, child: JobHandle, poll_interval: Duration) -> EnsembleResult<()> {
        if self.inline {
            self.scheduler.run_inline_job(child)
        } else {
            self.scheduler.wait_for_job(child, poll_interval, &self.cancel)
        }
    }
}

/// 调度器中的任务记录
pub struct JobRecord {
    pub(crate) runnable: Arc<dyn Runnable>,
    pub(crate) name: String,
    pub(crate) kind: &'static str,
    pub(crate) resource_intensive: bool,
    pub(crate) running: bool,
    pub(crate) completed: bool,
    pub(crate) error: Option<String>,
    pub(crate) elapsed: Duration,
    pub(crate) children: Vec<JobHandle>,
    pub(crate) parent: Option<JobHandle>,
    pub(crate) cancel: CancellationFlag,
}

impl JobRecord {
    pub(crate) fn new(runnable: Arc<dyn Runnable>, parent: Option<JobHandle>) -> Self {
        Self {
            name: runnable.name(),
            kind: runnable.kind(),
            resource_intensive: runnable.is_resource_intensive(),
            runnable,
            running: false,
            completed: false,
            error: None,
            elapsed: Duration::ZERO,
            children: Vec::new(),
            parent,
            cancel: CancellationFlag::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn children(&self) -> &[JobHandle] {
        &self.children
    }

    pub fn parent(&self) -> Option<JobHandle> {
        self.parent
    }

    pub(crate) fn is_pending(&self) -> bool {
        !self.completed && !self.running
    }
}

impl fmt::Debug for JobRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRecord")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("running", &self.running)
            .field("completed", &self.completed)
            .field("error", &self.error)
            .field("children", &self.children.len())
            .finish()
    }
}

/// 任务状态快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobHandle,
    pub name: String,
    pub kind: String,
    pub parent: Option<JobHandle>,
    pub running: bool,
    pub completed: bool,
    pub error: Option<String>,
    pub elapsed_ms: u128,
}

impl JobSnapshot {
    pub(crate) fn from_record(id: JobHandle, record: &JobRecord) -> Self {
        Self {
            id,
            name: record.name.clone(),
            kind: record.kind.to_string(),
            parent: record.parent,
            running: record.running,
            completed: record.completed,
            error: record.error.clone(),
            elapsed_ms: record.elapsed.as_millis(),
        }
    }
}
