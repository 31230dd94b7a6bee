use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::job::{JobContext, Runnable};
use ensemble_core::{EnsembleError, EnsembleResult};

/// 并行组合任务：把全部子任务加入调度器后立即返回
pub struct RunInParallel {
    name: String,
    children: Vec<Arc<dyn Runnable>>,
}

impl RunInParallel {
    pub fn new(name: impl Into<String>, children: Vec<Arc<dyn Runnable>>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }
}

impl Runnable for RunInParallel {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> &'static str {
        "parallel"
    }

    fn run(&self, ctx: &JobContext) -> EnsembleResult<()> {
        for (index, child) in self.children.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(EnsembleError::Cancelled(format!(
                    "并行任务 {} 在第 {} 个子任务前被取消",
                    self.name, index
                )));
            }
            ctx.add_child(child.clone())?;
        }
        debug!(job = %self.name, children = self.children.len(), "并行子任务已加入调度");
        Ok(())
    }
}

/// 顺序组合任务：逐个加入子任务，等前一个子树完成后再加入下一个
pub struct RunInSequence {
    name: String,
    children: Vec<Arc<dyn Runnable>>,
    poll_interval: Duration,
    stop_on_failure: bool,
}

impl RunInSequence {
    pub fn new(name: impl Into<String>, children: Vec<Arc<dyn Runnable>>) -> Self {
        Self {
            name: name.into(),
            children,
            poll_interval: Duration::from_millis(200),
            stop_on_failure: false,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// 为 true 时某个子任务失败后不再运行后续子任务
    pub fn stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }
}

impl Runnable for RunInSequence {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> &'static str {
        "sequence"
    }

    fn run(&self, ctx: &JobContext) -> EnsembleResult<()> {
        for (index, child) in self.children.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(EnsembleError::Cancelled(format!(
                    "顺序任务 {} 在第 {} 个子任务前被取消",
                    self.name, index
                )));
            }

            let handle = ctx.add_child(child.clone())?;
            ctx.wait_for_child(handle, self.poll_interval)?;

            if self.stop_on_failure {
                let errors = ctx.scheduler().errors(handle)?;
                let failed = errors
                    .iter()
                    .any(|e| matches!(e, EnsembleError::JobFailure { .. }));
                if failed {
                    warn!(job = %self.name, child = index, "子任务失败，停止后续子任务");
                    return Err(EnsembleError::JobFailure {
                        job: self.name.clone(),
                        message: format!("第 {index} 个子任务失败"),
                    });
                }
            }
        }
        Ok(())
    }
}
