use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::barrier::DayBarrier;
use ensemble_core::MissingMemberPolicy;
use ensemble_dispatcher::{JobContext, Runnable};
use ensemble_domain::{
    AssimilationEngine, AssimilationPhase, DayId, EnsembleResult, ObservationSource, StateStore,
};

/// 每天在屏障处执行一次同化的协调任务
///
/// 不属于资源密集型任务，不占用成员的并发额度。
/// 出错时关闭屏障，让所有等待后验的成员退出。
pub struct AssimilationJob {
    engine: Mutex<Box<dyn AssimilationEngine>>,
    store: Arc<StateStore>,
    barrier: Arc<DayBarrier>,
    source: Arc<ObservationSource>,
    days: Arc<[DayId]>,
    policy: MissingMemberPolicy,
    phase: Mutex<AssimilationPhase>,
}

impl AssimilationJob {
    pub fn new(
        engine: Box<dyn AssimilationEngine>,
        store: Arc<StateStore>,
        barrier: Arc<DayBarrier>,
        source: Arc<ObservationSource>,
        days: Arc<[DayId]>,
        policy: MissingMemberPolicy,
    ) -> Self {
        Self {
            engine: Mutex::new(engine),
            store,
            barrier,
            source,
            days,
            policy,
            phase: Mutex::new(AssimilationPhase::Idle),
        }
    }

    pub fn phase(&self) -> AssimilationPhase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: AssimilationPhase) {
        *self.phase.lock() = phase;
    }

    fn assimilate_day(&self, day: DayId, ctx: &JobContext) -> EnsembleResult<()> {
        self.set_phase(AssimilationPhase::AwaitingPriors);
        let present = self.barrier.wait_for_priors(day.index, ctx.cancellation())?;

        let started = Instant::now();
        let observations = self.source.observations_for(day.index);
        let mut states = self
            .store
            .gather(day, &present, self.policy, observations)?;

        let mut engine = self.engine.lock();
        self.set_phase(AssimilationPhase::Perturbing);
        engine.perturb(&mut states)?;
        self.set_phase(AssimilationPhase::Computing);
        engine.update(&mut states)?;
        drop(engine);

        self.store.publish(&states, self.source.model())?;
        self.barrier.publish_posterior(day.index);
        self.set_phase(AssimilationPhase::PostedPosteriors);

        metrics::histogram!("ensemble_assimilation_seconds")
            .record(started.elapsed().as_secs_f64());
        debug!(
            day = day.index,
            members = states.n_members(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "当天同化完成"
        );
        Ok(())
    }
}

impl Runnable for AssimilationJob {
    fn name(&self) -> String {
        "assimilation".to_string()
    }

    fn kind(&self) -> &'static str {
        "assimilation"
    }

    fn run(&self, ctx: &JobContext) -> EnsembleResult<()> {
        let mode = self.engine.lock().mode();
        info!(mode = %mode, days = self.days.len(), "同化任务开始");

        for day in self.days.iter() {
            if let Err(e) = self.assimilate_day(*day, ctx) {
                error!(day = day.index, mode = %mode, error = %e, "同化失败");
                self.barrier.close(format!("第 {} 天同化失败: {e}", day.index));
                self.set_phase(AssimilationPhase::Idle);
                return Err(e);
            }
        }

        self.set_phase(AssimilationPhase::Idle);
        info!(mode = %mode, "同化任务结束");
        Ok(())
    }
}
