use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, info};

use crate::barrier::DayBarrier;
use crate::bridge::StateVariableBridge;
use ensemble_dispatcher::{JobContext, Runnable};
use ensemble_domain::{DayId, EnsembleError, EnsembleResult, ModelFactory, WorkerRole};

/// 任务非正常结束（错误或 panic）时通知屏障不再等待该角色
struct FailureGuard<'a> {
    barrier: &'a DayBarrier,
    role: WorkerRole,
    armed: bool,
}

impl Drop for FailureGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.barrier.mark_failed(self.role);
        }
    }
}

/// 驱动一个模型实例逐日运行的工作任务
///
/// 真值、开环与每个集合成员各自一个任务，属于资源密集型任务。
pub struct EnsembleMemberJob {
    factory: Arc<dyn ModelFactory>,
    bridge: StateVariableBridge,
    barrier: Arc<DayBarrier>,
    days: Arc<[DayId]>,
    seed: Option<u64>,
}

impl EnsembleMemberJob {
    pub fn new(
        factory: Arc<dyn ModelFactory>,
        bridge: StateVariableBridge,
        barrier: Arc<DayBarrier>,
        days: Arc<[DayId]>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            factory,
            bridge,
            barrier,
            days,
            seed,
        }
    }

    pub fn role(&self) -> WorkerRole {
        self.bridge.role()
    }

    fn rng(&self) -> StdRng {
        let member = self.role().member_index().unwrap_or(0) as u64;
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(member + 1)),
            None => StdRng::from_os_rng(),
        }
    }

    fn simulate(&self, ctx: &JobContext) -> EnsembleResult<()> {
        let role = self.role();
        let mut model = self.factory.create(role)?;
        self.bridge.validate(model.as_ref())?;

        if role.is_ensemble() {
            let mut rng = self.rng();
            self.bridge.perturb_initial(model.as_mut(), &mut rng)?;
        }

        for day in self.days.iter() {
            if ctx.is_cancelled() {
                return Err(EnsembleError::Cancelled(format!(
                    "{role} 在 {day} 前被取消"
                )));
            }
            model.advance(day)?;
            self.bridge.exchange(*day, model.as_mut(), ctx.cancellation())?;
            debug!(role = %role, day = day.index, "完成一天");
        }
        Ok(())
    }
}

impl Runnable for EnsembleMemberJob {
    fn name(&self) -> String {
        self.role().to_string()
    }

    fn kind(&self) -> &'static str {
        "member"
    }

    fn is_resource_intensive(&self) -> bool {
        true
    }

    fn run(&self, ctx: &JobContext) -> EnsembleResult<()> {
        let mut guard = FailureGuard {
            barrier: &self.barrier,
            role: self.role(),
            armed: true,
        };
        self.simulate(ctx)?;
        guard.armed = false;
        info!(role = %self.role(), days = self.days.len(), "工作角色运行结束");
        Ok(())
    }
}
