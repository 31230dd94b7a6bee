use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::assimilation_job::AssimilationJob;
use crate::barrier::DayBarrier;
use crate::bridge::StateVariableBridge;
use crate::member_job::EnsembleMemberJob;
use ensemble_core::AppConfig;
use ensemble_dispatcher::{JobHandle, RunInParallel, Runnable, Scheduler};
use ensemble_domain::{
    build_engine, DayId, EnsembleError, EnsembleResult, ModelFactory, ObservationSource,
    StateStore, WorkerRole,
};

/// 一次集合运行的结果
pub struct EnsembleRun {
    pub root: JobHandle,
    pub store: Arc<StateStore>,
    pub barrier: Arc<DayBarrier>,
    pub errors: Vec<EnsembleError>,
    pub elapsed: Duration,
}

impl EnsembleRun {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// 把真值、开环、集合成员与同化任务装配到调度器上
pub struct EnsembleRunner {
    config: AppConfig,
    factory: Arc<dyn ModelFactory>,
    source: Arc<ObservationSource>,
    scheduler: Scheduler,
}

impl EnsembleRunner {
    pub fn new(
        config: AppConfig,
        factory: Arc<dyn ModelFactory>,
        source: Arc<ObservationSource>,
    ) -> EnsembleResult<Self> {
        config.validate()?;
        let workers = roles(&config).len();
        let mut max_concurrent = config.scheduler.max_concurrent;
        // 成员在日屏障处互相等待，必须同时在运行
        if max_concurrent < workers {
            warn!(
                configured = max_concurrent,
                workers, "并发上限小于工作角色数，已提高到工作角色数"
            );
            max_concurrent = workers;
        }
        let scheduler = Scheduler::new(
            max_concurrent,
            Duration::from_millis(config.scheduler.dispatch_interval_ms),
        );
        Ok(Self {
            config,
            factory,
            source,
            scheduler,
        })
    }

    /// 调度器句柄，可在其他线程调用 `stop()`
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn roles(&self) -> Vec<WorkerRole> {
        roles(&self.config)
    }

    pub fn days(&self) -> Vec<DayId> {
        let simulation = &self.config.simulation;
        (0..simulation.days as usize)
            .map(|i| DayId::new(i, simulation.date_of(i)))
            .collect()
    }

    /// 调度前的检查：观测算子维度与模型变量
    pub fn validate_setup(&self) -> EnsembleResult<()> {
        let states = &self.config.assimilation.states;
        let operator = self.source.model().operator();
        if operator.ncols() != states.len() {
            return Err(EnsembleError::DimensionMismatch {
                context: "观测算子列数".to_string(),
                expected: states.len(),
                actual: operator.ncols(),
            });
        }

        let store = Arc::new(StateStore::new(&self.config.assimilation.state_names(), 1));
        let barrier = Arc::new(DayBarrier::new(Vec::new()));
        for role in self.roles() {
            let model = self.factory.create(role)?;
            StateVariableBridge::new(role, states.clone(), store.clone(), barrier.clone())
                .validate(model.as_ref())?;
        }
        Ok(())
    }

    /// 把整棵任务树加入调度器，返回根任务句柄与共享的状态
    pub fn schedule(&self) -> EnsembleResult<(JobHandle, Arc<StateStore>, Arc<DayBarrier>)> {
        self.validate_setup()?;

        let assimilation = &self.config.assimilation;
        let roles = self.roles();
        let days: Arc<[DayId]> = self.days().into();
        let store = Arc::new(StateStore::new(
            &assimilation.state_names(),
            assimilation.ensemble_size,
        ));
        let barrier = Arc::new(
            DayBarrier::new(roles.clone()).with_poll_interval(Duration::from_millis(
                self.config.scheduler.sequence_poll_interval_ms,
            )),
        );
        let seed = self.config.simulation.seed;

        let mut jobs: Vec<Arc<dyn Runnable>> = roles
            .iter()
            .map(|role| {
                let bridge = StateVariableBridge::new(
                    *role,
                    assimilation.states.clone(),
                    store.clone(),
                    barrier.clone(),
                );
                Arc::new(EnsembleMemberJob::new(
                    self.factory.clone(),
                    bridge,
                    barrier.clone(),
                    days.clone(),
                    seed,
                )) as Arc<dyn Runnable>
            })
            .collect();

        let engine = build_engine(
            assimilation,
            Arc::new(self.source.model().clone()),
            seed,
        );
        jobs.push(Arc::new(AssimilationJob::new(
            engine,
            store.clone(),
            barrier.clone(),
            self.source.clone(),
            days,
            assimilation.missing_member_policy,
        )));

        let root = self.scheduler.add(Arc::new(RunInParallel::new("ensemble", jobs)));
        info!(
            mode = %assimilation.mode,
            members = assimilation.ensemble_size,
            workers = roles.len(),
            days = self.config.simulation.days,
            "集合运行已加入调度"
        );
        Ok((root, store, barrier))
    }

    /// 调度并阻塞直到全部任务结束
    pub fn run(&self) -> EnsembleResult<EnsembleRun> {
        let (root, store, barrier) = self.schedule()?;
        self.scheduler.start(true)?;

        let errors = self.scheduler.errors(root)?;
        let elapsed = self.scheduler.elapsed(root)?;
        if errors.is_empty() {
            info!(elapsed_ms = elapsed.as_millis() as u64, "集合运行完成");
        } else {
            warn!(errors = errors.len(), "集合运行结束，部分任务失败");
        }
        Ok(EnsembleRun {
            root,
            store,
            barrier,
            errors,
            elapsed,
        })
    }
}

fn roles(config: &AppConfig) -> Vec<WorkerRole> {
    let mut roles = Vec::with_capacity(config.assimilation.ensemble_size + 2);
    if config.simulation.run_truth {
        roles.push(WorkerRole::Truth);
    }
    if config.simulation.run_open_loop {
        roles.push(WorkerRole::OpenLoop);
    }
    roles.extend((0..config.assimilation.ensemble_size).map(WorkerRole::Ensemble));
    roles
}
