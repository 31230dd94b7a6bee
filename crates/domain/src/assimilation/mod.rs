//! 同化算法
//!
//! 三种算法共享同一个流程：先注入模型误差（`perturb`），再计算后验（`update`）。

pub mod direct_insertion;
pub mod enkf;
pub mod model_error;
pub mod open_loop;

use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::observation::ObservationModel;
use crate::states_of_the_day::StatesOfTheDay;
use ensemble_core::{AssimilationConfig, AssimilationMode, EnsembleResult};

pub use direct_insertion::DirectInsertion;
pub use enkf::EnsembleKalmanFilter;
pub use model_error::ModelErrorInjector;
pub use open_loop::OpenLoop;

/// 每个模拟日内同化步骤所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssimilationPhase {
    AwaitingPriors,
    Perturbing,
    Computing,
    PostedPosteriors,
    Idle,
}

impl fmt::Display for AssimilationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 同化算法接口
pub trait AssimilationEngine: Send {
    fn mode(&self) -> AssimilationMode;

    /// 对先验注入模型误差，并让后验从扰动后的先验开始
    fn perturb(&mut self, states: &mut StatesOfTheDay) -> EnsembleResult<()>;

    /// 根据观测计算后验与后验均值
    fn update(&mut self, states: &mut StatesOfTheDay) -> EnsembleResult<()>;

    fn assimilate(&mut self, states: &mut StatesOfTheDay) -> EnsembleResult<()> {
        self.perturb(states)?;
        self.update(states)
    }
}

/// 各算法共用的模型误差、观测模型与随机数发生器
#[derive(Debug)]
pub struct EngineContext {
    pub model: Arc<ObservationModel>,
    pub model_error: ModelErrorInjector,
    pub rng: StdRng,
}

impl EngineContext {
    pub fn new(config: &AssimilationConfig, model: Arc<ObservationModel>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            model,
            model_error: ModelErrorInjector::new(config.add_model_error, config.states.clone()),
            rng,
        }
    }

    pub fn perturb(&mut self, states: &mut StatesOfTheDay) -> EnsembleResult<()> {
        self.model_error.apply(states, &mut self.rng)?;
        states.reset_posterior();
        Ok(())
    }
}

/// 按配置创建同化算法
pub fn build_engine(
    config: &AssimilationConfig,
    model: Arc<ObservationModel>,
    seed: Option<u64>,
) -> Box<dyn AssimilationEngine> {
    let context = EngineContext::new(config, model, seed);
    match config.mode {
        AssimilationMode::DirectInsertion => Box::new(DirectInsertion::new(context)),
        AssimilationMode::OpenLoop => Box::new(OpenLoop::new(context)),
        AssimilationMode::EnsembleKalmanFilter => {
            Box::new(EnsembleKalmanFilter::new(context, config.inflation_factor))
        }
    }
}
