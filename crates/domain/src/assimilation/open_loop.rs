use super::{AssimilationEngine, EngineContext};
use crate::states_of_the_day::StatesOfTheDay;
use ensemble_core::{AssimilationMode, EnsembleResult};

/// 开环：后验等于（扰动后的）先验，观测只做诊断记录
#[derive(Debug)]
pub struct OpenLoop {
    context: EngineContext,
}

impl OpenLoop {
    pub fn new(context: EngineContext) -> Self {
        Self { context }
    }
}

impl AssimilationEngine for OpenLoop {
    fn mode(&self) -> AssimilationMode {
        AssimilationMode::OpenLoop
    }

    fn perturb(&mut self, states: &mut StatesOfTheDay) -> EnsembleResult<()> {
        self.context.perturb(states)
    }

    fn update(&mut self, states: &mut StatesOfTheDay) -> EnsembleResult<()> {
        states.posterior = states.prior.clone();
        states.posterior_open_loop = states.prior_open_loop.clone();
        states.refresh_posterior_mean();
        Ok(())
    }
}
