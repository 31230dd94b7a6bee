use tracing::debug;

use super::{AssimilationEngine, EngineContext};
use crate::observation::is_valid_observation;
use crate::states_of_the_day::StatesOfTheDay;
use ensemble_core::{AssimilationMode, EnsembleResult};

/// 直接插入：有有效观测的状态行被观测值整体覆盖
#[derive(Debug)]
pub struct DirectInsertion {
    context: EngineContext,
}

impl DirectInsertion {
    pub fn new(context: EngineContext) -> Self {
        Self { context }
    }
}

impl AssimilationEngine for DirectInsertion {
    fn mode(&self) -> AssimilationMode {
        AssimilationMode::DirectInsertion
    }

    fn perturb(&mut self, states: &mut StatesOfTheDay) -> EnsembleResult<()> {
        self.context.perturb(states)
    }

    fn update(&mut self, states: &mut StatesOfTheDay) -> EnsembleResult<()> {
        states.posterior = states.prior.clone();
        states.posterior_open_loop = states.prior_open_loop.clone();

        let model = &self.context.model;
        for i in 0..states.observations.len() {
            let observed = states.observations[i];
            if !is_valid_observation(observed) {
                continue;
            }
            let row = model.primary_row(i);
            states.posterior.row_mut(row).fill(observed);
            debug!(
                day = states.day.index,
                state = %states.state_names[row],
                observed,
                "观测值直接插入"
            );
        }

        states.refresh_posterior_mean();
        Ok(())
    }
}
