use rand::Rng;
use rand_distr::StandardNormal;
use tracing::trace;

use crate::states_of_the_day::StatesOfTheDay;
use ensemble_core::{EnsembleError, EnsembleResult, ModelErrorMode, StateVariableConfig};

/// 模型误差注入
///
/// 每个状态每天抽取一个公共随机数 eps0 用于开环，
/// 集合成员 j 使用 eps0 + eps_j，使成员扰动与开环扰动相关。
/// 当前值为 0 的状态不扰动，结果截断为非负。
#[derive(Debug, Clone)]
pub struct ModelErrorInjector {
    enabled: bool,
    states: Vec<StateVariableConfig>,
}

impl ModelErrorInjector {
    pub fn new(enabled: bool, states: Vec<StateVariableConfig>) -> Self {
        Self { enabled, states }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn apply<R: Rng + ?Sized>(
        &self,
        states: &mut StatesOfTheDay,
        rng: &mut R,
    ) -> EnsembleResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.states.len() != states.n_states() {
            return Err(EnsembleError::DimensionMismatch {
                context: "模型误差配置与状态向量".to_string(),
                expected: states.n_states(),
                actual: self.states.len(),
            });
        }

        // 先解析全部模式，无效配置时不修改任何状态
        let modes = self
            .states
            .iter()
            .map(StateVariableConfig::model_error_mode)
            .collect::<EnsembleResult<Vec<_>>>()?;

        for (row, (config, mode)) in self.states.iter().zip(modes).enumerate() {
            if mode == ModelErrorMode::Off || config.model_error == 0.0 {
                continue;
            }
            let sigma = config.model_error;
            let eps0: f64 = rng.sample(StandardNormal);

            if let Some(open_loop) = states.prior_open_loop.as_mut() {
                let x = open_loop[row];
                if x != 0.0 {
                    open_loop[row] = perturb(x, sigma, eps0, mode);
                }
            }

            for j in 0..states.prior.ncols() {
                let x = states.prior[(row, j)];
                if x == 0.0 {
                    continue;
                }
                let eps = eps0 + rng.sample::<f64, _>(StandardNormal);
                states.prior[(row, j)] = perturb(x, sigma, eps, mode);
            }
            trace!(state = %config.name, sigma, "已注入模型误差");
        }

        Ok(())
    }
}

fn perturb(x: f64, sigma: f64, eps: f64, mode: ModelErrorMode) -> f64 {
    let value = match mode {
        ModelErrorMode::Off => x,
        ModelErrorMode::Additive => x + sigma * eps,
        ModelErrorMode::Multiplicative => x + x * sigma * eps,
    };
    value.max(0.0)
}
