use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::{debug, warn};

use super::{AssimilationEngine, EngineContext};
use crate::observation::is_valid_observation;
use crate::states_of_the_day::StatesOfTheDay;
use ensemble_core::{AssimilationMode, EnsembleError, EnsembleResult, ErrorMode};

/// 集合卡尔曼滤波
///
/// 只有当天有效的观测参与计算（约化的 H 与 R）。
/// 先验为 0 的状态不被修正，后验截断为非负。
#[derive(Debug)]
pub struct EnsembleKalmanFilter {
    context: EngineContext,
    inflation_factor: f64,
    last_gain: Option<DMatrix<f64>>,
    last_degeneracy: Option<EnsembleError>,
}

impl EnsembleKalmanFilter {
    pub fn new(context: EngineContext, inflation_factor: f64) -> Self {
        Self {
            context,
            inflation_factor,
            last_gain: None,
            last_degeneracy: None,
        }
    }

    /// 最近一次更新使用的卡尔曼增益（状态数 × 有效观测数）
    pub fn last_gain(&self) -> Option<&DMatrix<f64>> {
        self.last_gain.as_ref()
    }

    /// 最近一次更新中增益退化的原因，正常更新时为 None
    pub fn last_degeneracy(&self) -> Option<&EnsembleError> {
        self.last_degeneracy.as_ref()
    }

    /// 增益退化时当天不做修正，记录原因并返回零增益
    fn degenerate_gain(
        &mut self,
        n_states: usize,
        n_obs: usize,
        day: usize,
        reason: &str,
    ) -> DMatrix<f64> {
        let degeneracy = EnsembleError::NumericDegeneracy(format!("第 {day} 天: {reason}"));
        warn!(day, error = %degeneracy, "卡尔曼增益退化，当天不做修正");
        metrics::counter!("ensemble_kalman_gain_degenerate_total").increment(1);
        self.last_degeneracy = Some(degeneracy);
        DMatrix::zeros(n_states, n_obs)
    }

    fn perturb_observation(&mut self, observed: f64, sigma: f64, mode: ErrorMode) -> f64 {
        if observed == 0.0 {
            return observed;
        }
        let eps: f64 = self.context.rng.sample(StandardNormal);
        match mode {
            ErrorMode::Multiplicative => (observed + sigma * observed * eps).max(0.0),
            ErrorMode::Additive => observed + sigma * eps,
        }
    }
}

fn is_all_zero(matrix: &DMatrix<f64>) -> bool {
    matrix.iter().all(|v| *v == 0.0)
}

impl AssimilationEngine for EnsembleKalmanFilter {
    fn mode(&self) -> AssimilationMode {
        AssimilationMode::EnsembleKalmanFilter
    }

    fn perturb(&mut self, states: &mut StatesOfTheDay) -> EnsembleResult<()> {
        self.context.perturb(states)
    }

    fn update(&mut self, states: &mut StatesOfTheDay) -> EnsembleResult<()> {
        let h = self.context.model.operator().clone();
        if h.ncols() != states.n_states() {
            return Err(EnsembleError::DimensionMismatch {
                context: "观测算子列数".to_string(),
                expected: states.n_states(),
                actual: h.ncols(),
            });
        }

        states.posterior = states.prior.clone();
        states.posterior_open_loop = states.prior_open_loop.clone();
        self.last_gain = None;
        self.last_degeneracy = None;

        let valid: Vec<usize> = (0..states.observations.len())
            .filter(|&i| is_valid_observation(states.observations[i]))
            .collect();
        let m = states.n_states();
        let n = states.n_members();
        let day = states.day.index;

        if valid.is_empty() || n == 0 {
            debug!(day, members = n, "当天没有有效观测，后验等于先验");
            states.refresh_posterior_mean();
            return Ok(());
        }
        let r = valid.len();

        // 扰动观测
        let mut perturbed = DMatrix::zeros(r, n);
        for (k, &i) in valid.iter().enumerate() {
            let observed = states.observations[i];
            let sigma = self.context.model.error(i);
            let mode = self.context.model.error_mode(i);
            for j in 0..n {
                let value = self.perturb_observation(observed, sigma, mode);
                perturbed[(k, j)] = value;
                states.observations_perturbed[(i, j)] = value;
            }
        }

        // 先验协方差
        let x = &states.prior;
        let mean = &states.prior_mean;
        let deviations = DMatrix::from_fn(m, n, |a, b| x[(a, b)] - mean[a]);
        let mut p = if n > 1 {
            &deviations * deviations.transpose() / (n as f64 - 1.0)
        } else {
            DMatrix::zeros(m, m)
        };
        if self.inflation_factor != 1.0 {
            p *= self.inflation_factor;
        }

        // 约化的观测算子与观测误差协方差
        let h_red = DMatrix::from_fn(r, m, |k, c| h[(valid[k], c)]);
        let h_mean = &h_red * mean;
        let mut r_red = DMatrix::zeros(r, r);
        for (k, &i) in valid.iter().enumerate() {
            let observed = states.observations[i];
            let sigma = self.context.model.error(i);
            r_red[(k, k)] = match self.context.model.error_mode(i) {
                ErrorMode::Multiplicative if observed != 0.0 => (sigma * observed).powi(2),
                ErrorMode::Multiplicative => (sigma * h_mean[k]).powi(2),
                ErrorMode::Additive => sigma.powi(2),
            };
        }

        let pht = &p * h_red.transpose();
        let innovation_cov = &h_red * &pht + r_red;
        let gain = if is_all_zero(&h_red) {
            self.degenerate_gain(m, r, day, "约化观测算子为零矩阵")
        } else if is_all_zero(&innovation_cov) {
            self.degenerate_gain(m, r, day, "新息协方差为零矩阵")
        } else {
            match innovation_cov.try_inverse() {
                Some(inverse) => pht * inverse,
                None => self.degenerate_gain(m, r, day, "新息协方差不可逆"),
            }
        };

        let innovation = perturbed - &h_red * x;
        let delta = &gain * innovation;
        for a in 0..m {
            for b in 0..n {
                let prior = states.prior[(a, b)];
                let posterior = if prior != 0.0 {
                    prior + delta[(a, b)]
                } else {
                    prior
                };
                states.posterior[(a, b)] = posterior.max(0.0);
            }
        }

        states.refresh_posterior_mean();
        debug!(day, observations = r, members = n, "集合卡尔曼滤波更新完成");
        self.last_gain = Some(gain);
        Ok(())
    }
}
