use nalgebra::{DMatrix, DVector};

use crate::value_objects::DayId;
use ensemble_core::{EnsembleError, EnsembleResult};

/// 一次同化调用的输入输出
///
/// 矩阵的行是状态变量，列是参与当天同化的集合成员（顺序见 `members`）。
/// 观测向量中缺失值为 NaN。
#[derive(Debug, Clone)]
pub struct StatesOfTheDay {
    pub day: DayId,
    pub state_names: Vec<String>,
    pub members: Vec<usize>,
    pub prior: DMatrix<f64>,
    pub prior_open_loop: Option<DVector<f64>>,
    pub posterior: DMatrix<f64>,
    pub posterior_open_loop: Option<DVector<f64>>,
    pub prior_mean: DVector<f64>,
    pub posterior_mean: DVector<f64>,
    pub observations: DVector<f64>,
    pub observations_perturbed: DMatrix<f64>,
}

impl StatesOfTheDay {
    pub fn new(
        day: DayId,
        state_names: Vec<String>,
        members: Vec<usize>,
        prior: DMatrix<f64>,
        prior_open_loop: Option<DVector<f64>>,
        observations: DVector<f64>,
    ) -> EnsembleResult<Self> {
        if prior.nrows() != state_names.len() {
            return Err(EnsembleError::DimensionMismatch {
                context: "先验矩阵行数".to_string(),
                expected: state_names.len(),
                actual: prior.nrows(),
            });
        }
        if prior.ncols() != members.len() {
            return Err(EnsembleError::DimensionMismatch {
                context: "先验矩阵列数".to_string(),
                expected: members.len(),
                actual: prior.ncols(),
            });
        }
        if let Some(open_loop) = &prior_open_loop {
            if open_loop.len() != state_names.len() {
                return Err(EnsembleError::DimensionMismatch {
                    context: "开环先验长度".to_string(),
                    expected: state_names.len(),
                    actual: open_loop.len(),
                });
            }
        }

        let n_obs = observations.len();
        let n_members = members.len();
        let prior_mean = row_means(&prior);
        Ok(Self {
            day,
            state_names,
            members,
            posterior: prior.clone(),
            posterior_open_loop: prior_open_loop.clone(),
            posterior_mean: prior_mean.clone(),
            prior,
            prior_open_loop,
            prior_mean,
            observations,
            observations_perturbed: DMatrix::from_element(n_obs, n_members, f64::NAN),
        })
    }

    pub fn n_states(&self) -> usize {
        self.prior.nrows()
    }

    pub fn n_members(&self) -> usize {
        self.prior.ncols()
    }

    /// 先验被修改（模型误差）后重新计算均值，并让后验从先验重新开始
    pub fn reset_posterior(&mut self) {
        self.prior_mean = row_means(&self.prior);
        self.posterior = self.prior.clone();
        self.posterior_open_loop = self.prior_open_loop.clone();
        self.posterior_mean = self.prior_mean.clone();
    }

    pub fn refresh_posterior_mean(&mut self) {
        self.posterior_mean = row_means(&self.posterior);
    }
}

/// 按行求均值，没有列时为零向量
pub fn row_means(matrix: &DMatrix<f64>) -> DVector<f64> {
    if matrix.ncols() == 0 {
        return DVector::zeros(matrix.nrows());
    }
    matrix.column_mean()
}
