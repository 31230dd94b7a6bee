use nalgebra::{DMatrix, DVector};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use ensemble_core::{EnsembleError, EnsembleResult, ErrorMode, ObservationConfig};

/// 观测值是否参与同化：有限且大于0
pub fn is_valid_observation(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// 观测模型：观测名称、误差设置与观测算子 H
#[derive(Debug, Clone)]
pub struct ObservationModel {
    names: Vec<String>,
    errors: Vec<f64>,
    modes: Vec<ErrorMode>,
    operator: DMatrix<f64>,
    primary_rows: Vec<usize>,
}

impl ObservationModel {
    /// 根据观测配置和状态向量的变量顺序构建 H
    pub fn build(config: &ObservationConfig, state_names: &[String]) -> EnsembleResult<Self> {
        let n_obs = config.items.len();
        let mut operator = DMatrix::zeros(n_obs, state_names.len());
        let mut primary_rows = Vec::with_capacity(n_obs);

        for (i, item) in config.items.iter().enumerate() {
            let definition = config.operator(&item.name).ok_or_else(|| {
                EnsembleError::configuration(format!("观测 {} 没有对应的观测算子定义", item.name))
            })?;
            if definition.states.len() != definition.coefficients.len() {
                return Err(EnsembleError::configuration(format!(
                    "观测算子 {} 的状态数与系数数不一致",
                    definition.name
                )));
            }

            for (k, (state, coefficient)) in definition
                .states
                .iter()
                .zip(&definition.coefficients)
                .enumerate()
            {
                let column = state_names.iter().position(|s| s == state).ok_or_else(|| {
                    EnsembleError::configuration(format!(
                        "观测算子 {} 引用了未知状态变量: {state}",
                        definition.name
                    ))
                })?;
                operator[(i, column)] += coefficient;
                if k == 0 {
                    primary_rows.push(column);
                }
            }

            if primary_rows.len() != i + 1 {
                return Err(EnsembleError::configuration(format!(
                    "观测算子 {} 未引用任何状态变量",
                    definition.name
                )));
            }
        }

        debug!(
            observations = n_obs,
            states = state_names.len(),
            "观测算子构建完成"
        );

        Ok(Self {
            names: config.items.iter().map(|i| i.name.clone()).collect(),
            errors: config.items.iter().map(|i| i.error).collect(),
            modes: config.items.iter().map(|i| i.error_mode).collect(),
            operator,
            primary_rows,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn error(&self, i: usize) -> f64 {
        self.errors[i]
    }

    pub fn error_mode(&self, i: usize) -> ErrorMode {
        self.modes[i]
    }

    /// 观测算子 H（观测数 × 状态数）
    pub fn operator(&self) -> &DMatrix<f64> {
        &self.operator
    }

    /// 第 i 个观测的诊断记录行（其算子引用的第一个状态）
    pub fn primary_row(&self, i: usize) -> usize {
        self.primary_rows[i]
    }

    pub fn primary_rows(&self) -> &[usize] {
        &self.primary_rows
    }
}

/// 观测数据源，持有全部观测序列
#[derive(Debug, Clone)]
pub struct ObservationSource {
    model: ObservationModel,
    series: Vec<Vec<f64>>,
    missing_value: f64,
}

impl ObservationSource {
    /// 使用内存中的序列，每个观测一个序列，按天索引
    pub fn from_series(
        model: ObservationModel,
        series: Vec<Vec<f64>>,
        missing_value: f64,
    ) -> EnsembleResult<Self> {
        if series.len() != model.len() {
            return Err(EnsembleError::DimensionMismatch {
                context: "观测序列数量".to_string(),
                expected: model.len(),
                actual: series.len(),
            });
        }
        Ok(Self {
            model,
            series,
            missing_value,
        })
    }

    /// 从目录读取 `<name>_Obs.csv`，文件不存在时回退到 `Default.csv`
    pub fn from_directory(
        model: ObservationModel,
        directory: &Path,
        missing_value: f64,
    ) -> EnsembleResult<Self> {
        let mut series = Vec::with_capacity(model.len());
        for name in model.names() {
            let path = directory.join(format!("{name}_Obs.csv"));
            let path = if path.exists() {
                path
            } else {
                let fallback = directory.join("Default.csv");
                warn!(
                    observation = %name,
                    fallback = %fallback.display(),
                    "观测文件不存在，使用默认文件"
                );
                fallback
            };
            series.push(read_series(&path)?);
        }

        info!(
            directory = %directory.display(),
            observations = model.len(),
            "观测数据加载完成"
        );
        Self::from_series(model, series, missing_value)
    }

    pub fn model(&self) -> &ObservationModel {
        &self.model
    }

    pub fn missing_value(&self) -> f64 {
        self.missing_value
    }

    /// 某天的观测向量，缺失值（包括超出序列末尾）为 NaN
    pub fn observations_for(&self, day_index: usize) -> DVector<f64> {
        DVector::from_iterator(
            self.series.len(),
            self.series.iter().map(|values| {
                match values.get(day_index) {
                    Some(v) if *v != self.missing_value && v.is_finite() => *v,
                    _ => f64::NAN,
                }
            }),
        )
    }

    pub fn has_valid_observation(&self, day_index: usize) -> bool {
        self.observations_for(day_index)
            .iter()
            .any(|v| is_valid_observation(*v))
    }
}

/// 每行一个值；带逗号的行取最后一列，无法解析的首行视为表头
fn read_series(path: &Path) -> EnsembleResult<Vec<f64>> {
    let contents = fs::read_to_string(path)?;
    let mut values = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        let field = line.rsplit(',').next().unwrap_or("").trim();
        if field.is_empty() {
            continue;
        }
        match field.parse::<f64>() {
            Ok(v) => values.push(v),
            Err(_) if line_no == 0 => continue,
            Err(e) => {
                return Err(EnsembleError::Serialization(format!(
                    "{} 第 {} 行无法解析: {e}",
                    path.display(),
                    line_no + 1
                )))
            }
        }
    }
    Ok(values)
}
