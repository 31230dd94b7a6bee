//! 用于端到端运行的合成作物/土壤水模型
//!
//! 物理过程只求简单可信：降雨补充土壤水，蒸腾消耗土壤水，
//! 叶面积指数受水分胁迫限制，生物量随截获辐射累积。

use nalgebra::DVector;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::f64::consts::PI;
use tracing::info;

use ensemble_core::{AppConfig, ErrorMode};
use ensemble_domain::{
    is_valid_observation, DayId, DomainModel, EnsembleError, EnsembleResult, ModelFactory,
    ObservationModel, ObservationSource, WorkerRole,
};

const LAYER_DEPTH_MM: f64 = 200.0;
const FIELD_CAPACITY: f64 = 0.45;
const WILTING_POINT: f64 = 0.10;
const MIN_SOIL_WATER: f64 = 0.05;
const EXTINCTION: f64 = 0.6;
const SENESCENCE_DOY: u32 = 240;

/// 每隔几天有一次观测
pub const OBSERVATION_INTERVAL: usize = 5;
const OBSERVATION_SEED_OFFSET: u64 = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct CropParameters {
    pub growth_rate: f64,
    pub max_lai: f64,
    /// 单位叶面积的日蒸腾量（体积含水量）
    pub water_use: f64,
    /// 辐射利用效率
    pub rue: f64,
}

impl Default for CropParameters {
    fn default() -> Self {
        Self {
            growth_rate: 0.10,
            max_lai: 6.0,
            water_use: 0.004,
            rue: 1.2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticCropModel {
    lai: f64,
    soil_water: Vec<f64>,
    biomass: f64,
    params: CropParameters,
}

impl SyntheticCropModel {
    pub fn new(layers: usize, params: CropParameters) -> Self {
        Self {
            lai: 0.3,
            soil_water: vec![0.30; layers.max(1)],
            biomass: 10.0,
            params,
        }
    }

    pub fn variable_names(&self) -> Vec<String> {
        let mut names = vec!["LAI".to_string()];
        names.extend((1..=self.soil_water.len()).map(|i| format!("SW{i}")));
        names.push("Biomass".to_string());
        names
    }

    fn layer(name: &str) -> Option<usize> {
        name.strip_prefix("SW")?
            .parse::<usize>()
            .ok()
            .filter(|i| *i >= 1)
            .map(|i| i - 1)
    }

    fn unknown(name: &str) -> EnsembleError {
        EnsembleError::configuration(format!("合成模型没有变量 {name}"))
    }

    fn water_stress(&self) -> f64 {
        let mean = self.soil_water.iter().sum::<f64>() / self.soil_water.len() as f64;
        ((mean - WILTING_POINT) / (0.30 - WILTING_POINT)).clamp(0.0, 1.0)
    }

    fn infiltrate(&mut self, rain_mm: f64) {
        let mut water = rain_mm / LAYER_DEPTH_MM;
        for layer in &mut self.soil_water {
            let room = (FIELD_CAPACITY - *layer).max(0.0);
            let taken = water.min(room);
            *layer += taken;
            water -= taken;
            if water <= 0.0 {
                break;
            }
        }
    }
}

fn rainfall(day: &DayId) -> f64 {
    match day.index % 7 {
        3 => 12.0,
        5 => 4.0,
        _ => 0.0,
    }
}

fn radiation(day_of_year: u32) -> f64 {
    15.0 + 10.0 * (2.0 * PI * (day_of_year as f64 - 80.0) / 365.0).sin()
}

impl DomainModel for SyntheticCropModel {
    fn has_variable(&self, name: &str) -> bool {
        match name {
            "LAI" | "Biomass" => true,
            _ => Self::layer(name).is_some_and(|i| i < self.soil_water.len()),
        }
    }

    fn get(&self, name: &str) -> EnsembleResult<f64> {
        match name {
            "LAI" => Ok(self.lai),
            "Biomass" => Ok(self.biomass),
            _ => Self::layer(name)
                .and_then(|i| self.soil_water.get(i).copied())
                .ok_or_else(|| Self::unknown(name)),
        }
    }

    fn set(&mut self, name: &str, value: f64) -> EnsembleResult<()> {
        match name {
            "LAI" => self.lai = value,
            "Biomass" => self.biomass = value,
            _ => {
                let slot = Self::layer(name)
                    .and_then(|i| self.soil_water.get_mut(i))
                    .ok_or_else(|| Self::unknown(name))?;
                *slot = value;
            }
        }
        Ok(())
    }

    fn advance(&mut self, day: &DayId) -> EnsembleResult<()> {
        self.infiltrate(rainfall(day));

        let stress = self.water_stress();
        let transpiration = self.params.water_use * self.lai * stress;
        let per_layer = transpiration / self.soil_water.len() as f64;
        for layer in &mut self.soil_water {
            *layer = (*layer - per_layer).max(MIN_SOIL_WATER);
        }

        let p = self.params;
        self.lai += p.growth_rate * self.lai * (1.0 - self.lai / p.max_lai) * stress;
        if day.day_of_year() > SENESCENCE_DOY {
            self.lai *= 0.97;
        }
        self.lai = self.lai.max(0.0);

        let intercepted = 1.0 - (-EXTINCTION * self.lai).exp();
        self.biomass += p.rue * intercepted * radiation(day.day_of_year());
        Ok(())
    }
}

/// 为每个角色创建合成模型；真值使用略有不同的参数，模拟模型偏差
#[derive(Debug, Clone)]
pub struct SyntheticModelFactory {
    pub layers: usize,
    pub params: CropParameters,
    pub truth_params: CropParameters,
}

impl Default for SyntheticModelFactory {
    fn default() -> Self {
        let params = CropParameters::default();
        Self {
            layers: 3,
            params,
            truth_params: CropParameters {
                growth_rate: 0.13,
                water_use: 0.005,
                ..params
            },
        }
    }
}

impl ModelFactory for SyntheticModelFactory {
    fn create(&self, role: WorkerRole) -> EnsembleResult<Box<dyn DomainModel>> {
        let params = match role {
            WorkerRole::Truth => self.truth_params,
            _ => self.params,
        };
        Ok(Box::new(SyntheticCropModel::new(self.layers, params)))
    }
}

/// 真值预运行加观测噪声生成观测序列
///
/// 每 `OBSERVATION_INTERVAL` 天一次观测，其余天为缺测值。
pub fn synthetic_observations(
    config: &AppConfig,
    factory: &dyn ModelFactory,
    model: ObservationModel,
) -> EnsembleResult<ObservationSource> {
    let simulation = &config.simulation;
    let states = config.assimilation.state_names();
    let missing = config.observations.missing_value;
    let mut rng = match simulation.seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(OBSERVATION_SEED_OFFSET)),
        None => StdRng::from_os_rng(),
    };

    let mut truth = factory.create(WorkerRole::Truth)?;
    let mut series = vec![Vec::with_capacity(simulation.days as usize); model.len()];
    for index in 0..simulation.days as usize {
        let day = DayId::new(index, simulation.date_of(index));
        truth.advance(&day)?;

        let observe = index % OBSERVATION_INTERVAL == OBSERVATION_INTERVAL - 1;
        let state = states
            .iter()
            .map(|name| truth.get(name))
            .collect::<EnsembleResult<Vec<f64>>>()?;
        let projected = model.operator() * DVector::from_vec(state);

        for (i, values) in series.iter_mut().enumerate() {
            if !observe {
                values.push(missing);
                continue;
            }
            let eps: f64 = rng.sample(StandardNormal);
            let sigma = model.error(i);
            let observed = match model.error_mode(i) {
                ErrorMode::Additive => projected[i] + sigma * eps,
                ErrorMode::Multiplicative => projected[i] * (1.0 + sigma * eps),
            };
            values.push(if is_valid_observation(observed) {
                observed
            } else {
                missing
            });
        }
    }

    info!(
        observations = model.len(),
        days = simulation.days,
        interval = OBSERVATION_INTERVAL,
        "已生成合成观测"
    );
    ObservationSource::from_series(model, series, missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(index: usize) -> DayId {
        let start = NaiveDate::from_ymd_opt(2021, 5, 1).unwrap();
        DayId::new(index, start + chrono::Days::new(index as u64))
    }

    #[test]
    fn test_variables_resolve_by_name() {
        let mut model = SyntheticCropModel::new(2, CropParameters::default());
        assert_eq!(model.variable_names(), vec!["LAI", "SW1", "SW2", "Biomass"]);
        assert!(model.has_variable("SW2"));
        assert!(!model.has_variable("SW3"));
        assert!(!model.has_variable("SW0"));
        model.set("SW2", 0.4).unwrap();
        assert_eq!(model.get("SW2").unwrap(), 0.4);
        assert!(model.get("NDVI").unwrap_err().is_configuration());
    }

    #[test]
    fn test_crop_grows_over_a_season() {
        let mut model = SyntheticCropModel::new(3, CropParameters::default());
        let lai0 = model.get("LAI").unwrap();
        let biomass0 = model.get("Biomass").unwrap();
        for i in 0..40 {
            model.advance(&day(i)).unwrap();
        }
        assert!(model.get("LAI").unwrap() > lai0);
        assert!(model.get("Biomass").unwrap() > biomass0);
        for layer in ["SW1", "SW2", "SW3"] {
            let sw = model.get(layer).unwrap();
            assert!((MIN_SOIL_WATER..=FIELD_CAPACITY).contains(&sw));
        }
    }

    #[test]
    fn test_truth_differs_from_ensemble_models() {
        let factory = SyntheticModelFactory::default();
        let mut truth = factory.create(WorkerRole::Truth).unwrap();
        let mut member = factory.create(WorkerRole::Ensemble(0)).unwrap();
        for i in 0..20 {
            truth.advance(&day(i)).unwrap();
            member.advance(&day(i)).unwrap();
        }
        assert!(truth.get("LAI").unwrap() > member.get("LAI").unwrap());
    }
}
