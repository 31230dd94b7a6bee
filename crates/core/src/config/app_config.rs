use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    assimilation::AssimilationConfig,
    observation::ObservationConfig,
    scheduler::{ObservabilityConfig, SchedulerConfig, SimulationConfig},
};
use crate::EnsembleResult;

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub assimilation: AssimilationConfig,
    #[serde(default)]
    pub observations: ObservationConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file and environment variables
    ///
    /// Load order:
    /// 1. Config file (explicit path, or the first default path that exists)
    /// 2. Environment variable overrides (prefix: ENSEMBLE_, nested keys separated by `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        match config_path {
            Some(path) => {
                if !Path::new(path).exists() {
                    return Err(anyhow::anyhow!("配置文件不存在: {}", path));
                }
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
            None => {
                let default_paths = ["config/ensemble.toml", "ensemble.toml"];
                let found = default_paths.iter().find(|p| Path::new(p).exists());
                match found {
                    Some(path) => {
                        builder = builder.add_source(File::new(path, FileFormat::Toml));
                    }
                    None => {
                        return Err(anyhow::anyhow!(
                            "未找到配置文件，已尝试: {:?}",
                            default_paths
                        ));
                    }
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("ENSEMBLE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate().context("配置验证失败")?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate().context("配置验证失败")?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate every section, including cross-section references
    pub fn validate(&self) -> EnsembleResult<()> {
        self.scheduler.validate()?;
        self.simulation.validate()?;
        self.assimilation.validate()?;
        self.observations
            .validate(&self.assimilation.state_names())?;
        self.observability.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AssimilationMode, ErrorMode, MissingMemberPolicy};

    const SAMPLE: &str = r#"
[scheduler]
max_concurrent = 4

[simulation]
start_date = "2021-05-01"
days = 12
seed = 42

[assimilation]
mode = "ensemble_kalman_filter"
ensemble_size = 8
add_model_error = true
inflation_factor = 1.05
missing_member_policy = "carry_forward"

[[assimilation.states]]
name = "LAI"
model_error = 0.1
model_error_option = 2
initial_error = 0.2
lower_bound = 0.0

[[assimilation.states]]
name = "SW1"
model_error = 0.01
model_error_option = 1
lower_bound = 0.0
upper_bound = 1.0

[[observations.items]]
name = "LAI"
error = 0.1
error_mode = "multiplicative"

[[observations.operators]]
name = "LAI"
states = ["LAI"]
coefficients = [1.0]
"#;

    #[test]
    fn test_from_toml_parses_all_sections() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.scheduler.max_concurrent, 4);
        assert_eq!(config.scheduler.dispatch_interval_ms, 100);
        assert_eq!(config.scheduler.sequence_poll_interval_ms, 200);
        assert_eq!(config.simulation.days, 12);
        assert_eq!(config.simulation.seed, Some(42));
        assert!(config.simulation.run_truth);
        assert_eq!(config.assimilation.mode, AssimilationMode::EnsembleKalmanFilter);
        assert_eq!(
            config.assimilation.missing_member_policy,
            MissingMemberPolicy::CarryForward
        );
        assert_eq!(config.assimilation.states.len(), 2);
        assert_eq!(config.observations.items[0].error_mode, ErrorMode::Multiplicative);
        assert_eq!(config.observations.missing_value, -99.0);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_toml_roundtrip_keeps_validity() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let text = config.to_toml().unwrap();
        let reparsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(reparsed.assimilation.ensemble_size, 8);
    }

    #[test]
    fn test_enkf_requires_two_members() {
        let text = SAMPLE.replace("ensemble_size = 8", "ensemble_size = 1");
        let config: AppConfig = toml::from_str(&text).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_invalid_model_error_option_rejected() {
        let text = SAMPLE.replace("model_error_option = 2", "model_error_option = 3");
        let config: AppConfig = toml::from_str(&text).unwrap();
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_observation_without_operator_rejected() {
        let text = SAMPLE.replace("[[observations.operators]]\nname = \"LAI\"", "[[observations.operators]]\nname = \"NDVI\"");
        let config: AppConfig = toml::from_str(&text).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_operator_with_unknown_state_rejected() {
        let text = SAMPLE.replace("states = [\"LAI\"]", "states = [\"Height\"]");
        let config: AppConfig = toml::from_str(&text).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Height"));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let text = SAMPLE.replace("upper_bound = 1.0", "upper_bound = -1.0");
        let config: AppConfig = toml::from_str(&text).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_inflation_rejected() {
        let text = SAMPLE.replace("inflation_factor = 1.05", "inflation_factor = 0.0");
        let config: AppConfig = toml::from_str(&text).unwrap();
        assert!(config.validate().is_err());
    }
}
