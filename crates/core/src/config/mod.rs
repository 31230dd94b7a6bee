//! 配置管理
//!
//! 配置从 TOML 文件加载，并可以通过 `ENSEMBLE_` 前缀的环境变量覆盖。

pub mod app_config;
pub mod assimilation;
pub mod observation;
pub mod scheduler;

pub use app_config::AppConfig;
pub use assimilation::{
    AssimilationConfig, AssimilationMode, MissingMemberPolicy, ModelErrorMode,
    StateVariableConfig,
};
pub use observation::{ErrorMode, ObservationConfig, ObservationSpec, OperatorDefinition};
pub use scheduler::{ObservabilityConfig, SchedulerConfig, SimulationConfig};
