use ensemble_core::{AppConfig, AssimilationMode};
use std::io::Write;
use tempfile::NamedTempFile;

const MINIMAL: &str = r#"
[simulation]
start_date = "2020-03-01"
days = 5

[assimilation]
mode = "direct_insertion"
ensemble_size = 3

[[assimilation.states]]
name = "Biomass"
"#;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_from_file() {
    let file = write_config(MINIMAL);
    let config = AppConfig::load(file.path().to_str()).unwrap();

    assert_eq!(config.assimilation.mode, AssimilationMode::DirectInsertion);
    assert_eq!(config.assimilation.ensemble_size, 3);
    assert_eq!(config.simulation.days, 5);
    assert!(config.observations.items.is_empty());
    assert_eq!(config.observability.log_format, "pretty");
}

#[test]
fn test_load_missing_file_fails() {
    let result = AppConfig::load(Some("/definitely/not/here/ensemble.toml"));
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("配置文件不存在"));
}

#[test]
fn test_environment_overrides_file() {
    let file = write_config(MINIMAL);
    std::env::set_var("ENSEMBLE_SIMULATION__DAYS", "9");
    let config = AppConfig::load(file.path().to_str());
    std::env::remove_var("ENSEMBLE_SIMULATION__DAYS");

    assert_eq!(config.unwrap().simulation.days, 9);
}

#[test]
fn test_load_rejects_invalid_configuration() {
    let file = write_config(&MINIMAL.replace("ensemble_size = 3", "ensemble_size = 0"));
    let err = AppConfig::load(file.path().to_str()).unwrap_err();
    assert!(format!("{err:#}").contains("集合成员数必须大于0"));
}
