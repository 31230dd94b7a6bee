use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use ensemble_core::{
    AppConfig, AssimilationConfig, AssimilationMode, ErrorMode, MissingMemberPolicy,
    ObservationConfig, SchedulerConfig, SimulationConfig, StateVariableConfig,
};
use ensemble_domain::{
    Column, DomainModel, EnsembleResult, ModelFactory, ObservationModel, ObservationSource,
    WorkerRole,
};
use ensemble_testing_utils::{
    AssimilationConfigBuilder, MockDomainModel, ObservationConfigBuilder, TestEnv,
};
use ensemble_worker::{EnsembleRun, EnsembleRunner};

const MISSING: f64 = -99.0;

fn app_config(
    assimilation: AssimilationConfig,
    observations: ObservationConfig,
    days: u32,
) -> AppConfig {
    AppConfig {
        scheduler: SchedulerConfig {
            max_concurrent: 8,
            dispatch_interval_ms: 5,
            sequence_poll_interval_ms: 5,
        },
        simulation: SimulationConfig {
            start_date: NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(),
            days,
            seed: Some(42),
            ..SimulationConfig::default()
        },
        assimilation,
        observations,
        ..AppConfig::default()
    }
}

fn lai_observations() -> ObservationConfig {
    ObservationConfigBuilder::new()
        .with_direct("LAI", 0.1, ErrorMode::Additive)
        .build()
}

fn source(config: &AppConfig, lai: Vec<f64>) -> Arc<ObservationSource> {
    let model =
        ObservationModel::build(&config.observations, &config.assimilation.state_names()).unwrap();
    Arc::new(ObservationSource::from_series(model, vec![lai], MISSING).unwrap())
}

/// 每个角色一个 LAI 每天增长 0.1 的模型；`failing` 指定的成员在某天失败
fn factory(failing: Option<(usize, usize)>) -> Arc<dyn ModelFactory> {
    Arc::new(
        move |role: WorkerRole| -> EnsembleResult<Box<dyn DomainModel>> {
            let mut model = MockDomainModel::new(&[("LAI", 1.0), ("SW1", 0.3)])
                .with_growth("LAI", 0.1);
            if let Some((member, day)) = failing {
                if role == WorkerRole::Ensemble(member) {
                    model = model.failing_on_day(day);
                }
            }
            Ok(model.boxed())
        },
    )
}

fn run(config: AppConfig, factory: Arc<dyn ModelFactory>, lai: Vec<f64>) -> EnsembleRun {
    let source = source(&config, lai);
    EnsembleRunner::new(config, factory, source)
        .unwrap()
        .run()
        .unwrap()
}

fn approx(a: Option<f64>, b: f64) -> bool {
    a.is_some_and(|a| (a - b).abs() < 1e-9)
}

#[test]
fn test_direct_insertion_run_end_to_end() {
    let assimilation = AssimilationConfigBuilder::new(AssimilationMode::DirectInsertion)
        .with_ensemble_size(3)
        .with_state("LAI")
        .with_state("SW1")
        .build();
    let config = app_config(assimilation, lai_observations(), 5);
    let outcome = run(config, factory(None), vec![MISSING, MISSING, 5.0, MISSING, MISSING]);

    assert!(outcome.is_success(), "{:?}", outcome.errors);
    let store = &outcome.store;

    for member in 0..3 {
        assert!(approx(store.get("LAI", 1, Column::PosteriorEnsemble(member)), 1.2));
        assert!(approx(store.get("LAI", 2, Column::PriorEnsemble(member)), 1.3));
        assert!(approx(store.get("LAI", 2, Column::PosteriorEnsemble(member)), 5.0));
        // 写回的后验在下一天继续增长
        assert!(approx(store.get("LAI", 3, Column::PriorEnsemble(member)), 5.1));
    }
    assert!(approx(store.get("LAI", 2, Column::Observation), 5.0));
    assert!(approx(store.get("LAI", 3, Column::Truth), 1.4));
    assert!(approx(store.get("LAI", 3, Column::PriorOpenLoop), 1.4));
    assert!(approx(store.get("LAI", 2, Column::PosteriorMean), 5.0));
    assert!(approx(store.get("SW1", 4, Column::PosteriorEnsemble(0)), 0.3));
    assert_eq!(store.records().len(), 10);
}

#[test]
fn test_failed_member_is_excluded() {
    let assimilation = AssimilationConfigBuilder::new(AssimilationMode::DirectInsertion)
        .with_ensemble_size(3)
        .with_state("LAI")
        .with_state("SW1")
        .build();
    let config = app_config(assimilation, lai_observations(), 5);
    let outcome = run(config, factory(Some((1, 2))), vec![MISSING; 5]);

    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.errors[0].to_string().contains("mock model failed on day 2"));
    assert_eq!(outcome.barrier.failed(), vec![WorkerRole::Ensemble(1)]);

    let store = &outcome.store;
    assert!(store.get("LAI", 1, Column::PosteriorEnsemble(1)).is_some());
    assert!(store.get("LAI", 2, Column::PriorEnsemble(1)).is_none());
    assert!(store.get("LAI", 4, Column::PosteriorEnsemble(1)).is_none());
    assert!(approx(store.get("LAI", 4, Column::PosteriorEnsemble(0)), 1.5));
    assert!(approx(store.get("LAI", 4, Column::PosteriorMean), 1.5));
}

#[test]
fn test_failed_member_carried_forward() {
    let assimilation = AssimilationConfigBuilder::new(AssimilationMode::DirectInsertion)
        .with_ensemble_size(3)
        .with_state("LAI")
        .with_state("SW1")
        .with_policy(MissingMemberPolicy::CarryForward)
        .build();
    let config = app_config(assimilation, lai_observations(), 5);
    let outcome = run(config, factory(Some((1, 2))), vec![MISSING; 5]);

    assert_eq!(outcome.errors.len(), 1);
    let store = &outcome.store;
    assert!(approx(store.get("LAI", 2, Column::PriorEnsemble(1)), 1.2));
    assert!(approx(store.get("LAI", 4, Column::PosteriorEnsemble(1)), 1.2));
    let mean = (1.5 + 1.2 + 1.5) / 3.0;
    assert!(approx(store.get("LAI", 4, Column::PosteriorMean), mean));
}

#[test]
fn test_enkf_run_is_reproducible_with_seed() {
    let build = || {
        let assimilation = AssimilationConfigBuilder::new(AssimilationMode::EnsembleKalmanFilter)
            .with_ensemble_size(4)
            .with_state_config(StateVariableConfig {
                model_error: 0.05,
                model_error_option: 2,
                initial_error: 0.1,
                lower_bound: Some(0.0),
                ..StateVariableConfig::new("LAI")
            })
            .with_state("SW1")
            .with_model_error(true)
            .build();
        app_config(assimilation, lai_observations(), 6)
    };
    let lai = vec![MISSING, 1.4, MISSING, 1.6, 1.7, MISSING];

    let first = run(build(), factory(None), lai.clone());
    let second = run(build(), factory(None), lai);

    assert!(first.is_success(), "{:?}", first.errors);
    assert_eq!(first.store.records(), second.store.records());

    // 初始扰动使成员在第 0 天互不相同
    let day0: Vec<f64> = (0..4)
        .filter_map(|m| first.store.get("LAI", 0, Column::PriorEnsemble(m)))
        .collect();
    assert_eq!(day0.len(), 4);
    assert!(day0.iter().any(|v| (v - day0[0]).abs() > 1e-12));
    assert!(first.store.get("LAI", 3, Column::ObservationEnsemble(0)).is_some());
}

#[test]
fn test_setup_rejects_missing_model_variable() {
    let assimilation = AssimilationConfigBuilder::new(AssimilationMode::OpenLoop)
        .with_ensemble_size(2)
        .with_state("LAI")
        .with_state("Biomass")
        .build();
    let config = app_config(assimilation, lai_observations(), 3);
    let source = source(&config, vec![MISSING; 3]);
    let runner = EnsembleRunner::new(config, factory(None), source).unwrap();

    let err = runner.run().err().unwrap();
    assert!(err.is_configuration());
    assert!(runner.scheduler().is_empty());
}

#[test]
fn test_concurrency_raised_to_worker_count() {
    let assimilation = AssimilationConfigBuilder::new(AssimilationMode::OpenLoop)
        .with_ensemble_size(5)
        .with_state("LAI")
        .build();
    let mut config = app_config(assimilation, lai_observations(), 2);
    config.scheduler.max_concurrent = 2;
    let source = source(&config, vec![MISSING; 2]);
    let runner = EnsembleRunner::new(config, factory(None), source).unwrap();

    assert_eq!(runner.roles().len(), 7);
    assert_eq!(runner.scheduler().max_concurrent(), 7);
    let outcome = runner.run().unwrap();
    assert!(outcome.is_success(), "{:?}", outcome.errors);
}

#[test]
fn test_stop_cancels_running_ensemble() {
    let assimilation = AssimilationConfigBuilder::new(AssimilationMode::OpenLoop)
        .with_ensemble_size(2)
        .with_state("LAI")
        .build();
    let config = app_config(assimilation, lai_observations(), 100_000);
    let source = source(&config, Vec::new());
    let runner = Arc::new(EnsembleRunner::new(config, factory(None), source).unwrap());

    let handle = {
        let runner = runner.clone();
        std::thread::spawn(move || runner.run())
    };
    assert!(TestEnv::wait_for(
        || runner.scheduler().count_of_kind("member") == 4,
        Duration::from_secs(5)
    ));

    runner.scheduler().stop();
    let outcome = handle.join().unwrap().unwrap();
    assert_eq!(runner.scheduler().incomplete_count(), 0);
    assert!(outcome.store.records().len() < 100_000);
}
