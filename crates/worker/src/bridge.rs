use rand::Rng;
use rand_distr::StandardNormal;
use std::sync::Arc;
use tracing::debug;

use crate::barrier::DayBarrier;
use ensemble_core::StateVariableConfig;
use ensemble_dispatcher::CancellationFlag;
use ensemble_domain::{
    DayId, DomainModel, EnsembleError, EnsembleResult, StateStore, WorkerRole,
};

/// 工作角色与状态表之间的每日交换
///
/// 读取模型状态写为先验，等待当天后验发布，集合成员再把后验写回模型。
pub struct StateVariableBridge {
    role: WorkerRole,
    states: Vec<StateVariableConfig>,
    store: Arc<StateStore>,
    barrier: Arc<DayBarrier>,
}

impl StateVariableBridge {
    pub fn new(
        role: WorkerRole,
        states: Vec<StateVariableConfig>,
        store: Arc<StateStore>,
        barrier: Arc<DayBarrier>,
    ) -> Self {
        Self {
            role,
            states,
            store,
            barrier,
        }
    }

    pub fn role(&self) -> WorkerRole {
        self.role
    }

    /// 模型必须提供所有跟踪的状态变量
    pub fn validate(&self, model: &dyn DomainModel) -> EnsembleResult<()> {
        let missing: Vec<&str> = self
            .states
            .iter()
            .map(|s| s.name.as_str())
            .filter(|name| !model.has_variable(name))
            .collect();
        if !missing.is_empty() {
            return Err(EnsembleError::configuration(format!(
                "模型缺少状态变量: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    pub fn read_state(&self, model: &dyn DomainModel) -> EnsembleResult<Vec<f64>> {
        self.states.iter().map(|s| model.get(&s.name)).collect()
    }

    /// 首日前的初始扰动：`x += initial_error * eps`，再截断到边界
    pub fn perturb_initial<R: Rng + ?Sized>(
        &self,
        model: &mut dyn DomainModel,
        rng: &mut R,
    ) -> EnsembleResult<()> {
        for state in self.states.iter().filter(|s| s.initial_error > 0.0) {
            let eps: f64 = rng.sample(StandardNormal);
            let value = model.get(&state.name)? + state.initial_error * eps;
            model.set(&state.name, state.clamp(value))?;
        }
        Ok(())
    }

    /// 一天的交换：写先验、等后验、写回
    pub fn exchange(
        &self,
        day: DayId,
        model: &mut dyn DomainModel,
        cancel: &CancellationFlag,
    ) -> EnsembleResult<()> {
        let prior = self.read_state(model)?;
        self.store.write_prior(day, self.role, &prior)?;
        self.barrier.arrive_prior(day.index, self.role)?;
        self.barrier.wait_for_posterior(day.index, cancel)?;

        if !self.role.is_ensemble() {
            return Ok(());
        }
        let posterior = self.store.read_posterior(day.index, self.role)?;
        for (state, value) in self.states.iter().zip(posterior) {
            model.set(&state.name, state.clamp(value))?;
        }
        debug!(day = day.index, role = %self.role, "后验已写回模型");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_core::{MissingMemberPolicy, ObservationConfig};
    use ensemble_domain::{Column, ObservationModel};
    use ensemble_testing_utils::{test_day, MockDomainModel};
    use nalgebra::DVector;
    use rand::{rngs::StdRng, SeedableRng};

    fn states() -> Vec<StateVariableConfig> {
        vec![
            StateVariableConfig::new("LAI"),
            StateVariableConfig {
                lower_bound: Some(0.0),
                upper_bound: Some(0.5),
                initial_error: 0.1,
                ..StateVariableConfig::new("SW1")
            },
        ]
    }

    fn bridge(role: WorkerRole) -> (StateVariableBridge, Arc<StateStore>, Arc<DayBarrier>) {
        let store = Arc::new(StateStore::new(&["LAI".into(), "SW1".into()], 1));
        let barrier = Arc::new(DayBarrier::new(vec![role]));
        let bridge = StateVariableBridge::new(role, states(), store.clone(), barrier.clone());
        (bridge, store, barrier)
    }

    #[test]
    fn test_validate_reports_missing_variables() {
        let (bridge, _, _) = bridge(WorkerRole::Ensemble(0));
        let err = bridge
            .validate(&MockDomainModel::new(&[("LAI", 1.0)]))
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("SW1"));
        assert!(bridge
            .validate(&MockDomainModel::new(&[("LAI", 1.0), ("SW1", 0.3)]))
            .is_ok());
    }

    #[test]
    fn test_initial_perturbation_respects_bounds() {
        let (bridge, _, _) = bridge(WorkerRole::Ensemble(0));
        let mut model = MockDomainModel::new(&[("LAI", 1.0), ("SW1", 0.45)]);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            bridge.perturb_initial(&mut model, &mut rng).unwrap();
            let sw = model.get("SW1").unwrap();
            assert!((0.0..=0.5).contains(&sw));
        }
        assert_eq!(model.get("LAI").unwrap(), 1.0);
    }

    #[test]
    fn test_exchange_writes_back_clamped_posterior() {
        let role = WorkerRole::Ensemble(0);
        let (bridge, store, barrier) = bridge(role);
        let mut model = MockDomainModel::new(&[("LAI", 1.0), ("SW1", 0.3)]);

        // 同化步骤：等先验，改写后验后发布
        let assimilation = {
            let store = store.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                let cancel = CancellationFlag::new();
                let present = barrier.wait_for_priors(0, &cancel).unwrap();
                let mut states = store
                    .gather(test_day(0), &present, MissingMemberPolicy::Exclude, DVector::zeros(0))
                    .unwrap();
                states.posterior[(0, 0)] = 1.5;
                states.posterior[(1, 0)] = 0.9;
                states.refresh_posterior_mean();
                let obs_model =
                    ObservationModel::build(&ObservationConfig::default(), &store.state_names())
                        .unwrap();
                store.publish(&states, &obs_model).unwrap();
                barrier.publish_posterior(0);
            })
        };

        bridge
            .exchange(test_day(0), &mut model, &CancellationFlag::new())
            .unwrap();
        assimilation.join().unwrap();

        assert_eq!(store.get("LAI", 0, Column::PriorEnsemble(0)), Some(1.0));
        assert_eq!(model.get("LAI").unwrap(), 1.5);
        assert_eq!(model.get("SW1").unwrap(), 0.5);
    }

    #[test]
    fn test_non_ensemble_roles_keep_their_state() {
        let (bridge, store, barrier) = bridge(WorkerRole::Truth);
        let mut model = MockDomainModel::new(&[("LAI", 2.0), ("SW1", 0.2)]);
        barrier.publish_posterior(0);

        bridge
            .exchange(test_day(0), &mut model, &CancellationFlag::new())
            .unwrap();

        assert_eq!(model.get("LAI").unwrap(), 2.0);
        assert!(model.write_log().lock().is_empty());
        assert_eq!(store.get("LAI", 0, Column::Truth), Some(2.0));
    }
}
