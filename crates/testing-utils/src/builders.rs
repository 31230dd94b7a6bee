//! Test data builders for creating configuration and assimilation inputs
//!
//! This module provides builder patterns for creating test data with
//! sensible defaults and easy customization.

use nalgebra::{DMatrix, DVector};

use crate::helpers::test_day;
use ensemble_core::{
    AssimilationConfig, AssimilationMode, ErrorMode, MissingMemberPolicy, ObservationConfig,
    ObservationSpec, OperatorDefinition, StateVariableConfig,
};
use ensemble_domain::{DayId, EnsembleResult, StatesOfTheDay};

/// Builder for creating test AssimilationConfig values
pub struct AssimilationConfigBuilder {
    config: AssimilationConfig,
}

impl AssimilationConfigBuilder {
    pub fn new(mode: AssimilationMode) -> Self {
        Self {
            config: AssimilationConfig {
                mode,
                ensemble_size: 4,
                add_model_error: false,
                inflation_factor: 1.0,
                missing_member_policy: MissingMemberPolicy::Exclude,
                states: Vec::new(),
            },
        }
    }

    pub fn with_ensemble_size(mut self, size: usize) -> Self {
        self.config.ensemble_size = size;
        self
    }

    pub fn with_state(mut self, name: &str) -> Self {
        self.config.states.push(StateVariableConfig::new(name));
        self
    }

    pub fn with_state_config(mut self, state: StateVariableConfig) -> Self {
        self.config.states.push(state);
        self
    }

    /// Adds a state with model error (`option`: 0 off, 1 additive, 2 multiplicative)
    pub fn with_noisy_state(mut self, name: &str, model_error: f64, option: u8) -> Self {
        self.config.states.push(StateVariableConfig {
            model_error,
            model_error_option: option,
            ..StateVariableConfig::new(name)
        });
        self.config.add_model_error = true;
        self
    }

    pub fn with_model_error(mut self, enabled: bool) -> Self {
        self.config.add_model_error = enabled;
        self
    }

    pub fn with_inflation(mut self, factor: f64) -> Self {
        self.config.inflation_factor = factor;
        self
    }

    pub fn with_policy(mut self, policy: MissingMemberPolicy) -> Self {
        self.config.missing_member_policy = policy;
        self
    }

    pub fn build(self) -> AssimilationConfig {
        self.config
    }
}

/// Builder for creating test ObservationConfig values
#[derive(Default)]
pub struct ObservationConfigBuilder {
    config: ObservationConfig,
}

impl ObservationConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observation named like the state it observes, with coefficient 1
    pub fn with_direct(mut self, state: &str, error: f64, error_mode: ErrorMode) -> Self {
        self.config.items.push(ObservationSpec {
            name: state.to_string(),
            error,
            error_mode,
        });
        self.config
            .operators
            .push(OperatorDefinition::new(state, &[state], &[1.0]));
        self
    }

    pub fn with_combined(
        mut self,
        name: &str,
        states: &[&str],
        coefficients: &[f64],
        error: f64,
        error_mode: ErrorMode,
    ) -> Self {
        self.config.items.push(ObservationSpec {
            name: name.to_string(),
            error,
            error_mode,
        });
        self.config
            .operators
            .push(OperatorDefinition::new(name, states, coefficients));
        self
    }

    pub fn build(self) -> ObservationConfig {
        self.config
    }
}

/// Builder for creating test StatesOfTheDay values
pub struct StatesOfTheDayBuilder {
    day: DayId,
    state_names: Vec<String>,
    members: Option<Vec<usize>>,
    prior: DMatrix<f64>,
    open_loop: Option<DVector<f64>>,
    observations: DVector<f64>,
}

impl StatesOfTheDayBuilder {
    /// `rows` holds one slice per state variable, one value per member
    pub fn new(rows: &[&[f64]]) -> Self {
        let n_states = rows.len();
        let n_members = rows.first().map_or(0, |r| r.len());
        let prior = DMatrix::from_fn(n_states, n_members, |r, c| rows[r][c]);
        Self {
            day: test_day(0),
            state_names: (0..n_states).map(|i| format!("state{i}")).collect(),
            members: None,
            prior,
            open_loop: None,
            observations: DVector::zeros(0),
        }
    }

    pub fn with_day(mut self, index: usize) -> Self {
        self.day = test_day(index);
        self
    }

    pub fn with_state_names(mut self, names: &[&str]) -> Self {
        self.state_names = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_members(mut self, members: &[usize]) -> Self {
        self.members = Some(members.to_vec());
        self
    }

    pub fn with_open_loop(mut self, values: &[f64]) -> Self {
        self.open_loop = Some(DVector::from_row_slice(values));
        self
    }

    /// Use `f64::NAN` for a missing observation
    pub fn with_observations(mut self, values: &[f64]) -> Self {
        self.observations = DVector::from_row_slice(values);
        self
    }

    pub fn build(self) -> EnsembleResult<StatesOfTheDay> {
        let members = self
            .members
            .unwrap_or_else(|| (0..self.prior.ncols()).collect());
        StatesOfTheDay::new(
            self.day,
            self.state_names,
            members,
            self.prior,
            self.open_loop,
            self.observations,
        )
    }
}
