pub mod assimilation;
pub mod observation;
pub mod ports;
pub mod results;
pub mod state_store;
pub mod state_table;
pub mod states_of_the_day;
pub mod value_objects;

pub use assimilation::{
    build_engine, AssimilationEngine, AssimilationPhase, DirectInsertion, EngineContext,
    EnsembleKalmanFilter, ModelErrorInjector, OpenLoop,
};
pub use observation::{is_valid_observation, ObservationModel, ObservationSource};
pub use ports::*;
pub use results::*;
pub use state_store::StateStore;
pub use state_table::{StateRow, StateTable};
pub use states_of_the_day::{row_means, StatesOfTheDay};
pub use value_objects::*;

pub use ensemble_core::{EnsembleError, EnsembleResult};
