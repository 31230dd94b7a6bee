//! 集合运行的执行层
//!
//! 每个工作角色一个任务，逐日推进各自的模型实例；同化任务在日屏障处汇总先验、
//! 计算后验并发布，成员读取后验后进入下一天。

pub mod assimilation_job;
pub mod barrier;
pub mod bridge;
pub mod export;
pub mod member_job;
pub mod runner;

pub use assimilation_job::AssimilationJob;
pub use barrier::DayBarrier;
pub use bridge::StateVariableBridge;
pub use export::{export_results, JsonLinesSink};
pub use member_job::EnsembleMemberJob;
pub use runner::{EnsembleRun, EnsembleRunner};
