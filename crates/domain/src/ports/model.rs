use crate::value_objects::{DayId, WorkerRole};
use ensemble_core::EnsembleResult;

/// 领域模拟模型接口
///
/// 同化系统只通过名称读写状态变量，不关心模型如何计算每天的状态。
pub trait DomainModel: Send {
    fn has_variable(&self, name: &str) -> bool;

    fn get(&self, name: &str) -> EnsembleResult<f64>;

    fn set(&mut self, name: &str, value: f64) -> EnsembleResult<()>;

    /// 推进一天
    fn advance(&mut self, day: &DayId) -> EnsembleResult<()>;
}

/// 为每个工作角色创建独立的模型实例
pub trait ModelFactory: Send + Sync {
    fn create(&self, role: WorkerRole) -> EnsembleResult<Box<dyn DomainModel>>;
}

impl<F> ModelFactory for F
where
    F: Fn(WorkerRole) -> EnsembleResult<Box<dyn DomainModel>> + Send + Sync,
{
    fn create(&self, role: WorkerRole) -> EnsembleResult<Box<dyn DomainModel>> {
        self(role)
    }
}
