use thiserror::Error;
use uuid::Uuid;

/// 集合同化系统错误类型定义
#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error("任务未找到: {id}")]
    JobNotFound { id: Uuid },

    #[error("任务执行失败 [{job}]: {message}")]
    JobFailure { job: String, message: String },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("数值退化: {0}")]
    NumericDegeneracy(String),

    #[error("维度不匹配 ({context}): 期望 {expected}, 实际 {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("重复写入: 表 {table} 第 {day} 天的列 {column} 已经写入")]
    WriteConflict {
        table: String,
        day: usize,
        column: String,
    },

    #[error("数据行不存在: 表 {table} 第 {day} 天")]
    RowNotFound { table: String, day: usize },

    #[error("已取消: {0}")]
    Cancelled(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl EnsembleError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

impl From<serde_json::Error> for EnsembleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type EnsembleResult<T> = std::result::Result<T, EnsembleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let id = Uuid::new_v4();
        let err = EnsembleError::JobNotFound { id };
        assert!(err.to_string().contains(&id.to_string()));

        let err = EnsembleError::WriteConflict {
            table: "LAI".to_string(),
            day: 3,
            column: "prior_ensemble_1".to_string(),
        };
        assert!(err.to_string().contains("prior_ensemble_1"));
    }

    #[test]
    fn test_error_classification() {
        assert!(EnsembleError::configuration("bad").is_configuration());
        assert!(!EnsembleError::Internal("x".into()).is_configuration());
        assert!(EnsembleError::Cancelled("stop".into()).is_cancelled());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: EnsembleError = io.into();
        assert!(matches!(err, EnsembleError::Io(_)));

        fn read_missing() -> EnsembleResult<String> {
            Ok(std::fs::read_to_string("/nonexistent/ensemble/obs.csv")?)
        }
        assert!(matches!(read_missing(), Err(EnsembleError::Io(_))));
    }
}
