use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 模拟日标识：序号加日期
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayId {
    pub index: usize,
    pub date: NaiveDate,
}

impl DayId {
    pub fn new(index: usize, date: NaiveDate) -> Self {
        Self { index, date }
    }

    pub fn day_of_year(&self) -> u32 {
        self.date.ordinal()
    }
}

impl fmt::Display for DayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.date, self.index)
    }
}

/// 工作线程在同化系统中的身份
///
/// 角色在创建任务时显式传入，并决定写入状态表的列。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkerRole {
    Truth,
    OpenLoop,
    Ensemble(usize),
}

impl WorkerRole {
    pub fn is_ensemble(&self) -> bool {
        matches!(self, Self::Ensemble(_))
    }

    pub fn member_index(&self) -> Option<usize> {
        match self {
            Self::Ensemble(i) => Some(*i),
            _ => None,
        }
    }

    /// 该角色每天写入的先验列
    pub fn prior_column(&self) -> Column {
        match self {
            Self::Truth => Column::Truth,
            Self::OpenLoop => Column::PriorOpenLoop,
            Self::Ensemble(i) => Column::PriorEnsemble(*i),
        }
    }

    /// 该角色读回的后验列，真值运行没有后验
    pub fn posterior_column(&self) -> Option<Column> {
        match self {
            Self::Truth => None,
            Self::OpenLoop => Some(Column::PosteriorOpenLoop),
            Self::Ensemble(i) => Some(Column::PosteriorEnsemble(*i)),
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truth => write!(f, "Truth"),
            Self::OpenLoop => write!(f, "OpenLoop"),
            Self::Ensemble(i) => write!(f, "Ensemble{i}"),
        }
    }
}

/// 状态表的列标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Truth,
    PriorOpenLoop,
    PosteriorOpenLoop,
    PriorEnsemble(usize),
    PosteriorEnsemble(usize),
    PriorMean,
    PosteriorMean,
    Observation,
    ObservationEnsemble(usize),
}

impl Column {
    pub fn name(&self) -> String {
        match self {
            Self::Truth => "truth".to_string(),
            Self::PriorOpenLoop => "prior_open_loop".to_string(),
            Self::PosteriorOpenLoop => "posterior_open_loop".to_string(),
            Self::PriorEnsemble(i) => format!("prior_ensemble_{i}"),
            Self::PosteriorEnsemble(i) => format!("posterior_ensemble_{i}"),
            Self::PriorMean => "prior_mean".to_string(),
            Self::PosteriorMean => "posterior_mean".to_string(),
            Self::Observation => "observation".to_string(),
            Self::ObservationEnsemble(i) => format!("observation_ensemble_{i}"),
        }
    }

    pub fn ensemble_index(&self) -> Option<usize> {
        match self {
            Self::PriorEnsemble(i) | Self::PosteriorEnsemble(i) | Self::ObservationEnsemble(i) => {
                Some(*i)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
