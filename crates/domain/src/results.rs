use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::state_table::StateRow;
use ensemble_core::EnsembleResult;

/// 导出用的行记录：一个状态变量在一天内的全部列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub table: String,
    pub day: usize,
    pub date: NaiveDate,
    pub day_of_year: u32,
    #[serde(flatten)]
    pub columns: IndexMap<String, Option<f64>>,
}

impl StateRecord {
    pub fn from_row(table: &str, row: &StateRow) -> Self {
        Self {
            table: table.to_string(),
            day: row.day.index,
            date: row.day.date,
            day_of_year: row.day.day_of_year(),
            columns: row.columns(),
        }
    }

    pub fn value(&self, column: &str) -> Option<f64> {
        self.columns.get(column).copied().flatten()
    }
}

/// 结果输出端口
pub trait ResultSink {
    fn write(&mut self, records: &[StateRecord]) -> EnsembleResult<()>;

    fn flush(&mut self) -> EnsembleResult<()> {
        Ok(())
    }
}

/// 内存中的结果收集器
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<StateRecord>,
}

impl ResultSink for MemorySink {
    fn write(&mut self, records: &[StateRecord]) -> EnsembleResult<()> {
        self.records.extend_from_slice(records);
        Ok(())
    }
}
