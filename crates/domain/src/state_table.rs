use indexmap::IndexMap;
use std::collections::BTreeMap;

use crate::results::StateRecord;
use crate::value_objects::{Column, DayId};
use ensemble_core::{EnsembleError, EnsembleResult};

/// 状态表中的一行，对应一个模拟日
#[derive(Debug, Clone)]
pub struct StateRow {
    pub day: DayId,
    pub truth: Option<f64>,
    pub prior_open_loop: Option<f64>,
    pub posterior_open_loop: Option<f64>,
    pub prior_ensemble: Vec<Option<f64>>,
    pub posterior_ensemble: Vec<Option<f64>>,
    pub prior_mean: Option<f64>,
    pub posterior_mean: Option<f64>,
    pub observation: Option<f64>,
    pub observation_ensemble: Vec<Option<f64>>,
}

impl StateRow {
    fn new(day: DayId, ensemble_size: usize) -> Self {
        Self {
            day,
            truth: None,
            prior_open_loop: None,
            posterior_open_loop: None,
            prior_ensemble: vec![None; ensemble_size],
            posterior_ensemble: vec![None; ensemble_size],
            prior_mean: None,
            posterior_mean: None,
            observation: None,
            observation_ensemble: vec![None; ensemble_size],
        }
    }

    pub fn get(&self, column: Column) -> Option<f64> {
        match column {
            Column::Truth => self.truth,
            Column::PriorOpenLoop => self.prior_open_loop,
            Column::PosteriorOpenLoop => self.posterior_open_loop,
            Column::PriorEnsemble(i) => self.prior_ensemble.get(i).copied().flatten(),
            Column::PosteriorEnsemble(i) => self.posterior_ensemble.get(i).copied().flatten(),
            Column::PriorMean => self.prior_mean,
            Column::PosteriorMean => self.posterior_mean,
            Column::Observation => self.observation,
            Column::ObservationEnsemble(i) => {
                self.observation_ensemble.get(i).copied().flatten()
            }
        }
    }

    fn slot_mut(&mut self, column: Column) -> Option<&mut Option<f64>> {
        match column {
            Column::Truth => Some(&mut self.truth),
            Column::PriorOpenLoop => Some(&mut self.prior_open_loop),
            Column::PosteriorOpenLoop => Some(&mut self.posterior_open_loop),
            Column::PriorEnsemble(i) => self.prior_ensemble.get_mut(i),
            Column::PosteriorEnsemble(i) => self.posterior_ensemble.get_mut(i),
            Column::PriorMean => Some(&mut self.prior_mean),
            Column::PosteriorMean => Some(&mut self.posterior_mean),
            Column::Observation => Some(&mut self.observation),
            Column::ObservationEnsemble(i) => self.observation_ensemble.get_mut(i),
        }
    }

    /// 按列名展开的全部列，顺序固定
    pub fn columns(&self) -> IndexMap<String, Option<f64>> {
        let n = self.prior_ensemble.len();
        let mut columns = IndexMap::with_capacity(3 * n + 7);
        columns.insert(Column::Truth.name(), self.truth);
        columns.insert(Column::PriorOpenLoop.name(), self.prior_open_loop);
        for i in 0..n {
            columns.insert(Column::PriorEnsemble(i).name(), self.prior_ensemble[i]);
        }
        columns.insert(Column::PriorMean.name(), self.prior_mean);
        columns.insert(Column::PosteriorOpenLoop.name(), self.posterior_open_loop);
        for i in 0..n {
            columns.insert(Column::PosteriorEnsemble(i).name(), self.posterior_ensemble[i]);
        }
        columns.insert(Column::PosteriorMean.name(), self.posterior_mean);
        for i in 0..n {
            columns.insert(
                Column::ObservationEnsemble(i).name(),
                self.observation_ensemble[i],
            );
        }
        columns.insert(Column::Observation.name(), self.observation);
        columns
    }
}

/// 单个状态变量的时间序列表
///
/// 行在某一天第一次写入时创建，每个单元格每天只能写入一次。
#[derive(Debug, Clone)]
pub struct StateTable {
    name: String,
    ensemble_size: usize,
    rows: BTreeMap<usize, StateRow>,
}

impl StateTable {
    pub fn new(name: impl Into<String>, ensemble_size: usize) -> Self {
        Self {
            name: name.into(),
            ensemble_size,
            rows: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ensemble_size(&self) -> usize {
        self.ensemble_size
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn ensure_row(&mut self, day: DayId) -> &mut StateRow {
        let ensemble_size = self.ensemble_size;
        self.rows
            .entry(day.index)
            .or_insert_with(|| StateRow::new(day, ensemble_size))
    }

    /// 写入一个单元格，同一天同一列重复写入会返回 `WriteConflict`
    pub fn insert(&mut self, day: DayId, column: Column, value: f64) -> EnsembleResult<()> {
        if let Some(i) = column.ensemble_index() {
            if i >= self.ensemble_size {
                return Err(EnsembleError::DimensionMismatch {
                    context: format!("状态表 {} 的列 {}", self.name, column),
                    expected: self.ensemble_size,
                    actual: i + 1,
                });
            }
        }

        let table = self.name.clone();
        let row = self.ensure_row(day);
        let slot = row
            .slot_mut(column)
            .ok_or_else(|| EnsembleError::Internal(format!("列不存在: {column}")))?;
        if slot.is_some() {
            return Err(EnsembleError::WriteConflict {
                table,
                day: day.index,
                column: column.name(),
            });
        }
        *slot = Some(value);
        Ok(())
    }

    pub fn get(&self, day_index: usize, column: Column) -> Option<f64> {
        self.rows.get(&day_index).and_then(|row| row.get(column))
    }

    pub fn row(&self, day_index: usize) -> Option<&StateRow> {
        self.rows.get(&day_index)
    }

    /// 读取某天某列，行或单元格缺失时报错
    pub fn require(&self, day_index: usize, column: Column) -> EnsembleResult<f64> {
        let row = self.rows.get(&day_index).ok_or_else(|| EnsembleError::RowNotFound {
            table: self.name.clone(),
            day: day_index,
        })?;
        row.get(column).ok_or_else(|| {
            EnsembleError::Internal(format!(
                "状态表 {} 第 {} 天的列 {} 尚未写入",
                self.name, day_index, column
            ))
        })
    }

    /// 成员在 `day_index` 之前最近一次的后验值
    pub fn last_posterior(&self, member: usize, day_index: usize) -> Option<f64> {
        self.rows
            .range(..day_index)
            .rev()
            .find_map(|(_, row)| row.posterior_ensemble.get(member).copied().flatten())
    }

    pub fn rows(&self) -> impl Iterator<Item = &StateRow> {
        self.rows.values()
    }

    pub fn records(&self) -> Vec<StateRecord> {
        self.rows
            .values()
            .map(|row| StateRecord::from_row(&self.name, row))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(index: usize) -> DayId {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        DayId::new(index, start + chrono::Days::new(index as u64))
    }

    #[test]
    fn test_rows_created_lazily() {
        let mut table = StateTable::new("LAI", 2);
        assert!(table.is_empty());
        table.insert(day(0), Column::PriorEnsemble(1), 1.5).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0, Column::PriorEnsemble(1)), Some(1.5));
        assert_eq!(table.get(0, Column::PriorEnsemble(0)), None);
        assert_eq!(table.get(1, Column::PriorEnsemble(1)), None);
    }

    #[test]
    fn test_second_write_conflicts() {
        let mut table = StateTable::new("LAI", 2);
        table.insert(day(0), Column::Truth, 1.0).unwrap();
        let err = table.insert(day(0), Column::Truth, 2.0).unwrap_err();
        assert!(matches!(err, EnsembleError::WriteConflict { day: 0, .. }));
        assert_eq!(table.get(0, Column::Truth), Some(1.0));
    }

    #[test]
    fn test_member_index_out_of_range() {
        let mut table = StateTable::new("LAI", 2);
        let err = table.insert(day(0), Column::PriorEnsemble(2), 1.0).unwrap_err();
        assert!(matches!(err, EnsembleError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_require_reports_missing_row() {
        let table = StateTable::new("SW1", 1);
        let err = table.require(4, Column::PosteriorEnsemble(0)).unwrap_err();
        assert!(matches!(err, EnsembleError::RowNotFound { day: 4, .. }));
    }

    #[test]
    fn test_last_posterior_skips_missing_days() {
        let mut table = StateTable::new("LAI", 2);
        table.insert(day(0), Column::PosteriorEnsemble(0), 0.5).unwrap();
        table.insert(day(1), Column::PriorEnsemble(0), 0.7).unwrap();
        table.insert(day(2), Column::PriorEnsemble(1), 0.9).unwrap();

        assert_eq!(table.last_posterior(0, 2), Some(0.5));
        assert_eq!(table.last_posterior(1, 2), None);
        assert_eq!(table.last_posterior(0, 0), None);
    }

    #[test]
    fn test_columns_are_named_in_order() {
        let mut table = StateTable::new("LAI", 2);
        table.insert(day(0), Column::PriorMean, 1.0).unwrap();
        let columns = table.row(0).unwrap().columns();
        let names: Vec<_> = columns.keys().cloned().collect();
        assert_eq!(names[0], "truth");
        assert_eq!(names[2], "prior_ensemble_0");
        assert!(names.contains(&"observation_ensemble_1".to_string()));
        assert_eq!(columns["prior_mean"], Some(1.0));
    }
}
