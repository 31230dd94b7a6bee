use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::observation::ObservationModel;
use crate::results::StateRecord;
use crate::state_table::StateTable;
use crate::states_of_the_day::StatesOfTheDay;
use crate::value_objects::{Column, DayId, WorkerRole};
use ensemble_core::{EnsembleError, EnsembleResult, MissingMemberPolicy};

/// 所有状态变量的状态表集合，按状态向量顺序排列
///
/// 每张表各自加锁，工作线程写先验时只短暂持有写锁。
#[derive(Debug)]
pub struct StateStore {
    ensemble_size: usize,
    tables: IndexMap<String, RwLock<StateTable>>,
}

impl StateStore {
    pub fn new(state_names: &[String], ensemble_size: usize) -> Self {
        let tables = state_names
            .iter()
            .map(|name| (name.clone(), RwLock::new(StateTable::new(name, ensemble_size))))
            .collect();
        Self {
            ensemble_size,
            tables,
        }
    }

    pub fn ensemble_size(&self) -> usize {
        self.ensemble_size
    }

    pub fn state_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn n_states(&self) -> usize {
        self.tables.len()
    }

    fn check_len(&self, context: &str, len: usize) -> EnsembleResult<()> {
        if len != self.tables.len() {
            return Err(EnsembleError::DimensionMismatch {
                context: context.to_string(),
                expected: self.tables.len(),
                actual: len,
            });
        }
        Ok(())
    }

    /// 写入某个角色当天的先验值，`values` 按状态向量顺序
    pub fn write_prior(&self, day: DayId, role: WorkerRole, values: &[f64]) -> EnsembleResult<()> {
        self.check_len("先验状态向量", values.len())?;
        let column = role.prior_column();
        for (table, value) in self.tables.values().zip(values) {
            table.write().insert(day, column, *value)?;
        }
        debug!(day = day.index, role = %role, "先验已写入");
        Ok(())
    }

    /// 读取某个角色当天的后验值
    pub fn read_posterior(&self, day_index: usize, role: WorkerRole) -> EnsembleResult<Vec<f64>> {
        let column = role.posterior_column().ok_or_else(|| {
            EnsembleError::Internal(format!("角色 {role} 没有后验列"))
        })?;
        self.tables
            .values()
            .map(|table| table.read().require(day_index, column))
            .collect()
    }

    /// 组装当天的同化输入
    ///
    /// `present` 为当天已写入先验的角色；缺席的集合成员按 `policy` 处理。
    pub fn gather(
        &self,
        day: DayId,
        present: &[WorkerRole],
        policy: MissingMemberPolicy,
        observations: DVector<f64>,
    ) -> EnsembleResult<StatesOfTheDay> {
        let mut members: Vec<usize> = present.iter().filter_map(|r| r.member_index()).collect();
        members.sort_unstable();
        members.dedup();

        let absent: Vec<usize> = (0..self.ensemble_size)
            .filter(|i| !members.contains(i))
            .collect();

        if !absent.is_empty() {
            match policy {
                MissingMemberPolicy::Exclude => {
                    warn!(day = day.index, absent = ?absent, "集合成员缺失，当天剔除");
                }
                MissingMemberPolicy::CarryForward => {
                    for member in absent {
                        if self.carry_forward(day, member)? {
                            members.push(member);
                        } else {
                            warn!(day = day.index, member, "集合成员缺失且没有历史后验，当天剔除");
                        }
                    }
                    members.sort_unstable();
                }
            }
        }

        let n_states = self.tables.len();
        let mut prior = DMatrix::zeros(n_states, members.len());
        for (r, table) in self.tables.values().enumerate() {
            let table = table.read();
            for (c, member) in members.iter().enumerate() {
                prior[(r, c)] = table.require(day.index, Column::PriorEnsemble(*member))?;
            }
        }

        let prior_open_loop = if present.contains(&WorkerRole::OpenLoop) {
            let values = self
                .tables
                .values()
                .map(|table| table.read().require(day.index, Column::PriorOpenLoop))
                .collect::<EnsembleResult<Vec<f64>>>()?;
            Some(DVector::from_vec(values))
        } else {
            None
        };

        StatesOfTheDay::new(
            day,
            self.state_names(),
            members,
            prior,
            prior_open_loop,
            observations,
        )
    }

    /// 用成员最近一次的后验填充其当天先验，没有历史后验时返回 false
    fn carry_forward(&self, day: DayId, member: usize) -> EnsembleResult<bool> {
        let mut values = Vec::with_capacity(self.tables.len());
        for table in self.tables.values() {
            match table.read().last_posterior(member, day.index) {
                Some(v) => values.push(v),
                None => return Ok(false),
            }
        }
        for (table, value) in self.tables.values().zip(values) {
            table.write().insert(day, Column::PriorEnsemble(member), value)?;
        }
        debug!(day = day.index, member, "沿用上一次后验作为先验");
        Ok(true)
    }

    /// 写回同化结果：后验、均值与观测诊断
    pub fn publish(&self, states: &StatesOfTheDay, model: &ObservationModel) -> EnsembleResult<()> {
        self.check_len("后验矩阵行数", states.n_states())?;
        let day = states.day;
        let has_members = states.n_members() > 0;

        for (r, table) in self.tables.values().enumerate() {
            let mut table = table.write();
            for (c, member) in states.members.iter().enumerate() {
                table.insert(day, Column::PosteriorEnsemble(*member), states.posterior[(r, c)])?;
            }
            if let Some(open_loop) = &states.posterior_open_loop {
                table.insert(day, Column::PosteriorOpenLoop, open_loop[r])?;
            }
            if has_members {
                table.insert(day, Column::PriorMean, states.prior_mean[r])?;
                table.insert(day, Column::PosteriorMean, states.posterior_mean[r])?;
            } else {
                table.ensure_row(day);
            }
        }

        for i in 0..states.observations.len() {
            let observed = states.observations[i];
            if observed.is_nan() {
                continue;
            }
            let row = model.primary_row(i);
            let Some((_, table)) = self.tables.get_index(row) else {
                continue;
            };
            let mut table = table.write();
            // 每张表每天只有一个观测列，同一主状态的后续观测不写入诊断
            if table.get(day.index, Column::Observation).is_some() {
                debug!(
                    day = day.index,
                    table = %table.name(),
                    observation = %model.names()[i],
                    "主状态已有观测记录，跳过该观测的诊断值"
                );
                continue;
            }
            table.insert(day, Column::Observation, observed)?;
            for (c, member) in states.members.iter().enumerate() {
                let perturbed = states.observations_perturbed[(i, c)];
                if !perturbed.is_nan() {
                    table.insert(day, Column::ObservationEnsemble(*member), perturbed)?;
                }
            }
        }

        debug!(day = day.index, members = states.n_members(), "后验已发布");
        Ok(())
    }

    /// 在读锁下访问一张状态表
    pub fn with_table<R>(&self, name: &str, f: impl FnOnce(&StateTable) -> R) -> Option<R> {
        self.tables.get(name).map(|table| f(&table.read()))
    }

    pub fn get(&self, name: &str, day_index: usize, column: Column) -> Option<f64> {
        self.with_table(name, |table| table.get(day_index, column))
            .flatten()
    }

    /// 所有表的导出记录，先按表再按天排序
    pub fn records(&self) -> Vec<StateRecord> {
        self.tables
            .values()
            .flat_map(|table| table.read().records())
            .collect()
    }
}
