//! Mock implementations for testing
//!
//! Runnables that record their execution, fail or panic on demand, and an
//! in-memory domain model with scripted daily growth.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ensemble_core::{EnsembleError, EnsembleResult};
use ensemble_dispatcher::{JobContext, Runnable};
use ensemble_domain::{DayId, DomainModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Finished,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub job: String,
    pub kind: EventKind,
    pub at: Instant,
}

/// Shared, ordered log of job start/finish events
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, job: &str, kind: EventKind) {
        self.events.lock().push(Event {
            job: job.to_string(),
            kind,
            at: Instant::now(),
        });
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn position(&self, job: &str, kind: EventKind) -> Option<usize> {
        self.events
            .lock()
            .iter()
            .position(|e| e.job == job && e.kind == kind)
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }

    /// Highest number of jobs observed running at the same time
    pub fn max_concurrency(&self) -> usize {
        let mut running = 0usize;
        let mut max = 0usize;
        for event in self.events.lock().iter() {
            match event.kind {
                EventKind::Started => {
                    running += 1;
                    max = max.max(running);
                }
                EventKind::Finished => running = running.saturating_sub(1),
            }
        }
        max
    }
}

/// Runnable that sleeps and records its start and finish
pub struct RecordingJob {
    name: String,
    kind: &'static str,
    intensive: bool,
    duration: Duration,
    log: EventLog,
}

impl RecordingJob {
    pub fn new(name: &str, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            kind: "recording",
            intensive: false,
            duration: Duration::from_millis(20),
            log: log.clone(),
        }
    }

    pub fn intensive(mut self) -> Self {
        self.intensive = true;
        self
    }

    pub fn with_kind(mut self, kind: &'static str) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn into_arc(self) -> Arc<dyn Runnable> {
        Arc::new(self)
    }
}

impl Runnable for RecordingJob {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> &'static str {
        self.kind
    }

    fn is_resource_intensive(&self) -> bool {
        self.intensive
    }

    fn run(&self, _ctx: &JobContext) -> EnsembleResult<()> {
        self.log.record(&self.name, EventKind::Started);
        std::thread::sleep(self.duration);
        self.log.record(&self.name, EventKind::Finished);
        Ok(())
    }
}

/// Runnable that always returns an error
pub struct FailingJob {
    name: String,
    message: String,
}

impl FailingJob {
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
        }
    }

    pub fn into_arc(self) -> Arc<dyn Runnable> {
        Arc::new(self)
    }
}

impl Runnable for FailingJob {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> &'static str {
        "failing"
    }

    fn run(&self, _ctx: &JobContext) -> EnsembleResult<()> {
        Err(EnsembleError::Internal(self.message.clone()))
    }
}

/// Runnable that panics
pub struct PanickingJob {
    name: String,
}

impl PanickingJob {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn into_arc(self) -> Arc<dyn Runnable> {
        Arc::new(self)
    }
}

impl Runnable for PanickingJob {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> &'static str {
        "panicking"
    }

    fn run(&self, _ctx: &JobContext) -> EnsembleResult<()> {
        panic!("{} panicked on purpose", self.name);
    }
}

/// A value written into the model through `set`
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub day: Option<usize>,
    pub name: String,
    pub value: f64,
}

/// In-memory domain model
///
/// Each variable grows by a fixed amount per day. Writes are recorded in a
/// shared log that stays readable after the model is handed to a job.
#[derive(Debug, Clone)]
pub struct MockDomainModel {
    values: IndexMap<String, f64>,
    growth: IndexMap<String, f64>,
    fail_on_day: Option<usize>,
    current_day: Option<usize>,
    writes: Arc<Mutex<Vec<Write>>>,
}

impl MockDomainModel {
    pub fn new(values: &[(&str, f64)]) -> Self {
        Self {
            values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            growth: IndexMap::new(),
            fail_on_day: None,
            current_day: None,
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_growth(mut self, name: &str, per_day: f64) -> Self {
        self.growth.insert(name.to_string(), per_day);
        self
    }

    /// `advance` returns an error on this day
    pub fn failing_on_day(mut self, day: usize) -> Self {
        self.fail_on_day = Some(day);
        self
    }

    pub fn write_log(&self) -> Arc<Mutex<Vec<Write>>> {
        self.writes.clone()
    }

    pub fn boxed(self) -> Box<dyn DomainModel> {
        Box::new(self)
    }
}

impl DomainModel for MockDomainModel {
    fn has_variable(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    fn get(&self, name: &str) -> EnsembleResult<f64> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| EnsembleError::configuration(format!("unknown variable {name}")))
    }

    fn set(&mut self, name: &str, value: f64) -> EnsembleResult<()> {
        let slot = self
            .values
            .get_mut(name)
            .ok_or_else(|| EnsembleError::configuration(format!("unknown variable {name}")))?;
        *slot = value;
        self.writes.lock().push(Write {
            day: self.current_day,
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    fn advance(&mut self, day: &DayId) -> EnsembleResult<()> {
        if self.fail_on_day == Some(day.index) {
            return Err(EnsembleError::Internal(format!(
                "mock model failed on day {}",
                day.index
            )));
        }
        self.current_day = Some(day.index);
        for (name, delta) in &self.growth {
            if let Some(value) = self.values.get_mut(name) {
                *value += delta;
            }
        }
        Ok(())
    }
}
