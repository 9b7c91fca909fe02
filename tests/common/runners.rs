use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use studio_core::orchestration::StepError;
use studio_core::{StepRunner, WorkItem};

/// Records invocation order and tracks how many steps overlap
#[derive(Debug, Default)]
pub struct InstrumentedRunner {
    latency: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl InstrumentedRunner {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl StepRunner for InstrumentedRunner {
    async fn run_step(
        &self,
        item: &WorkItem,
        _step_index: usize,
        step: &str,
        _outputs: &[Value],
    ) -> Result<Value, StepError> {
        self.calls.lock().push(item.id.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({"work_item_id": item.id, "step": step}))
    }
}

/// Fails every step of the listed work items with a transient error
#[derive(Debug, Default)]
pub struct FailingRunner {
    failing: Vec<String>,
    calls: Mutex<HashMap<String, u32>>,
}

impl FailingRunner {
    pub fn new<I, S>(failing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failing: failing.into_iter().map(Into::into).collect(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn calls_for(&self, id: &str) -> u32 {
        self.calls.lock().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl StepRunner for FailingRunner {
    async fn run_step(
        &self,
        item: &WorkItem,
        _step_index: usize,
        step: &str,
        _outputs: &[Value],
    ) -> Result<Value, StepError> {
        *self.calls.lock().entry(item.id.clone()).or_insert(0) += 1;
        if self.failing.iter().any(|id| id == &item.id) {
            return Err(StepError::transient(format!("{step} keeps failing")));
        }
        Ok(json!(step))
    }
}
