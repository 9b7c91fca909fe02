use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use studio_core::{Crew, CrewContext, CrewOutput, FnCrew};

/// Crew that always returns a clone of `output`
pub fn static_crew(name: &str, output: CrewOutput) -> Arc<dyn Crew> {
    Arc::new(FnCrew::new(name, move |_ctx| {
        let output = output.clone();
        async move { Ok(output) }
    }))
}

/// Crew answering with `outputs` in order, then plain success
pub fn scripted_crew(name: &str, outputs: Vec<CrewOutput>) -> Arc<dyn Crew> {
    let queue = Arc::new(Mutex::new(VecDeque::from(outputs)));
    Arc::new(FnCrew::new(name, move |_ctx| {
        let next = queue.lock().pop_front().unwrap_or_else(CrewOutput::success);
        async move { Ok(next) }
    }))
}

/// Crew that records every context it receives
pub struct RecordingCrew {
    name: String,
    pub contexts: Mutex<Vec<CrewContext>>,
    pub invocations: AtomicUsize,
}

impl RecordingCrew {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            contexts: Mutex::new(Vec::new()),
            invocations: AtomicUsize::new(0),
        })
    }

    pub fn count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn states(&self) -> Vec<String> {
        self.contexts.lock().iter().map(|c| c.state.clone()).collect()
    }
}

#[async_trait::async_trait]
impl Crew for RecordingCrew {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, context: CrewContext) -> Result<CrewOutput, studio_core::CrewError> {
        let n = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        let state = context.state.clone();
        self.contexts.lock().push(context);
        let mut visits = Map::new();
        visits.insert(state, json!(n));
        Ok(CrewOutput::success().with_field("visits", Value::Object(visits)))
    }
}
