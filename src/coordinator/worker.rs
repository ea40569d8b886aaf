//! Worker-side execution of one admitted run
//!
//! A [`TransformWorker`] owns everything one run needs — the nodes, the
//! registration, the region catalog and a pipeline — and executes it behind
//! a panic boundary, so a crash while decoding a volume surfaces as a failed
//! outcome instead of taking the coordinating service down. Progress flows
//! through [`RegistrySink`], which updates the shared run registry and
//! forwards each report onto the coordinator's event channel.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crossbeam_channel::Sender;

use crate::atlas::RegionCatalog;
use crate::coordinator::{lock_registry, CoordinatorEvent, RunOutcome, RunProgress};
use crate::transform::{ProgressSink, ProgressUpdate, TransformPipeline};
use crate::types::{RegistrationTransform, SourceNode, TracingId};

/// Executes one admitted transform run
pub struct TransformWorker {
    tracing_id: TracingId,
    nodes: Vec<SourceNode>,
    registration: RegistrationTransform,
    catalog: RegionCatalog,
    pipeline: TransformPipeline,
}

impl TransformWorker {
    /// Bundle one admitted run for execution
    pub(crate) fn new(
        tracing_id: TracingId,
        nodes: Vec<SourceNode>,
        registration: RegistrationTransform,
        catalog: RegionCatalog,
        pipeline: TransformPipeline,
    ) -> Self {
        Self {
            tracing_id,
            nodes,
            registration,
            catalog,
            pipeline,
        }
    }

    /// Run the pipeline behind a panic boundary and fold the result into a
    /// [`RunOutcome`]. Never panics outward.
    pub fn run(self, progress: &mut dyn ProgressSink) -> RunOutcome {
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.pipeline.run(
                Some(&self.tracing_id),
                &self.nodes,
                &self.registration,
                &self.catalog,
                progress,
            )
        }));

        match result {
            Ok(result) => {
                if let Err(err) = &result {
                    tracing::error!("Transform for {} failed: {}", self.tracing_id, err);
                }
                RunOutcome::from_result(result.map(|output| output.summary))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(
                    "Transform worker for {} crashed: {}",
                    self.tracing_id,
                    message
                );
                RunOutcome::Failed(message)
            }
        }
    }
}

/// Progress sink that updates the shared run registry and forwards every
/// report onto the event channel. Reports never block: a full event channel
/// drops the report.
pub(crate) struct RegistrySink {
    registry: Arc<Mutex<HashMap<TracingId, RunProgress>>>,
    events: Sender<CoordinatorEvent>,
}

impl RegistrySink {
    pub(crate) fn new(
        registry: Arc<Mutex<HashMap<TracingId, RunProgress>>>,
        events: Sender<CoordinatorEvent>,
    ) -> Self {
        Self { registry, events }
    }
}

impl ProgressSink for RegistrySink {
    fn report(&mut self, update: ProgressUpdate) {
        if let Some(id) = &update.tracing_id {
            let mut registry = lock_registry(&self.registry);
            if let Some(entry) = registry.get_mut(id) {
                if let Some(count) = update.input_node_count {
                    entry.input_node_count = Some(count);
                }
                if let Some(count) = update.output_node_count {
                    entry.output_node_count = Some(count);
                }
            }
        }
        if self
            .events
            .try_send(CoordinatorEvent::Progress(update))
            .is_err()
        {
            tracing::trace!("Event channel full or closed, dropping progress event");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("worker panicked: {}", message)
    } else {
        "worker panicked".to_string()
    }
}
