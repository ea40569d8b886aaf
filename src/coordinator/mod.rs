//! Process-level orchestration of transform runs
//!
//! The coordinator admits runs, enforces the at-most-one-in-flight-per-
//! tracing guarantee, spawns isolated workers, relays their progress into a
//! shared registry, and surfaces typed outcomes with a stable exit-code
//! mapping. It performs no blocking I/O of its own; workers are the only
//! place volumes are opened.
//!
//! # Architecture
//!
//! Admission runs on the caller's thread: every input record is looked up,
//! referenced files are checked on disk, and the tracing id is registered —
//! all before a worker starts, so a declined run never spawns anything. The
//! worker executes the pipeline behind a panic boundary and always clears
//! its registry entry on the way out, whatever the outcome.
//!
//! - [`TransformCoordinator`] - Admission, registry ownership, worker spawn
//! - [`CoordinatorEvents`] - Caller-side handle on the event stream
//! - [`RunTicket`] - Handle on one spawned run; `wait` yields the outcome
//! - [`RunOutcome`] - Terminal result with exit codes 0, 1 and 2
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tracemap::config::ServiceConfig;
//! use tracemap::coordinator::{CoordinatorEvent, TransformCoordinator};
//!
//! let (coordinator, events) =
//!     TransformCoordinator::new(ServiceConfig::default(), store, provider);
//!
//! let ticket = coordinator.apply_transform(&tracing_id, "src-1", "reg-1")?;
//! let outcome = ticket.wait();
//! for event in events.drain() {
//!     if let CoordinatorEvent::Progress(update) = event {
//!         println!("{:?}", update.output_node_count);
//!     }
//! }
//! std::process::exit(outcome.exit_code());
//! ```

pub mod worker;

pub use worker::TransformWorker;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::atlas::RegionCatalog;
use crate::config::ServiceConfig;
use crate::error::{Result, TransformError};
use crate::storage::TransformStore;
use crate::transform::{GridProvider, ProgressUpdate, RunSummary, TransformPipeline};
use crate::types::{RegistrationTransform, SourceNode, TracingId};

use self::worker::RegistrySink;

/// Registry entry for one in-flight run
#[derive(Debug, Clone, PartialEq)]
pub struct RunProgress {
    /// Tracing being transformed
    pub tracing_id: TracingId,
    /// When the run was admitted
    pub started_at: DateTime<Utc>,
    /// Input total, once the worker has reported it
    pub input_node_count: Option<u64>,
    /// Latest output count reported by the worker
    pub output_node_count: Option<u64>,
}

impl RunProgress {
    fn new(tracing_id: TracingId) -> Self {
        Self {
            tracing_id,
            started_at: Utc::now(),
            input_node_count: None,
            output_node_count: None,
        }
    }
}

/// Terminal outcome of one run
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The run finished; persisted output was replaced when a tracing id
    /// was given
    Completed(RunSummary),
    /// The run was declined at admission: a missing input or an already
    /// running tracing
    Declined(String),
    /// The run started but did not complete
    Failed(String),
}

impl RunOutcome {
    /// Exit code for worker processes: 0 completed, 1 declined, 2 failed
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed(_) => 0,
            RunOutcome::Declined(_) => 1,
            RunOutcome::Failed(_) => 2,
        }
    }

    /// Fold a run result into an outcome
    pub fn from_result(result: Result<RunSummary>) -> Self {
        match result {
            Ok(summary) => RunOutcome::Completed(summary),
            Err(err) if err.is_declined() => RunOutcome::Declined(err.to_string()),
            Err(err) => RunOutcome::Failed(err.to_string()),
        }
    }
}

/// Events emitted by the coordinator and its workers
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    /// A run was admitted
    Started {
        /// Tracing the run belongs to
        tracing_id: TracingId,
    },
    /// A progress report from a running worker
    Progress(ProgressUpdate),
    /// A run reached its terminal outcome
    Completed {
        /// Tracing the run belonged to
        tracing_id: TracingId,
        /// How it ended
        outcome: RunOutcome,
    },
}

/// Caller-side handle on the coordinator's event stream. Events are
/// best-effort (a full channel drops them); the authoritative outcome of a
/// spawned run is its [`RunTicket`].
pub struct CoordinatorEvents {
    receiver: Receiver<CoordinatorEvent>,
}

impl CoordinatorEvents {
    /// Next pending event, if any
    pub fn try_recv(&self) -> Option<CoordinatorEvent> {
        self.receiver.try_recv().ok()
    }

    /// All pending events
    pub fn drain(&self) -> Vec<CoordinatorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Handle on one spawned run
#[derive(Debug)]
pub struct RunTicket {
    tracing_id: TracingId,
    outcome: Receiver<RunOutcome>,
    handle: JoinHandle<()>,
}

impl RunTicket {
    /// Tracing this run belongs to
    pub fn tracing_id(&self) -> &TracingId {
        &self.tracing_id
    }

    /// Whether the worker has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the worker reports its terminal outcome
    pub fn wait(self) -> RunOutcome {
        let outcome = self.outcome.recv().unwrap_or_else(|_| {
            RunOutcome::Failed("worker exited without reporting an outcome".to_string())
        });
        let _ = self.handle.join();
        outcome
    }
}

/// Lock the run registry, recovering the map if a panicking holder poisoned
/// it. Leaving it poisoned would wedge every future run on AlreadyRunning.
pub(crate) fn lock_registry(
    registry: &Mutex<HashMap<TracingId, RunProgress>>,
) -> MutexGuard<'_, HashMap<TracingId, RunProgress>> {
    registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Admitted {
    nodes: Vec<SourceNode>,
    registration: RegistrationTransform,
    catalog: RegionCatalog,
}

/// Admits and supervises transform runs
pub struct TransformCoordinator {
    config: ServiceConfig,
    store: Arc<dyn TransformStore>,
    provider: Arc<dyn GridProvider>,
    registry: Arc<Mutex<HashMap<TracingId, RunProgress>>>,
    events: Sender<CoordinatorEvent>,
}

impl TransformCoordinator {
    /// Create a coordinator and the event stream its workers report into
    pub fn new(
        config: ServiceConfig,
        store: Arc<dyn TransformStore>,
        provider: Arc<dyn GridProvider>,
    ) -> (Self, CoordinatorEvents) {
        let (event_tx, event_rx) = bounded(config.coordinator.event_capacity);
        let coordinator = Self {
            config,
            store,
            provider,
            registry: Arc::new(Mutex::new(HashMap::new())),
            events: event_tx,
        };
        (coordinator, CoordinatorEvents { receiver: event_rx })
    }

    /// Whether a run is currently in flight for a tracing
    pub fn is_running(&self, tracing_id: &TracingId) -> bool {
        lock_registry(&self.registry).contains_key(tracing_id)
    }

    /// Number of runs currently in flight
    pub fn running_count(&self) -> usize {
        lock_registry(&self.registry).len()
    }

    /// Progress snapshot for an in-flight run
    pub fn progress(&self, tracing_id: &TracingId) -> Option<RunProgress> {
        lock_registry(&self.registry).get(tracing_id).cloned()
    }

    /// Admit one run and start it on a dedicated worker thread.
    ///
    /// Fails fast, without starting a worker, when any input record is
    /// missing, a referenced file is absent, or the tracing already has a
    /// run in flight. On success the returned ticket owns the outcome.
    pub fn apply_transform(
        &self,
        tracing_id: &TracingId,
        source_tracing_id: &str,
        registration_id: &str,
    ) -> Result<RunTicket> {
        let admitted = self.admit(tracing_id, source_tracing_id, registration_id)?;
        self.emit(CoordinatorEvent::Started {
            tracing_id: tracing_id.clone(),
        });

        let worker = self.build_worker(tracing_id, admitted);
        let (outcome_tx, outcome_rx) = bounded(1);
        let registry = Arc::clone(&self.registry);
        let events = self.events.clone();
        let id = tracing_id.clone();
        let handle = std::thread::spawn(move || {
            let mut sink = RegistrySink::new(Arc::clone(&registry), events.clone());
            let outcome = worker.run(&mut sink);
            // Clear the entry before anyone can observe the outcome, so a
            // follow-up run for the same tracing is admitted.
            lock_registry(&registry).remove(&id);
            if events
                .try_send(CoordinatorEvent::Completed {
                    tracing_id: id,
                    outcome: outcome.clone(),
                })
                .is_err()
            {
                tracing::debug!("Event channel full or closed, dropping completion event");
            }
            let _ = outcome_tx.send(outcome);
        });

        tracing::info!("Started transform worker for {}", tracing_id);
        Ok(RunTicket {
            tracing_id: tracing_id.clone(),
            outcome: outcome_rx,
            handle,
        })
    }

    /// Admit one run and execute it on the caller's thread. Same admission
    /// rules and events as [`apply_transform`], without worker isolation.
    ///
    /// [`apply_transform`]: TransformCoordinator::apply_transform
    pub fn apply_transform_blocking(
        &self,
        tracing_id: &TracingId,
        source_tracing_id: &str,
        registration_id: &str,
    ) -> RunOutcome {
        let admitted = match self.admit(tracing_id, source_tracing_id, registration_id) {
            Ok(admitted) => admitted,
            Err(err) if err.is_declined() => return RunOutcome::Declined(err.to_string()),
            Err(err) => return RunOutcome::Failed(err.to_string()),
        };
        self.emit(CoordinatorEvent::Started {
            tracing_id: tracing_id.clone(),
        });

        let worker = self.build_worker(tracing_id, admitted);
        let mut sink = RegistrySink::new(Arc::clone(&self.registry), self.events.clone());
        let outcome = worker.run(&mut sink);
        lock_registry(&self.registry).remove(tracing_id);
        self.emit(CoordinatorEvent::Completed {
            tracing_id: tracing_id.clone(),
            outcome: outcome.clone(),
        });
        outcome
    }

    fn build_worker(&self, tracing_id: &TracingId, admitted: Admitted) -> TransformWorker {
        TransformWorker::new(
            tracing_id.clone(),
            admitted.nodes,
            admitted.registration,
            admitted.catalog,
            TransformPipeline::new(Arc::clone(&self.provider), Arc::clone(&self.store)),
        )
    }

    fn emit(&self, event: CoordinatorEvent) {
        if self.events.try_send(event).is_err() {
            tracing::trace!("Event channel full or closed, dropping event");
        }
    }

    /// Check every admission rule, then register the run. Registration is a
    /// check-and-insert under one registry lock, which is what makes the
    /// single-flight guarantee hold against concurrent callers.
    fn admit(
        &self,
        tracing_id: &TracingId,
        source_tracing_id: &str,
        registration_id: &str,
    ) -> Result<Admitted> {
        if self.store.find_tracing(tracing_id)?.is_none() {
            return Err(TransformError::InputMissing(format!(
                "tracing {}",
                tracing_id
            )));
        }
        let nodes = self.store.source_nodes(source_tracing_id)?.ok_or_else(|| {
            TransformError::InputMissing(format!("source tracing {}", source_tracing_id))
        })?;
        let registration = self.store.find_registration(registration_id)?.ok_or_else(|| {
            TransformError::InputMissing(format!("registration transform {}", registration_id))
        })?;
        if !registration.location.exists() {
            return Err(TransformError::InputMissing(format!(
                "registration volume file {}",
                registration.location.display()
            )));
        }
        for path in self.config.atlas.required_files() {
            if !path.exists() {
                return Err(TransformError::InputMissing(format!(
                    "atlas resource {}",
                    path.display()
                )));
            }
        }
        let catalog = self.store.region_catalog()?;

        let mut registry = lock_registry(&self.registry);
        if registry.contains_key(tracing_id) {
            return Err(TransformError::AlreadyRunning(tracing_id.to_string()));
        }
        registry.insert(tracing_id.clone(), RunProgress::new(tracing_id.clone()));
        drop(registry);

        tracing::debug!(
            "Admitted transform for {} ({} nodes, registration {})",
            tracing_id,
            nodes.len(),
            registration_id
        );
        Ok(Admitted {
            nodes,
            registration,
            catalog,
        })
    }
}
