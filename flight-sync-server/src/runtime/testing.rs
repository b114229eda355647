//! Test doubles for the loop collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::network::link::{ConnectivityError, Endpoint, SnapshotSource};
use crate::runtime::render::Renderer;
use crate::runtime::scheduler::TickScheduler;
use crate::sim::command::Command;
use crate::sim::engine::{EngineError, SimulationEngine};
use crate::sim::snapshot::{EntityState, StateSnapshot};

/// Snapshot with one entity, tagged by tick.
pub fn snapshot_at(tick: u64) -> StateSnapshot {
    StateSnapshot {
        tick,
        entities: vec![EntityState::at_rest("Habitat", [tick as f64, 0.0])],
        ..Default::default()
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Engine that records every call.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    pub state: StateSnapshot,
    pub applied: Vec<Command>,
    pub steps: u64,
    pub set_states: Vec<u64>,
    /// Returned for every command after the first `fail_after` applied ones.
    pub failure: Option<EngineError>,
    pub fail_after: usize,
}

impl RecordingEngine {
    pub fn new(state: StateSnapshot) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    pub fn failing(error: EngineError) -> Self {
        Self {
            failure: Some(error),
            ..Default::default()
        }
    }
}

impl SimulationEngine for RecordingEngine {
    fn get_state(&self) -> StateSnapshot {
        self.state.clone()
    }

    fn set_state(&mut self, state: StateSnapshot) {
        self.set_states.push(state.tick);
        self.state = state;
    }

    fn handle_request(&mut self, command: &Command) -> Result<(), EngineError> {
        assert!(!command.is_noop(), "no-op reached the engine");
        if let Some(error) = &self.failure {
            if self.applied.len() >= self.fail_after {
                return Err(error.clone());
            }
        }
        self.applied.push(command.clone());
        Ok(())
    }

    fn step(&mut self) -> Result<(), EngineError> {
        self.steps += 1;
        self.state.tick += 1;
        Ok(())
    }
}

// =============================================================================
// RENDERER
// =============================================================================

/// Renderer fed from scripted input batches.
#[derive(Debug)]
pub struct MockRenderer {
    /// One batch is handed out per `pop_commands` call.
    pub input: VecDeque<Vec<Command>>,
    pub networking: bool,
    pub drawn: Vec<u64>,
    pub pops: usize,
    pub rates: usize,
    pub shutdowns: usize,
    pub ungraceful_shutdowns: usize,
    pacer: Option<TickScheduler>,
}

impl Default for MockRenderer {
    fn default() -> Self {
        Self {
            input: VecDeque::new(),
            networking: true,
            drawn: Vec::new(),
            pops: 0,
            rates: 0,
            shutdowns: 0,
            ungraceful_shutdowns: 0,
            pacer: None,
        }
    }
}

impl MockRenderer {
    pub fn shared() -> Arc<Mutex<MockRenderer>> {
        Arc::new(Mutex::new(Self::default()))
    }
}

impl Renderer for MockRenderer {
    fn pop_commands(&mut self) -> Vec<Command> {
        self.pops += 1;
        self.input.pop_front().unwrap_or_default()
    }

    fn draw(&mut self, state: &StateSnapshot) {
        self.drawn.push(state.tick);
    }

    fn rate(&mut self, frames_per_second: u32) {
        self.rates += 1;
        self.pacer
            .get_or_insert_with(|| TickScheduler::from_frame_rate(frames_per_second))
            .wait();
    }

    fn lead_server_communication_requested(&mut self) -> bool {
        self.networking
    }

    fn shutdown(&mut self) {
        self.shutdowns += 1;
    }

    fn ungraceful_shutdown(&mut self) {
        self.ungraceful_shutdowns += 1;
    }
}

// =============================================================================
// SNAPSHOT SOURCE
// =============================================================================

/// Test-side controls of a `ScriptedSource`.
#[derive(Debug, Clone, Default)]
pub struct SourceHandle {
    pub fetches: Arc<AtomicUsize>,
    pub failing: Arc<AtomicBool>,
}

impl SourceHandle {
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

/// Source whose n-th successful fetch returns `snapshot_at(base + n)`.
#[derive(Debug)]
pub struct ScriptedSource {
    endpoint: Endpoint,
    base: u64,
    served: u64,
    handle: SourceHandle,
}

impl ScriptedSource {
    pub fn new(base: u64) -> (Self, SourceHandle) {
        let handle = SourceHandle::default();
        let source = Self {
            endpoint: Endpoint::new("lead.test", 28430),
            base,
            served: 0,
            handle: handle.clone(),
        };
        (source, handle)
    }
}

impl SnapshotSource for ScriptedSource {
    fn fetch(&mut self) -> Result<StateSnapshot, ConnectivityError> {
        self.handle.fetches.fetch_add(1, Ordering::SeqCst);
        if self.handle.failing.load(Ordering::SeqCst) {
            return Err(ConnectivityError::Closed);
        }
        self.served += 1;
        Ok(snapshot_at(self.base + self.served))
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}
