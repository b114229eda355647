//! Mirror Loop
//!
//! Replica control loop with two modes:
//!
//! - `Networked`: the engine follows the lead. Snapshots are pulled at most
//!   once per fetch interval and overwrite the engine state; between
//!   fetches the last fetched state is drawn. Local commands are drained
//!   and discarded every tick.
//! - `Local`: nothing is fetched. Local commands are applied and the
//!   engine steps on its own.
//!
//! A fetch is due once more than the fetch interval has passed since the
//! last attempt. A failed fetch is logged and retried one fetch interval
//! after the failed attempt; the mirror stays `Networked` and keeps drawing
//! its current state.
//!
//! Any mode switch discards pending local commands. Returning to
//! `Networked` also resets the engine to the last fetched snapshot and
//! makes a fetch due at once.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::network::link::{Endpoint, SnapshotSource};
use crate::runtime::apply::apply_commands;
use crate::runtime::render::SharedRenderer;
use crate::runtime::scheduler::TickScheduler;
use crate::runtime::{LoopError, Tick, TickReport};
use crate::sim::engine::SimulationEngine;
use crate::sim::snapshot::StateSnapshot;

/// Who drives a mirror's engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Following the lead.
    Networked,
    /// Driven by local commands.
    Local,
}

impl ConnectionMode {
    fn requested(networking: bool) -> Self {
        if networking {
            ConnectionMode::Networked
        } else {
            ConnectionMode::Local
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::Networked => f.write_str("networked"),
            ConnectionMode::Local => f.write_str("local"),
        }
    }
}

/// Replica control loop.
pub struct MirrorLoop<E, S> {
    engine: E,
    source: S,
    renderer: Option<SharedRenderer>,
    scheduler: TickScheduler,
    mode: ConnectionMode,
    fetch_interval: Duration,
    last_attempt: Option<Instant>,
    last_fetched: StateSnapshot,
}

impl<E: SimulationEngine, S: SnapshotSource> MirrorLoop<E, S> {
    /// Create a mirror loop, fetching the initial snapshot from the lead.
    ///
    /// Fails if that first fetch fails: there is nothing valid to draw.
    pub fn new(
        mut engine: E,
        mut source: S,
        renderer: Option<SharedRenderer>,
        scheduler: TickScheduler,
        fetch_interval: Duration,
    ) -> Result<Self, LoopError> {
        let snapshot = source.fetch().map_err(|e| LoopError::InitialFetch {
            endpoint: source.endpoint().clone(),
            source: e,
        })?;
        info!(
            tick = snapshot.tick,
            "Mirroring lead server {}",
            source.endpoint()
        );
        engine.set_state(snapshot.clone());

        Ok(Self {
            engine,
            source,
            renderer,
            scheduler,
            mode: ConnectionMode::Networked,
            fetch_interval,
            last_attempt: Some(Instant::now()),
            last_fetched: snapshot,
        })
    }

    /// Current mode.
    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    /// The engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Lead this mirror follows.
    pub fn endpoint(&self) -> &Endpoint {
        self.source.endpoint()
    }

    /// Last snapshot successfully fetched from the lead.
    pub fn last_fetched(&self) -> &StateSnapshot {
        &self.last_fetched
    }

    fn fetch_due(&self, now: Instant) -> bool {
        self.last_attempt
            .map_or(true, |at| now.duration_since(at) > self.fetch_interval)
    }

    fn switch_mode(&mut self, mode: ConnectionMode, report: &mut TickReport) {
        info!("Mirror is now {} (lead server {})", mode, self.endpoint());
        // Input queued before the switch was entered under the old mode.
        if let Some(renderer) = &self.renderer {
            let pending = renderer.lock().pop_commands();
            if !pending.is_empty() {
                debug!("Discarding {} pending local commands", pending.len());
                report.discarded += pending.len();
            }
        }
        if mode == ConnectionMode::Networked {
            self.engine.set_state(self.last_fetched.clone());
            self.last_attempt = None;
        }
        self.mode = mode;
    }

    /// Fetch if due, returning the state to draw.
    fn refresh(&mut self, report: &mut TickReport) -> StateSnapshot {
        let now = Instant::now();
        if self.mode == ConnectionMode::Local || !self.fetch_due(now) {
            return self.engine.get_state();
        }

        self.last_attempt = Some(now);
        match self.source.fetch() {
            Ok(snapshot) => {
                report.fetched = true;
                self.engine.set_state(snapshot.clone());
                self.last_fetched = snapshot.clone();
                snapshot
            }
            Err(e) => {
                warn!(
                    "Fetch from {} failed, retrying in {:?}: {}",
                    self.endpoint(),
                    self.fetch_interval,
                    e
                );
                self.engine.get_state()
            }
        }
    }
}

impl<E: SimulationEngine, S: SnapshotSource> Tick for MirrorLoop<E, S> {
    fn tick(&mut self) -> Result<TickReport, LoopError> {
        let mut report = TickReport::default();

        let requested = self
            .renderer
            .as_ref()
            .map(|r| ConnectionMode::requested(r.lock().lead_server_communication_requested()));
        if let Some(mode) = requested {
            if mode != self.mode {
                self.switch_mode(mode, &mut report);
            }
        }

        let state = self.refresh(&mut report);

        if let Some(renderer) = &self.renderer {
            let mut renderer = renderer.lock();
            renderer.draw(&state);

            let local = renderer.pop_commands();
            match self.mode {
                ConnectionMode::Local => apply_commands(&mut self.engine, local, &mut report)?,
                ConnectionMode::Networked => {
                    if !local.is_empty() {
                        debug!("Discarding {} local commands while networked", local.len());
                        report.discarded += local.len();
                    }
                }
            }
            renderer.rate(self.scheduler.frame_rate());
        }

        if self.mode == ConnectionMode::Local {
            self.engine.step()?;
        }
        if self.renderer.is_none() {
            self.scheduler.wait();
        }

        Ok(report)
    }

    fn role(&self) -> &'static str {
        "mirror"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::link::ConnectivityError;
    use crate::runtime::testing::{MockRenderer, RecordingEngine, ScriptedSource, SourceHandle};
    use crate::sim::command::Command;
    use parking_lot::Mutex;
    use std::sync::Arc;

    const FRAME: Duration = Duration::from_millis(1);

    fn mirror(
        fetch_interval: Duration,
    ) -> (
        MirrorLoop<RecordingEngine, ScriptedSource>,
        SourceHandle,
        Arc<Mutex<MockRenderer>>,
    ) {
        let (source, handle) = ScriptedSource::new(100);
        let renderer = MockRenderer::shared();
        let mirror = MirrorLoop::new(
            RecordingEngine::default(),
            source,
            Some(renderer.clone()),
            TickScheduler::new(FRAME),
            fetch_interval,
        )
        .unwrap();
        (mirror, handle, renderer)
    }

    fn thrust(throttle: f64) -> Command {
        Command::Thrust { entity: "Habitat".into(), throttle }
    }

    #[test]
    fn test_initial_fetch_sets_engine_state() {
        let (mirror, handle, _renderer) = mirror(Duration::from_secs(60));
        assert_eq!(handle.fetches(), 1);
        assert_eq!(mirror.mode(), ConnectionMode::Networked);
        assert_eq!(mirror.engine().state.tick, 101);
        assert_eq!(mirror.last_fetched().tick, 101);
    }

    #[test]
    fn test_initial_fetch_failure_is_fatal() {
        let (source, handle) = ScriptedSource::new(0);
        handle.set_failing(true);
        let result = MirrorLoop::new(
            RecordingEngine::default(),
            source,
            None,
            TickScheduler::new(FRAME),
            Duration::from_millis(250),
        );
        assert!(matches!(
            result,
            Err(LoopError::InitialFetch { source: ConnectivityError::Closed, .. })
        ));
    }

    #[test]
    fn test_networked_mode_never_applies_local_commands() {
        let (mut mirror, _handle, renderer) = mirror(Duration::ZERO);
        renderer.lock().input.push_back(vec![thrust(0.5), Command::Noop]);

        let report = mirror.tick().unwrap();

        assert!(mirror.engine().applied.is_empty());
        assert_eq!(mirror.engine().steps, 0);
        assert_eq!(report.discarded, 2);
        assert!(report.fetched);
    }

    #[test]
    fn test_local_mode_never_fetches() {
        let (mut mirror, handle, renderer) = mirror(Duration::ZERO);
        renderer.lock().networking = false;
        mirror.tick().unwrap();
        renderer.lock().input.push_back(vec![thrust(0.5)]);

        for _ in 0..4 {
            let report = mirror.tick().unwrap();
            assert!(!report.fetched);
        }

        assert_eq!(mirror.mode(), ConnectionMode::Local);
        assert_eq!(handle.fetches(), 1);
        assert_eq!(mirror.engine().applied, vec![thrust(0.5)]);
        assert_eq!(mirror.engine().steps, 5);
    }

    #[test]
    fn test_fetch_is_throttled() {
        let (mut mirror, handle, renderer) = mirror(Duration::from_secs(60));
        for _ in 0..10 {
            mirror.tick().unwrap();
        }
        // Only the startup fetch; every frame draws that snapshot.
        assert_eq!(handle.fetches(), 1);
        assert_eq!(renderer.lock().drawn, vec![101; 10]);
    }

    #[test]
    fn test_fetch_failure_keeps_networked_and_retries() {
        let (mut mirror, handle, renderer) = mirror(Duration::ZERO);
        handle.set_failing(true);

        for _ in 0..3 {
            let report = mirror.tick().unwrap();
            assert!(!report.fetched);
        }
        assert_eq!(mirror.mode(), ConnectionMode::Networked);
        assert_eq!(handle.fetches(), 4);
        // Still drawing the last good snapshot.
        assert_eq!(renderer.lock().drawn, vec![101, 101, 101]);

        handle.set_failing(false);
        assert!(mirror.tick().unwrap().fetched);
        assert_eq!(mirror.engine().state.tick, 102);
    }

    #[test]
    fn test_failed_attempt_restarts_interval() {
        let (mut mirror, handle, _renderer) = mirror(Duration::from_millis(40));
        handle.set_failing(true);
        std::thread::sleep(Duration::from_millis(45));

        mirror.tick().unwrap();
        assert_eq!(handle.fetches(), 2);
        // The retry waits a full interval after the failed attempt.
        mirror.tick().unwrap();
        assert_eq!(handle.fetches(), 2);
    }

    #[test]
    fn test_round_trip_restores_last_fetched_base() {
        let (mut mirror, handle, renderer) = mirror(Duration::from_secs(60));

        renderer.lock().networking = false;
        mirror.tick().unwrap();
        renderer.lock().input.push_back(vec![thrust(1.0)]);
        mirror.tick().unwrap();
        assert_eq!(mirror.engine().state.tick, 103);

        // Lead unreachable on return, so the base must come from the last fetch.
        handle.set_failing(true);
        renderer.lock().networking = true;
        renderer.lock().input.push_back(vec![thrust(0.2)]);
        let report = mirror.tick().unwrap();

        assert_eq!(mirror.mode(), ConnectionMode::Networked);
        assert_eq!(mirror.engine().state.tick, 101);
        assert_eq!(mirror.engine().state, *mirror.last_fetched());
        assert_eq!(mirror.engine().set_states, vec![101, 101]);
        assert_eq!(report.discarded, 1);
        // The fetch was due immediately.
        assert_eq!(handle.fetches(), 2);
        assert_eq!(mirror.engine().applied, vec![thrust(1.0)]);
    }

    #[test]
    fn test_reentering_networked_fetches_fresh_state() {
        let (mut mirror, handle, renderer) = mirror(Duration::from_secs(60));
        renderer.lock().networking = false;
        mirror.tick().unwrap();

        renderer.lock().networking = true;
        let report = mirror.tick().unwrap();

        assert!(report.fetched);
        assert_eq!(handle.fetches(), 2);
        assert_eq!(mirror.engine().state.tick, 102);
        assert_eq!(renderer.lock().drawn.last(), Some(&102));
    }

    #[test]
    fn test_fetch_cadence_decoupled_from_frames() {
        let (source, handle) = ScriptedSource::new(0);
        let renderer = MockRenderer::shared();
        let fetch_interval = Duration::from_millis(250);
        let mut mirror = MirrorLoop::new(
            RecordingEngine::default(),
            source,
            Some(renderer.clone()),
            TickScheduler::new(Duration::from_millis(16)),
            fetch_interval,
        )
        .unwrap();

        let start = Instant::now();
        for _ in 0..40 {
            mirror.tick().unwrap();
        }
        let elapsed = start.elapsed();

        let windows = (elapsed.as_secs_f64() / fetch_interval.as_secs_f64()).ceil() as usize;
        assert!(handle.fetches() <= windows + 1, "{} fetches in {:?}", handle.fetches(), elapsed);

        let renderer = renderer.lock();
        assert_eq!(renderer.drawn.len(), 40);
        // Frames between fetches redraw the last fetched snapshot.
        assert!(renderer.drawn.windows(2).all(|w| w[0] <= w[1]));
        let mut distinct = renderer.drawn.clone();
        distinct.dedup();
        assert_eq!(distinct.len() as u64, *renderer.drawn.last().unwrap());
        assert_eq!(distinct.len(), handle.fetches());
    }

    #[test]
    fn test_headless_mirror_follows_lead() {
        let (source, handle) = ScriptedSource::new(0);
        let mut mirror = MirrorLoop::new(
            RecordingEngine::default(),
            source,
            None,
            TickScheduler::new(FRAME),
            Duration::ZERO,
        )
        .unwrap();
        mirror.tick().unwrap();
        mirror.tick().unwrap();
        assert_eq!(handle.fetches(), 3);
        assert_eq!(mirror.engine().state.tick, 3);
        assert_eq!(mirror.engine().steps, 0);
    }

    #[test]
    fn test_switching_to_local_discards_commands_typed_while_networked() {
        let (mut mirror, handle, renderer) = mirror(Duration::from_secs(60));
        renderer.lock().input.push_back(vec![thrust(0.3)]);
        renderer.lock().networking = false;

        let report = mirror.tick().unwrap();

        assert_eq!(mirror.mode(), ConnectionMode::Local);
        assert_eq!(report.discarded, 1);
        assert!(mirror.engine().applied.is_empty());
        assert_eq!(mirror.engine().steps, 1);
        assert_eq!(handle.fetches(), 1);
    }

    #[test]
    fn test_console_command_before_local_toggle_is_not_applied() {
        use crate::runtime::render::ConsoleRenderer;
        use std::io::Cursor;

        let input = Cursor::new(
            "{\"thrust\":{\"entity\":\"Habitat\",\"throttle\":0.5}}\n:local\n".to_string(),
        );
        let console = Arc::new(Mutex::new(ConsoleRenderer::from_reader(input)));
        let renderer: SharedRenderer = console.clone();
        let (source, _handle) = ScriptedSource::new(100);
        let mut mirror = MirrorLoop::new(
            RecordingEngine::default(),
            source,
            Some(renderer),
            TickScheduler::new(FRAME),
            Duration::from_secs(60),
        )
        .unwrap();

        // Tick until the input thread has delivered the toggle.
        let deadline = Instant::now() + Duration::from_secs(2);
        while mirror.mode() == ConnectionMode::Networked {
            assert!(Instant::now() < deadline, "toggle never arrived");
            mirror.tick().unwrap();
        }
        mirror.tick().unwrap();

        assert!(mirror.engine().applied.is_empty());
        assert!(mirror.engine().steps >= 1);
    }

    #[test]
    fn test_fetch_due_only_after_interval_is_exceeded() {
        let (mut mirror, _handle, _renderer) = mirror(Duration::from_millis(250));
        let at = Instant::now();
        mirror.last_attempt = Some(at);

        assert!(!mirror.fetch_due(at + Duration::from_millis(250)));
        assert!(mirror.fetch_due(at + Duration::from_millis(251)));

        mirror.last_attempt = None;
        assert!(mirror.fetch_due(at));
    }
}
