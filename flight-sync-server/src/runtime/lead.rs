//! Lead Loop
//!
//! The authoritative tick. Each tick:
//!
//! 1. Read the engine state and publish it (snapshot-before-apply: what
//!    peers and the renderer see in tick N is the state before tick N's
//!    commands).
//! 2. Collect local input, then drain the network queue.
//! 3. Apply the commands in that order, skipping no-ops.
//! 4. Step the engine.
//! 5. Draw the published state and let the renderer pace the frame, or
//!    wait out the frame when headless.

use tracing::debug;

use crate::network::service::StateService;
use crate::runtime::apply::{apply_commands, collect};
use crate::runtime::render::SharedRenderer;
use crate::runtime::scheduler::TickScheduler;
use crate::runtime::{LoopError, Tick, TickReport};
use crate::sim::engine::SimulationEngine;

/// Authoritative control loop.
pub struct LeadLoop<E> {
    engine: E,
    service: StateService,
    renderer: Option<SharedRenderer>,
    scheduler: TickScheduler,
}

impl<E: SimulationEngine> LeadLoop<E> {
    /// Create a lead loop. Nothing is published until the first tick.
    pub fn new(
        engine: E,
        service: StateService,
        renderer: Option<SharedRenderer>,
        scheduler: TickScheduler,
    ) -> Self {
        Self {
            engine,
            service,
            renderer,
            scheduler,
        }
    }

    /// The engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The service this loop publishes to.
    pub fn service(&self) -> &StateService {
        &self.service
    }
}

impl<E: SimulationEngine> Tick for LeadLoop<E> {
    fn tick(&mut self) -> Result<TickReport, LoopError> {
        let mut report = TickReport::default();

        let state = self.engine.get_state();
        self.service.publish(state.clone());

        let local = match &self.renderer {
            Some(renderer) => renderer.lock().pop_commands(),
            None => Vec::new(),
        };
        let network = self.service.drain_commands();
        if !network.is_empty() {
            debug!("Drained {} network commands", network.len());
        }

        apply_commands(&mut self.engine, collect(local, network), &mut report)?;
        self.engine.step()?;

        if let Some(renderer) = &self.renderer {
            let mut renderer = renderer.lock();
            renderer.draw(&state);
            renderer.rate(self.scheduler.frame_rate());
        } else {
            self.scheduler.wait();
        }

        Ok(report)
    }

    fn role(&self) -> &'static str {
        "lead"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::{snapshot_at, MockRenderer, RecordingEngine};
    use crate::sim::command::Command;
    use crate::sim::engine::{EngineError, FlightEngine};
    use crate::sim::snapshot::EntityState;
    use crate::sim::StateSnapshot;
    use std::time::Duration;

    fn fast() -> TickScheduler {
        TickScheduler::new(Duration::from_millis(1))
    }

    #[test]
    fn test_local_then_network_skipping_noop() {
        let renderer = MockRenderer::shared();
        let move_cmd = Command::Move { entity: "Habitat".into(), dx: 5.0, dy: 0.0 };
        let thrust_cmd = Command::Thrust { entity: "Habitat".into(), throttle: 0.75 };
        renderer.lock().input.push_back(vec![move_cmd.clone()]);

        let service = StateService::new();
        service.submit(Command::Noop);
        service.submit(thrust_cmd.clone());

        let mut lead = LeadLoop::new(
            RecordingEngine::new(snapshot_at(0)),
            service,
            Some(renderer.clone()),
            fast(),
        );
        let report = lead.tick().unwrap();

        assert_eq!(lead.engine().applied, vec![move_cmd, thrust_cmd]);
        assert_eq!(report.applied, 2);
        assert_eq!(report.skipped, 1);
        assert!(lead.service().drain_commands().is_empty());
    }

    #[test]
    fn test_publishes_state_before_commands() {
        let service = StateService::new();
        let mut lead = LeadLoop::new(
            FlightEngine::new(
                StateSnapshot {
                    entities: vec![EntityState::at_rest("Habitat", [0.0, 0.0])],
                    ..Default::default()
                },
                Duration::from_millis(16),
            ),
            service.clone(),
            None,
            fast(),
        );

        service.submit(Command::Move { entity: "Habitat".into(), dx: 10.0, dy: 0.0 });
        lead.tick().unwrap();

        let published = service.latest().unwrap();
        assert_eq!(published.snapshot.tick, 0);
        assert_eq!(published.snapshot.entity("Habitat").unwrap().position, [0.0, 0.0]);

        lead.tick().unwrap();
        let published = service.latest().unwrap();
        assert_eq!(published.snapshot.tick, 1);
        assert_eq!(published.snapshot.entity("Habitat").unwrap().position, [10.0, 0.0]);
        assert!(published.verify());
    }

    #[test]
    fn test_renderer_draws_published_state() {
        let renderer = MockRenderer::shared();
        let mut lead = LeadLoop::new(
            RecordingEngine::new(snapshot_at(7)),
            StateService::new(),
            Some(renderer.clone()),
            fast(),
        );
        lead.tick().unwrap();
        lead.tick().unwrap();

        let renderer = renderer.lock();
        assert_eq!(renderer.drawn, vec![7, 8]);
        assert_eq!(renderer.rates, 2);
        assert_eq!(renderer.pops, 2);
    }

    #[test]
    fn test_headless_lead_steps_and_publishes() {
        let service = StateService::new();
        let mut lead = LeadLoop::new(RecordingEngine::default(), service.clone(), None, fast());
        for _ in 0..3 {
            lead.tick().unwrap();
        }
        assert_eq!(lead.engine().steps, 3);
        assert_eq!(service.publish_count(), 3);
    }

    #[test]
    fn test_rejected_command_does_not_stop_the_tick() {
        let service = StateService::new();
        let mut lead = LeadLoop::new(
            FlightEngine::new(StateSnapshot::default(), Duration::from_millis(16)),
            service.clone(),
            None,
            fast(),
        );
        service.submit(Command::Thrust { entity: "Nobody".into(), throttle: 0.5 });
        service.submit(Command::SetTimeAcceleration { factor: 10.0 });

        let report = lead.tick().unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.applied, 1);
        assert_eq!(lead.engine().get_state().time_acceleration, 10.0);
    }

    #[test]
    fn test_fatal_engine_error_propagates() {
        let service = StateService::new();
        service.submit(Command::SetTimeAcceleration { factor: 2.0 });
        let mut lead = LeadLoop::new(
            RecordingEngine::failing(EngineError::Internal("corrupt".into())),
            service,
            None,
            fast(),
        );
        assert!(matches!(
            lead.tick(),
            Err(LoopError::Engine(EngineError::Internal(_)))
        ));
    }
}
