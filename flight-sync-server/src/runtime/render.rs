//! Renderer Boundary
//!
//! The local input/output layer a loop may have attached. The loops only
//! need commands out of it, snapshots into it, and frame pacing.
//!
//! `ConsoleRenderer` is the text renderer shipped with the binary: it reads
//! JSON commands from stdin and prints a state summary once per second.

use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::runtime::scheduler::TickScheduler;
use crate::sim::command::Command;
use crate::sim::snapshot::StateSnapshot;

/// Local input and display.
pub trait Renderer: Send {
    /// Commands entered locally since the last call, oldest first.
    fn pop_commands(&mut self) -> Vec<Command>;

    /// Display a snapshot.
    fn draw(&mut self, state: &StateSnapshot);

    /// Block until the next frame boundary at `frames_per_second`.
    fn rate(&mut self, frames_per_second: u32);

    /// Whether the user wants a mirror to follow its lead.
    fn lead_server_communication_requested(&mut self) -> bool {
        true
    }

    /// Normal teardown.
    fn shutdown(&mut self);

    /// Best-effort teardown after a fatal error.
    fn ungraceful_shutdown(&mut self);
}

/// Renderer shared between a loop and the shutdown hooks.
pub type SharedRenderer = Arc<Mutex<dyn Renderer>>;

// =============================================================================
// CONSOLE INPUT
// =============================================================================

/// One line of console input.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    /// A command to queue.
    Command(Command),
    /// Request following the lead (`true`) or local control (`false`).
    Networking(bool),
}

/// Parse one line of console input. Blank lines yield `Ok(None)`.
pub fn parse_input_line(line: &str) -> Result<Option<ConsoleInput>, serde_json::Error> {
    let line = line.trim();
    match line {
        "" => Ok(None),
        ":network" => Ok(Some(ConsoleInput::Networking(true))),
        ":local" => Ok(Some(ConsoleInput::Networking(false))),
        _ => Command::from_json(line).map(|c| Some(ConsoleInput::Command(c))),
    }
}

fn read_input<R: BufRead>(input: R, inbox: Sender<ConsoleInput>) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Console input closed: {}", e);
                return;
            }
        };
        match parse_input_line(&line) {
            Ok(Some(entry)) => {
                if inbox.send(entry).is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring console input '{}': {}", line.trim(), e),
        }
    }
    debug!("Console input reached end of stream");
}

// =============================================================================
// CONSOLE RENDERER
// =============================================================================

/// Text renderer driven by a line-oriented input stream.
pub struct ConsoleRenderer {
    inbox: Receiver<ConsoleInput>,
    pending: Vec<Command>,
    networking: bool,
    pacer: Option<TickScheduler>,
    summary_every: Duration,
    last_summary: Option<Instant>,
    frames: u64,
}

impl ConsoleRenderer {
    /// Renderer reading from stdin on a background thread.
    pub fn stdin() -> Self {
        Self::from_reader(io::BufReader::new(io::stdin()))
    }

    /// Renderer reading from any line source on a background thread.
    pub fn from_reader<R: BufRead + Send + 'static>(input: R) -> Self {
        let (tx, rx) = unbounded();
        let spawned = thread::Builder::new()
            .name("console-input".to_string())
            .spawn(move || read_input(input, tx));
        if let Err(e) = spawned {
            warn!("Console input unavailable: {}", e);
        }

        Self {
            inbox: rx,
            pending: Vec::new(),
            networking: true,
            pacer: None,
            summary_every: Duration::from_secs(1),
            last_summary: None,
            frames: 0,
        }
    }

    /// Frames drawn so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn drain_inbox(&mut self) {
        for entry in self.inbox.try_iter() {
            match entry {
                ConsoleInput::Command(command) => self.pending.push(command),
                ConsoleInput::Networking(requested) => {
                    if requested != self.networking {
                        info!("Console requested {} control", if requested { "networked" } else { "local" });
                    }
                    self.networking = requested;
                }
            }
        }
    }
}

impl Renderer for ConsoleRenderer {
    fn pop_commands(&mut self) -> Vec<Command> {
        self.drain_inbox();
        std::mem::take(&mut self.pending)
    }

    fn draw(&mut self, state: &StateSnapshot) {
        self.frames += 1;

        let due = self
            .last_summary
            .map_or(true, |at| at.elapsed() >= self.summary_every);
        if due {
            self.last_summary = Some(Instant::now());
            info!(
                tick = state.tick,
                sim_time = state.sim_time,
                time_acc = state.time_acceleration,
                entities = state.entities.len(),
                digest = %state.short_digest(),
                "Frame"
            );
        }
    }

    fn rate(&mut self, frames_per_second: u32) {
        let pacer = self
            .pacer
            .get_or_insert_with(|| TickScheduler::from_frame_rate(frames_per_second));
        if pacer.frame_rate() != frames_per_second {
            *pacer = TickScheduler::from_frame_rate(frames_per_second);
        }
        pacer.wait();
    }

    fn lead_server_communication_requested(&mut self) -> bool {
        self.drain_inbox();
        self.networking
    }

    fn shutdown(&mut self) {
        info!("Console renderer closed after {} frames", self.frames);
    }

    fn ungraceful_shutdown(&mut self) {
        warn!("Console renderer abandoned after {} frames", self.frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn wait_for<F: FnMut() -> bool>(mut condition: F) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_parse_input_line() {
        assert_eq!(parse_input_line("   ").unwrap(), None);
        assert_eq!(
            parse_input_line(":local").unwrap(),
            Some(ConsoleInput::Networking(false))
        );
        assert_eq!(
            parse_input_line(" :network ").unwrap(),
            Some(ConsoleInput::Networking(true))
        );
        assert_eq!(
            parse_input_line(r#"{"thrust":{"entity":"Habitat","throttle":0.5}}"#).unwrap(),
            Some(ConsoleInput::Command(Command::Thrust {
                entity: "Habitat".into(),
                throttle: 0.5
            }))
        );
        assert!(parse_input_line("thrust please").is_err());
    }

    #[test]
    fn test_console_commands_in_order() {
        let input = Cursor::new(
            "\"noop\"\nnot json\n{\"rotate\":{\"entity\":\"A\",\"spin\":1.0}}\n".to_string(),
        );
        let mut renderer = ConsoleRenderer::from_reader(input);

        let mut popped = Vec::new();
        wait_for(|| {
            popped.extend(renderer.pop_commands());
            popped.len() == 2
        });
        assert_eq!(
            popped,
            vec![Command::Noop, Command::Rotate { entity: "A".into(), spin: 1.0 }]
        );
        assert!(renderer.pop_commands().is_empty());
    }

    #[test]
    fn test_console_networking_toggle() {
        let mut renderer = ConsoleRenderer::from_reader(Cursor::new(":local\n".to_string()));
        wait_for(|| !renderer.lead_server_communication_requested());

        let mut renderer = ConsoleRenderer::from_reader(Cursor::new(":local\n:network\n".to_string()));
        thread::sleep(Duration::from_millis(50));
        assert!(renderer.lead_server_communication_requested());
    }

    #[test]
    fn test_draw_counts_frames() {
        let mut renderer = ConsoleRenderer::from_reader(Cursor::new(String::new()));
        let state = StateSnapshot::default();
        renderer.draw(&state);
        renderer.draw(&state);
        assert_eq!(renderer.frames(), 2);
    }
}
