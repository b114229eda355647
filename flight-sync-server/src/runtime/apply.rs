//! Command Application
//!
//! Both loops feed commands to their engine through here, so ordering,
//! no-op filtering and rejection handling are identical on lead and mirror.

use tracing::{info, warn};

use crate::runtime::TickReport;
use crate::sim::command::Command;
use crate::sim::engine::{EngineError, SimulationEngine};

/// Concatenate one tick's commands: local input first, then network, each
/// in arrival order.
pub fn collect(local: Vec<Command>, network: Vec<Command>) -> Vec<Command> {
    let mut commands = local;
    commands.extend(network);
    commands
}

/// Apply commands in order.
///
/// No-ops never reach the engine. A rejected command is logged and skipped;
/// any other engine error aborts the remaining commands and is returned.
pub fn apply_commands<E>(
    engine: &mut E,
    commands: Vec<Command>,
    report: &mut TickReport,
) -> Result<(), EngineError>
where
    E: SimulationEngine + ?Sized,
{
    for command in commands {
        if command.is_noop() {
            report.skipped += 1;
            continue;
        }

        info!("Got command {}", command);
        match engine.handle_request(&command) {
            Ok(()) => report.applied += 1,
            Err(e) if e.is_rejection() => {
                warn!("Rejected {} command: {}", command.id(), e);
                report.rejected += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
