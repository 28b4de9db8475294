//! Application layer: use cases that orchestrate the domain logic.
//!
//! These modules are transport-agnostic.  The infrastructure layer feeds them
//! decoded packets and carries their replies back onto the wire.

pub mod dispatch_commands;
pub mod track_sessions;
