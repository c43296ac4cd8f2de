// Ambient stack shared by the dispatch core and its demo binary: logging
// setup, graceful shutdown signaling/draining, readiness tracking, and
// build/version info. None of this is specific to service dispatch; it is
// split out the way the teacher keeps its "agent-core" ambient crate
// separate from the proxy-specific logic.

pub mod drain;
pub mod readiness;
pub mod signal;
pub mod telemetry;
pub mod version;
