// Orchestrator constants shared by the run loop and title derivation.

pub const TOOL_ERROR_PREFIX: &str = "Error: ";
pub const FAILED_TOOL_SUFFIX: &str = " (failed)";
pub const TOOL_CALL_ID_PREFIX: &str = "call";
pub const TITLE_FALLBACK: &str = "Untitled project";
pub const MIN_LEASE_TTL_S: f64 = 5.0;
pub const MIN_LEASE_HEARTBEAT_S: f64 = 1.0;
pub const MAX_STEPS: usize = 10;
