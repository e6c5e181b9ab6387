pub mod autopsy;
pub mod introspect;
pub mod repl;
pub mod run;
pub mod smoke;

/// Usage-level failures (bad flag combinations discovered after clap's own
/// parsing) map to exit code 2, distinct from runtime failures (exit code 1).
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct UsageError(pub String);
