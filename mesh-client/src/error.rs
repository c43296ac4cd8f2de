use thiserror::Error;

/// Error taxonomy for the dispatch core (spec.md §7). The "programmer error"
/// case named there (an unsupported output receptacle shape) cannot arise
/// here: [`crate::Receptacle`] is the only entry point, so a caller who
/// needs a new shape implements the trait rather than hitting a runtime
/// abort.
#[derive(Debug, Error)]
pub enum DispatchError {
	#[error("transport error: {0}")]
	Transport(#[from] std::io::Error),

	#[error("decode error: {0}")]
	Decode(String),

	#[error("connection pool exhausted for instance {0}")]
	PoolExhausted(String),

	#[error("request timed out")]
	TimedOut,

	#[error("no instance available")]
	NoInstanceAvailable,
}
