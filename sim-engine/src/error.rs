//! Crate-wide error taxonomy (spec §7): configuration errors are raised at
//! construction time and are fatal for that simulation; invariant violations
//! are programming errors detected while running and abort the simulation
//! by propagating out of `tick`/`deliver` instead of panicking.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invariant violation: {0}")]
    Invariant(String),
}

pub type SimResult<T> = Result<T, SimError>;
