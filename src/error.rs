//! Error types for the bouncer.

use thiserror::Error;

/// Failures that stop the bouncer from starting or keep it from running.
#[derive(Error, Debug)]
pub enum BouncerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Controller connection failed: {0}")]
    Connection(String),

    #[error("Failed to get {what}: {reason}")]
    Enumerate { what: &'static str, reason: String },

    #[error("At least one source zone and one destination zone must be configured")]
    ZonesNotConfigured,

    #[error("Source zone {0} not found")]
    SourceZoneNotFound(String),

    #[error("Destination zone {0} not found")]
    DestinationZoneNotFound(String),

    #[error("Decision stream halted")]
    StreamHalted,

    #[error("Event loop halted: {0}")]
    EventLoopHalted(String),
}

impl BouncerError {
    pub(crate) fn enumerate(what: &'static str, err: anyhow::Error) -> Self {
        Self::Enumerate {
            what,
            reason: format!("{:#}", err),
        }
    }
}
