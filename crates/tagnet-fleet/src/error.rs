//! # Fleet Error Types
//!
//! Error types for the fleet engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Fleet Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  BindFailed     │  │  MalformedLine          │ │
//! │  │  ConfigLoad     │  │  NotConnected   │  │  Serialization          │ │
//! │  │  ConfigSave     │  │  SendFailed     │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Domain       │  │     Sink        │                              │
//! │  │                 │  │                 │                              │
//! │  │  Validation     │  │  SinkFailed     │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A correlation timeout is deliberately NOT in this taxonomy: an expired
//! wait is an expected terminal state reported in the result value, never
//! an error.

use thiserror::Error;

use crate::registry::ConnId;

/// Result type alias for fleet operations.
pub type FleetResult<T> = Result<T, FleetError>;

/// Fleet error type covering all engine failures.
///
/// ## Design Principles
/// - Each variant includes enough context for debugging
/// - Errors are categorized for different handling strategies
/// - All errors are `Send + Sync` for async compatibility
/// - Nothing here is fatal to the process: one connection's failure never
///   terminates another connection's loop or the acceptor
#[derive(Debug, Error)]
pub enum FleetError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid fleet configuration.
    #[error("Invalid fleet configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Failed to bind the listening socket.
    #[error("Failed to bind {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    /// The target connection is not in the registry at send time.
    ///
    /// Surfaced synchronously: a request to an absent device fails
    /// immediately rather than waiting out its timeout.
    #[error("Target not connected: conn {0}")]
    TargetNotConnected(ConnId),

    /// The outbound channel for a connection rejected a line.
    #[error("Send to conn {conn} failed: {reason}")]
    SendFailed { conn: ConnId, reason: String },

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// A device line did not match the protocol grammar.
    #[error("Malformed line {line:?}: {reason}")]
    MalformedLine { line: String, reason: String },

    /// Failed to serialize an outgoing payload.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    // =========================================================================
    // Domain Errors
    // =========================================================================
    /// A tag configuration failed validation before sending.
    #[error(transparent)]
    Validation(#[from] tagnet_core::ValidationError),

    // =========================================================================
    // Sink Errors
    // =========================================================================
    /// The event sink could not persist a record.
    #[error("Event sink failed: {0}")]
    SinkFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// An internal channel closed unexpectedly.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for FleetError {
    fn from(err: toml::de::Error) -> Self {
        FleetError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for FleetError {
    fn from(err: toml::ser::Error) -> Self {
        FleetError::ConfigSaveFailed(err.to_string())
    }
}

impl From<std::io::Error> for FleetError {
    fn from(err: std::io::Error) -> Self {
        FleetError::SinkFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl FleetError {
    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            FleetError::InvalidConfig(_)
                | FleetError::ConfigLoadFailed(_)
                | FleetError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if this error is a per-request transport fault the
    /// caller can handle by retrying against a fresh device snapshot.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            FleetError::TargetNotConnected(_) | FleetError::SendFailed { .. }
        )
    }
}
