//! # tagnet-fleet: Fleet Engine for Tagnet
//!
//! This crate provides the concurrent client registry and request/response
//! correlation engine for a fleet of TCP-connected shelf labels and NFC
//! readers, plus the acceptor and per-connection lifecycle around them.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Fleet Engine Architecture                        │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  FleetServer (acceptor + lifecycle)              │  │
//! │  │                                                                  │  │
//! │  │  One task pair per accepted device connection                    │  │
//! │  │  reader: bytes ─► LineFramer ─► Dispatcher                       │  │
//! │  │  writer: outbound channel ─► socket                              │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Connection     │  │  Dispatcher    │  │  CorrelationBroker     │    │
//! │  │ Registry       │  │                │  │                        │    │
//! │  │                │  │ PONG/UID/ACK ─►│  │ request-id → pending   │    │
//! │  │ id → state     │  │ broker         │  │ wait; quorum or        │    │
//! │  │ role, last-seen│  │ ROLE ─► registry│ │ predicate; absolute    │    │
//! │  │ snapshot()     │  │ MOVE/SOLD/SCAN │  │ deadlines              │    │
//! │  │                │  │ ─► EventSink   │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  Control logic drives everything through a cloneable FleetHandle:      │
//! │  • poll()        broadcast PING, collect replies until quorum/deadline │
//! │  • assign()      SET one device, await its matching ACK                │
//! │  • read_uid()    READUID one reader, await any UID reply               │
//! │  • devices()     consistent snapshot of connected devices              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`broker`] - Pending correlation table, the wait/notify engine
//! - [`config`] - Fleet configuration (bind address, timeouts, CSV paths)
//! - [`dispatch`] - Leading-token routing of parsed lines
//! - [`error`] - Fleet error types
//! - [`framer`] - Newline framing of the per-connection byte stream
//! - [`protocol`] - The line grammar in both directions
//! - [`registry`] - Connection registry and identifier allocation
//! - [`server`] - Acceptor, connection lifecycle and [`FleetHandle`]
//! - [`sink`] - Event sink trait and the CSV implementation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tagnet_fleet::{CsvSink, FleetConfig, FleetServer};
//!
//! let config = FleetConfig::load_or_default(None);
//! let sink = Arc::new(CsvSink::open(
//!     &config.storage.movements_csv,
//!     &config.storage.sales_csv,
//! )?);
//!
//! let handle = FleetServer::new(config, sink).start().await?;
//!
//! // Poll the whole fleet
//! let report = handle.poll().await?;
//! println!("{} replied, {} missing", report.replies.len(), report.missing.len());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod broker;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod framer;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod sink;

// =============================================================================
// Re-exports
// =============================================================================

pub use broker::{Collected, CorrelationBroker, Reply, RequestId};
pub use config::{FleetConfig, ServerSettings, StorageSettings, TimeoutSettings, DEFAULT_PORT};
pub use dispatch::Dispatcher;
pub use error::{FleetError, FleetResult};
pub use framer::LineFramer;
pub use protocol::{DeviceMessage, PongReply, ServerCommand};
pub use registry::{ConnId, ConnectionRegistry, DeviceInfo};
pub use server::{AckOutcome, FleetHandle, FleetServer};
pub use sink::{CsvSink, EventSink, NullSink};
