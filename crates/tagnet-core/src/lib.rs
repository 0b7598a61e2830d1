//! # tagnet-core: Pure Domain Types for Tagnet
//!
//! This crate contains the domain model shared by the fleet engine and any
//! operator-facing frontend: tag configurations, device roles, store zones
//! and the movement/sale event records the fleet produces.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Tagnet Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Operator frontend (external)                 │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    tagnet-fleet (TCP engine)                    │   │
//! │  │       registry • framer • dispatcher • broker • lifecycle       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tagnet-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐   ┌───────────┐   ┌──────────────────────┐     │   │
//! │  │   │   types   │   │ validation│   │        error         │     │   │
//! │  │   │ TagConfig │   │   rules   │   │   ValidationError    │     │   │
//! │  │   │ DeviceRole│   │   checks  │   │                      │     │   │
//! │  │   └───────────┘   └───────────┘   └──────────────────────┘     │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO SOCKETS • NO FILE SYSTEM • PURE FUNCTIONS        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (TagConfig, DeviceRole, event records)
//! - [`error`] - Domain error types
//! - [`validation`] - Field validation rules
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: every function is deterministic
//! 2. **No I/O**: network and file system access is FORBIDDEN here
//! 3. **Explicit Errors**: all errors are typed, never strings or panics
//! 4. **Wire Fidelity**: serde renames match the device firmware's JSON
//!    field names exactly (`ID`, `Temporada`, `Tipo`, `Ubicacion`, `Precio`,
//!    `UID`)

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{ValidationError, ValidationResult};
pub use types::{
    DeviceRole, Garment, MoveEvent, MovementRecord, ReaderKind, SaleRecord, Season, TagConfig,
    Zone,
};
