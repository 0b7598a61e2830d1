//! # Domain Types
//!
//! Core domain types used throughout Tagnet.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   TagConfig     │   │   DeviceRole    │   │      Zone       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id             │   │  Tag (default)  │   │  Almacen        │       │
//! │  │  temporada      │   │  Nfc(Box)       │   │  Tienda         │       │
//! │  │  tipo           │   │  Nfc(Door)      │   └─────────────────┘       │
//! │  │  ubicacion      │   └─────────────────┘                             │
//! │  │  precio         │                                                   │
//! │  │  uid (optional) │   ┌─────────────────┐   ┌─────────────────┐       │
//! │  └─────────────────┘   │ MovementRecord  │   │   SaleRecord    │       │
//! │                        │  uid, zones     │   │  sold TagConfig │       │
//! │  ┌────────┐ ┌───────┐  │  timestamp      │   │  timestamp      │       │
//! │  │ Season │ │Garment│  │  origin         │   │  origin         │       │
//! │  └────────┘ └───────┘  └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Fidelity
//! The JSON field names the tags speak are Spanish and capitalized
//! (`{"ID":5,"Temporada":"Invierno",...}`). The serde renames below are the
//! single place that mapping lives; Rust code uses snake_case throughout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationResult;
use crate::validation;

// =============================================================================
// Season
// =============================================================================

/// Selling season a tagged garment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Season {
    /// Winter collection.
    Invierno,
    /// Summer collection.
    Verano,
}

impl std::fmt::Display for Season {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Season::Invierno => write!(f, "Invierno"),
            Season::Verano => write!(f, "Verano"),
        }
    }
}

// =============================================================================
// Garment
// =============================================================================

/// Garment category shown on the shelf label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Garment {
    Gorra,
    Camiseta,
    Pantalones,
    Calcetines,
}

impl std::fmt::Display for Garment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Garment::Gorra => "Gorra",
            Garment::Camiseta => "Camiseta",
            Garment::Pantalones => "Pantalones",
            Garment::Calcetines => "Calcetines",
        };
        write!(f, "{name}")
    }
}

// =============================================================================
// Tag Configuration
// =============================================================================

/// The configuration payload assigned to one electronic shelf label.
///
/// This is the body of the `SET <json>` command and of `PONG <rid> DATA
/// <json>` replies. Field names on the wire are fixed by the firmware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagConfig {
    /// Article identifier shown on the label.
    #[serde(rename = "ID")]
    pub id: i64,

    /// Selling season.
    #[serde(rename = "Temporada")]
    pub temporada: Season,

    /// Garment category.
    #[serde(rename = "Tipo")]
    pub tipo: Garment,

    /// Free-form shelf / rack location.
    #[serde(rename = "Ubicacion")]
    pub ubicacion: String,

    /// Unit price in euros.
    #[serde(rename = "Precio")]
    pub precio: f64,

    /// Hardware UID of the physical tag, once captured via `READUID`.
    #[serde(rename = "UID", default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl TagConfig {
    /// Validates every field against the domain rules.
    pub fn validate(&self) -> ValidationResult<()> {
        validation::validate_tag_id(self.id)?;
        validation::validate_precio(self.precio)?;
        validation::validate_ubicacion(&self.ubicacion)?;
        if let Some(uid) = &self.uid {
            validation::validate_uid_hex(uid)?;
        }
        Ok(())
    }
}

// =============================================================================
// Device Roles
// =============================================================================

/// Sub-role of an NFC reader, fixed in its firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReaderKind {
    /// Reader mounted on a warehouse box.
    Box,
    /// Reader mounted on the shop-floor door.
    Door,
}

impl ReaderKind {
    /// Parses the wire token (`BOX` / `DOOR`), case-sensitive as sent by
    /// the firmware.
    pub fn from_wire(token: &str) -> Option<Self> {
        match token {
            "BOX" => Some(ReaderKind::Box),
            "DOOR" => Some(ReaderKind::Door),
            _ => None,
        }
    }

    /// The zone this reader guards.
    pub fn zone(&self) -> Zone {
        match self {
            ReaderKind::Box => Zone::Almacen,
            ReaderKind::Door => Zone::Tienda,
        }
    }
}

impl std::fmt::Display for ReaderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReaderKind::Box => write!(f, "BOX"),
            ReaderKind::Door => write!(f, "DOOR"),
        }
    }
}

/// Role of a connected device.
///
/// Every connection starts life as a [`DeviceRole::Tag`]; an NFC reader
/// upgrades itself by announcing `ROLE NFC <BOX|DOOR>`. Repeated or
/// conflicting announcements are applied idempotently, last one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceRole {
    /// Electronic shelf label (the default for a fresh connection).
    #[default]
    Tag,
    /// NFC reader with its fixed sub-role.
    Nfc(ReaderKind),
}

impl DeviceRole {
    /// Returns true for NFC readers of any kind.
    pub fn is_reader(&self) -> bool {
        matches!(self, DeviceRole::Nfc(_))
    }

    /// The reader sub-role, if this device is a reader.
    pub fn reader_kind(&self) -> Option<ReaderKind> {
        match self {
            DeviceRole::Nfc(kind) => Some(*kind),
            DeviceRole::Tag => None,
        }
    }
}

impl std::fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceRole::Tag => write!(f, "TAG"),
            DeviceRole::Nfc(kind) => write!(f, "NFC {kind}"),
        }
    }
}

// =============================================================================
// Zones
// =============================================================================

/// Physical zone of the store an item can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Zone {
    /// Back-of-store warehouse.
    Almacen,
    /// Shop floor.
    Tienda,
}

impl Zone {
    /// The other zone; a scan records arrival, so the departure side is
    /// always the opposite one.
    pub fn opposite(&self) -> Zone {
        match self {
            Zone::Almacen => Zone::Tienda,
            Zone::Tienda => Zone::Almacen,
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Zone::Almacen => write!(f, "Almacen"),
            Zone::Tienda => write!(f, "Tienda"),
        }
    }
}

// =============================================================================
// Event Records
// =============================================================================

/// Wire payload of a `MOVE <json>` line: a device-reported relocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveEvent {
    /// Hardware UID of the moved item.
    #[serde(rename = "UID")]
    pub uid: String,

    /// Zone the item left.
    #[serde(rename = "Desde")]
    pub desde: Zone,

    /// Zone the item arrived in.
    #[serde(rename = "Hasta")]
    pub hasta: Zone,
}

/// A movement handed to the event sink, stamped with arrival metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementRecord {
    /// When the server received the event.
    pub timestamp: DateTime<Utc>,

    /// Remote address of the reporting connection.
    pub origin: String,

    /// Hardware UID of the moved item.
    pub uid: String,

    /// Zone the item left.
    pub desde: Zone,

    /// Zone the item arrived in.
    pub hasta: Zone,
}

impl MovementRecord {
    /// Builds a record from a device-reported `MOVE` event.
    pub fn from_event(origin: &str, event: MoveEvent, timestamp: DateTime<Utc>) -> Self {
        MovementRecord {
            timestamp,
            origin: origin.to_string(),
            uid: event.uid,
            desde: event.desde,
            hasta: event.hasta,
        }
    }

    /// Builds a record from a raw `SCAN <hex>` at an NFC reader.
    ///
    /// A scan means the item arrived at the reader's zone, so the departure
    /// side is the opposite zone.
    pub fn from_scan(
        origin: &str,
        uid: &str,
        reader: ReaderKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let hasta = reader.zone();
        MovementRecord {
            timestamp,
            origin: origin.to_string(),
            uid: uid.to_string(),
            desde: hasta.opposite(),
            hasta,
        }
    }
}

/// A completed sale handed to the event sink.
///
/// The wire payload of `SOLD <json>` is the sold item's full [`TagConfig`];
/// the server stamps time and origin on receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    /// When the server received the event.
    pub timestamp: DateTime<Utc>,

    /// Remote address of the reporting connection.
    pub origin: String,

    /// Configuration of the sold item at sale time.
    pub config: TagConfig,
}

impl SaleRecord {
    pub fn new(origin: &str, config: TagConfig, timestamp: DateTime<Utc>) -> Self {
        SaleRecord {
            timestamp,
            origin: origin.to_string(),
            config,
        }
    }
}
