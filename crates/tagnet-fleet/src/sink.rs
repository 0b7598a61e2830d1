//! # Event Sink
//!
//! The persistence seam for fire-and-forget device events. The engine
//! parses and stamps `MOVE`/`SOLD`/`SCAN` traffic, then hands the records
//! here; it never formats or stores anything itself.
//!
//! Two implementations ship with the crate:
//! - [`CsvSink`] - append-only CSV files, one for movements and one for
//!   sales, matching the operator tooling's import format
//! - [`NullSink`] - discards everything; used by tests and by deployments
//!   that only care about live polling

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use tracing::debug;

use tagnet_core::{MovementRecord, SaleRecord};

use crate::error::FleetResult;

// =============================================================================
// Sink Trait
// =============================================================================

/// Receives structured event records from the dispatcher.
///
/// Implementations must be cheap enough to call inline from a connection's
/// dispatch path; anything slow should buffer internally. A sink failure is
/// logged by the dispatcher and never tears down the reporting connection.
pub trait EventSink: Send + Sync {
    /// Persists one item movement.
    fn record_movement(&self, record: &MovementRecord) -> FleetResult<()>;

    /// Persists one completed sale.
    fn record_sale(&self, record: &SaleRecord) -> FleetResult<()>;
}

// =============================================================================
// Null Sink
// =============================================================================

/// Sink that drops every record.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record_movement(&self, _record: &MovementRecord) -> FleetResult<()> {
        Ok(())
    }

    fn record_sale(&self, _record: &SaleRecord) -> FleetResult<()> {
        Ok(())
    }
}

// =============================================================================
// CSV Sink
// =============================================================================

const MOVEMENTS_HEADER: &str = "timestamp,origin,uid,desde,hasta";
const SALES_HEADER: &str = "timestamp,origin,id,temporada,tipo,ubicacion,precio,uid";

/// Append-only CSV persistence.
///
/// Files are opened once and kept open; each file sits behind its own lock
/// so movement and sale writes never contend with each other.
pub struct CsvSink {
    movements: Mutex<File>,
    sales: Mutex<File>,
}

impl CsvSink {
    /// Opens (or creates) both CSV files, writing the header row into any
    /// file that is empty.
    pub fn open(movements_path: &Path, sales_path: &Path) -> FleetResult<Self> {
        let movements = open_append(movements_path, MOVEMENTS_HEADER)?;
        let sales = open_append(sales_path, SALES_HEADER)?;
        debug!(movements = %movements_path.display(), sales = %sales_path.display(), "CSV sink ready");
        Ok(CsvSink {
            movements: Mutex::new(movements),
            sales: Mutex::new(sales),
        })
    }
}

impl EventSink for CsvSink {
    fn record_movement(&self, record: &MovementRecord) -> FleetResult<()> {
        let row = format!(
            "{},{},{},{},{}\n",
            record.timestamp.to_rfc3339(),
            csv_field(&record.origin),
            csv_field(&record.uid),
            record.desde,
            record.hasta,
        );
        let mut file = self.movements.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(row.as_bytes())?;
        Ok(())
    }

    fn record_sale(&self, record: &SaleRecord) -> FleetResult<()> {
        let config = &record.config;
        let uid = config.uid.as_deref().unwrap_or("");
        let row = format!(
            "{},{},{},{},{},{},{},{}\n",
            record.timestamp.to_rfc3339(),
            csv_field(&record.origin),
            config.id,
            config.temporada,
            config.tipo,
            csv_field(&config.ubicacion),
            config.precio,
            csv_field(uid),
        );
        let mut file = self.sales.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(row.as_bytes())?;
        Ok(())
    }
}

fn open_append(path: &Path, header: &str) -> FleetResult<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if file.metadata()?.len() == 0 {
        writeln!(file, "{header}")?;
    }
    Ok(file)
}

/// Quotes a field when it contains a delimiter, quote or newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
