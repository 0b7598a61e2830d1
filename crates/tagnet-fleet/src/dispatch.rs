//! # Protocol Dispatcher
//!
//! Classifies each decoded line by its leading token and routes it:
//! poll/uid replies into the correlation broker, role announcements into
//! the registry, event records into the sink, everything else into a
//! logged no-op.
//!
//! ## Routing Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Line                      Destination                                  │
//! │  ────────────────────────  ───────────────────────────────────────────  │
//! │  PONG <rid> …              broker (reply map for <rid>)                 │
//! │  UID <rid> <hex>           broker (reply map for <rid>)                 │
//! │  ACK ID=<n>                registry (last ack) + broker (ack wait)      │
//! │  ROLE NFC <BOX|DOOR>       registry (role fields, idempotent)           │
//! │  MOVE <json> / SOLD <json> event sink                                   │
//! │  SCAN <hex>                event sink (direction from reader role)      │
//! │  RESET / unknown           no-op                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Fault policy: a malformed body on a recognized token is a transient peer
//! fault — logged, dropped, the connection stays open. A reply carrying an
//! unknown request-id (late arrival after timeout cleanup) is discarded
//! silently; that is expected, not an error.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, trace, warn};

use tagnet_core::{MovementRecord, SaleRecord};

use crate::broker::{CorrelationBroker, Reply};
use crate::protocol::{DeviceMessage, PongReply};
use crate::registry::{ConnId, ConnectionRegistry};
use crate::sink::EventSink;

/// Routes parsed device lines to the broker, registry and sink.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    broker: Arc<CorrelationBroker>,
    sink: Arc<dyn EventSink>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broker: Arc<CorrelationBroker>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Dispatcher {
            registry,
            broker,
            sink,
        }
    }

    /// Dispatches one framed line from connection `from` at `origin`.
    ///
    /// Never fails: every fault is downgraded to a log line so that no
    /// message can kill the connection's receive loop.
    pub async fn dispatch(&self, from: ConnId, origin: &str, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        trace!(conn = from, line, "Line received");

        let message = match DeviceMessage::parse(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(conn = from, error = %e, "Dropping malformed line");
                return;
            }
        };

        match message {
            DeviceMessage::Pong { rid, reply } => {
                // Readers answering polls double as role announcements.
                if let PongReply::Reader(kind) = &reply {
                    self.registry.set_reader_role(from, *kind).await;
                }
                let reply = match reply {
                    PongReply::Empty => Reply::Empty,
                    PongReply::Data(config) => Reply::Data(config),
                    PongReply::Reader(kind) => Reply::Reader(kind),
                };
                if !self.broker.record_reply(&rid, from, reply) {
                    debug!(conn = from, rid = %rid, "Late or stale poll reply discarded");
                }
            }

            DeviceMessage::Uid { rid, uid } => {
                if !self.broker.record_reply(&rid, from, Reply::Uid(uid)) {
                    debug!(conn = from, rid = %rid, "Late or stale uid reply discarded");
                }
            }

            DeviceMessage::Ack { id } => {
                self.registry.record_ack(from, id).await;
                if !self.broker.record_ack(from, id) {
                    debug!(conn = from, ack = id, "Ack with no outstanding wait");
                }
            }

            DeviceMessage::Role { kind } => {
                self.registry.set_reader_role(from, kind).await;
            }

            DeviceMessage::Move(event) => {
                let record = MovementRecord::from_event(origin, event, Utc::now());
                if let Err(e) = self.sink.record_movement(&record) {
                    error!(conn = from, error = %e, "Failed to persist movement");
                }
            }

            DeviceMessage::Sold(config) => {
                let record = SaleRecord::new(origin, config, Utc::now());
                if let Err(e) = self.sink.record_sale(&record) {
                    error!(conn = from, error = %e, "Failed to persist sale");
                }
            }

            DeviceMessage::Scan { uid } => match self.registry.reader_kind(from).await {
                Some(kind) => {
                    let record = MovementRecord::from_scan(origin, &uid, kind, Utc::now());
                    if let Err(e) = self.sink.record_movement(&record) {
                        error!(conn = from, error = %e, "Failed to persist scan movement");
                    }
                }
                None => {
                    warn!(conn = from, uid = %uid, "Scan from connection without reader role, dropping");
                }
            },

            DeviceMessage::Reset => {
                debug!(conn = from, "Device reset announced");
            }

            DeviceMessage::Unknown => {
                debug!(conn = from, line, "Unrecognized line, ignoring");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use tagnet_core::{ReaderKind, Zone};
    use tokio::sync::mpsc;

    use crate::error::FleetResult;

    #[derive(Default)]
    struct RecordingSink {
        movements: Mutex<Vec<MovementRecord>>,
        sales: Mutex<Vec<SaleRecord>>,
    }

    impl EventSink for RecordingSink {
        fn record_movement(&self, record: &MovementRecord) -> FleetResult<()> {
            self.movements.lock().unwrap().push(record.clone());
            Ok(())
        }

        fn record_sale(&self, record: &SaleRecord) -> FleetResult<()> {
            self.sales.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        broker: Arc<CorrelationBroker>,
        sink: Arc<RecordingSink>,
        dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let broker = Arc::new(CorrelationBroker::new());
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = Dispatcher::new(registry.clone(), broker.clone(), sink.clone());
        Fixture {
            registry,
            broker,
            sink,
            dispatcher,
        }
    }

    async fn connect(fix: &Fixture) -> ConnId {
        let addr: SocketAddr = "127.0.0.1:4711".parse().unwrap();
        fix.registry.register(addr, mpsc::channel(8).0).await
    }

    #[tokio::test]
    async fn test_pong_routes_into_open_poll() {
        let fix = fixture();
        let id = connect(&fix).await;
        let rid = fix.broker.begin_poll(&[id]);

        fix.dispatcher
            .dispatch(id, "127.0.0.1:4711", &format!("PONG {rid} EMPTY"))
            .await;

        let outcome = fix.broker.wait(&rid, std::time::Duration::from_millis(10)).await;
        assert!(outcome.satisfied);
        assert_eq!(outcome.reply_of(id), Some(&Reply::Empty));
    }

    #[tokio::test]
    async fn test_reader_pong_also_updates_role() {
        let fix = fixture();
        let id = connect(&fix).await;
        let rid = fix.broker.begin_poll(&[id]);

        fix.dispatcher
            .dispatch(id, "127.0.0.1:4711", &format!("PONG {rid} NFC BOX"))
            .await;

        assert_eq!(fix.registry.reader_kind(id).await, Some(ReaderKind::Box));
    }

    #[tokio::test]
    async fn test_ack_updates_registry_and_broker() {
        let fix = fixture();
        let id = connect(&fix).await;
        let rid = fix.broker.begin_ack(id, 7);

        fix.dispatcher.dispatch(id, "127.0.0.1:4711", "ACK ID=7").await;

        let info = fix.registry.get(id).await.unwrap();
        assert_eq!(info.last_ack, Some(7));

        let outcome = fix.broker.wait(&rid, std::time::Duration::from_millis(10)).await;
        assert!(outcome.satisfied);
    }

    #[tokio::test]
    async fn test_role_announcement_is_applied() {
        let fix = fixture();
        let id = connect(&fix).await;

        fix.dispatcher
            .dispatch(id, "127.0.0.1:4711", "ROLE NFC DOOR")
            .await;

        assert_eq!(fix.registry.reader_kind(id).await, Some(ReaderKind::Door));
    }

    #[tokio::test]
    async fn test_move_and_sold_reach_the_sink() {
        let fix = fixture();
        let id = connect(&fix).await;

        fix.dispatcher
            .dispatch(
                id,
                "127.0.0.1:4711",
                r#"MOVE {"UID":"04A3","Desde":"Tienda","Hasta":"Almacen"}"#,
            )
            .await;
        fix.dispatcher
            .dispatch(
                id,
                "127.0.0.1:4711",
                r#"SOLD {"ID":5,"Temporada":"Verano","Tipo":"Gorra","Ubicacion":"A1","Precio":9.5}"#,
            )
            .await;

        let movements = fix.sink.movements.lock().unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].uid, "04A3");
        assert_eq!(movements[0].origin, "127.0.0.1:4711");

        let sales = fix.sink.sales.lock().unwrap();
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0].config.id, 5);
    }

    #[tokio::test]
    async fn test_scan_direction_follows_reader_role() {
        let fix = fixture();
        let id = connect(&fix).await;

        // Without a role the scan is dropped
        fix.dispatcher.dispatch(id, "127.0.0.1:4711", "SCAN 04A3").await;
        assert!(fix.sink.movements.lock().unwrap().is_empty());

        fix.dispatcher
            .dispatch(id, "127.0.0.1:4711", "ROLE NFC DOOR")
            .await;
        fix.dispatcher.dispatch(id, "127.0.0.1:4711", "SCAN 04A3").await;

        let movements = fix.sink.movements.lock().unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].desde, Zone::Almacen);
        assert_eq!(movements[0].hasta, Zone::Tienda);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_lines_are_harmless() {
        let fix = fixture();
        let id = connect(&fix).await;

        fix.dispatcher.dispatch(id, "127.0.0.1:4711", "MOVE {garbage").await;
        fix.dispatcher.dispatch(id, "127.0.0.1:4711", "BANANA 12").await;
        fix.dispatcher.dispatch(id, "127.0.0.1:4711", "RESET").await;
        fix.dispatcher.dispatch(id, "127.0.0.1:4711", "   ").await;

        // Connection still registered, nothing recorded
        assert!(fix.registry.get(id).await.is_some());
        assert!(fix.sink.movements.lock().unwrap().is_empty());
        assert!(fix.sink.sales.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_reply_has_no_observable_effect() {
        let fix = fixture();
        let id = connect(&fix).await;

        // No wait was ever opened for this rid
        fix.dispatcher
            .dispatch(id, "127.0.0.1:4711", "PONG 999 EMPTY")
            .await;
        fix.dispatcher
            .dispatch(id, "127.0.0.1:4711", "UID 999 04A3")
            .await;

        assert_eq!(fix.broker.pending_len(), 0);
    }
}
