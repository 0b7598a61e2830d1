//! # Correlation Broker
//!
//! The request/response correlation engine. Control logic issues a
//! correlated request to one or many devices and blocks until a quorum of
//! replies arrives or a timeout elapses, safely under arbitrary concurrent
//! connects and disconnects.
//!
//! ## Request Patterns
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Correlation Patterns                               │
//! │                                                                         │
//! │  BROADCAST-AND-COLLECT                                                 │
//! │  ─────────────────────                                                 │
//! │  begin_poll([1,2,3]) ──► rid                                           │
//! │  send one line per participant (caller)                                │
//! │  wait(rid, timeout) ──► all replied ─────────► complete reply map      │
//! │                     └─► deadline hit ────────► partial reply map       │
//! │                                                                         │
//! │  SINGLE-TARGET WITH PREDICATE                                          │
//! │  ────────────────────────────                                          │
//! │  begin_ack(7, expected=5) / begin_single(7, pred) ──► rid              │
//! │  wait(rid, timeout) ──► matching reply ──────► resolved early          │
//! │                     └─► deadline hit ────────► unsatisfied             │
//! │                                                                         │
//! │  State machine per request-id:                                         │
//! │    OPEN (created, waiting) → RESOLVED (quorum/predicate/timeout)       │
//! │                            → removed (no garbage survives the wait)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency Discipline
//! All pending state sits behind one short-held lock paired with a
//! per-request [`Notify`]. Waiters re-check the completion predicate after
//! every wake (spurious wakeups, interleaved dispatcher tasks), and the
//! time budget is computed once as an absolute deadline so repeated partial
//! wakeups cannot drift the timeout.
//!
//! A participant that disconnects mid-wait needs no special handling here:
//! it is simply absent from the final reply map, and the wait resolves by
//! quorum of the others or by deadline. Replies that arrive after a wait
//! resolved fall into the unknown-request-id path and are discarded
//! silently; that is expected traffic, not an error.

use std::collections::{HashMap, HashSet};
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::trace;

use tagnet_core::{ReaderKind, TagConfig};

use crate::registry::ConnId;

/// Correlation key carried in `PING`/`READUID` commands and echoed by
/// `PONG`/`UID` replies. Derived from a millisecond clock reading, bumped
/// on same-tick issuance so ids are strictly increasing and never collide.
pub type RequestId = String;

// =============================================================================
// Replies
// =============================================================================

/// One device reply, as routed into a pending correlation.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `PONG <rid> EMPTY` — no payload configured.
    Empty,
    /// `PONG <rid> DATA <json>` — the tag's current configuration.
    Data(TagConfig),
    /// `PONG <rid> NFC <role>` — a reader answering a poll.
    Reader(ReaderKind),
    /// `UID <rid> <hex>` — a captured hardware identifier.
    Uid(String),
    /// `ACK ID=<n>` — routed by sender, not by request-id.
    Ack(i64),
}

/// Early-resolution test for single-target waits.
type Predicate = Box<dyn Fn(&Reply) -> bool + Send + Sync>;

/// How a pending wait decides it is complete.
enum WaitKind {
    /// Every expected participant has an entry in the reply map.
    Quorum,
    /// A reply satisfying the predicate has arrived.
    Predicate(Predicate),
}

// =============================================================================
// Pending Correlation
// =============================================================================

/// One outstanding request-id.
///
/// Invariant: once created, `expected` never grows. Created when a request
/// is issued, populated by the dispatcher, removed by the issuing call once
/// resolved — no garbage accumulates past that point.
struct PendingWait {
    expected: HashSet<ConnId>,
    replies: HashMap<ConnId, Reply>,
    kind: WaitKind,
    satisfied: bool,
    notify: Arc<Notify>,
}

impl PendingWait {
    fn is_complete(&self) -> bool {
        match self.kind {
            WaitKind::Quorum => self.expected.iter().all(|id| self.replies.contains_key(id)),
            WaitKind::Predicate(_) => self.satisfied,
        }
    }
}

/// Resolved outcome of one correlated request.
#[derive(Debug, Clone, PartialEq)]
pub struct Collected {
    /// The request-id this outcome belongs to.
    pub rid: RequestId,

    /// Reply per participant. Partial if the wait hit its deadline.
    pub replies: HashMap<ConnId, Reply>,

    /// Expected participants that never replied, ordered. Missing is a
    /// normal first-class outcome, not an exception path.
    pub missing: Vec<ConnId>,

    /// Quorum waits: every participant replied. Predicate waits: a
    /// matching reply arrived before the deadline.
    pub satisfied: bool,
}

impl Collected {
    /// The reply of one participant, if it arrived.
    pub fn reply_of(&self, id: ConnId) -> Option<&Reply> {
        self.replies.get(&id)
    }
}

// =============================================================================
// Broker
// =============================================================================

#[derive(Default)]
struct BrokerInner {
    /// Pending correlations by request-id.
    pending: HashMap<RequestId, PendingWait>,

    /// Acks carry no request-id on the wire; this maps a sender to its
    /// outstanding ack wait. Last registration per sender wins.
    ack_waits: HashMap<ConnId, RequestId>,

    /// Last issued request-id value, for same-millisecond bumping.
    last_id_ms: i64,
}

/// The correlation broker. Cheap to share behind an [`Arc`]; every method
/// takes `&self`.
#[derive(Default)]
pub struct CorrelationBroker {
    inner: Mutex<BrokerInner>,
}

impl CorrelationBroker {
    pub fn new() -> Self {
        CorrelationBroker::default()
    }

    /// The lock is only ever held for map access; tolerate poisoning from
    /// a panicked test rather than cascading it.
    fn lock(&self) -> MutexGuard<'_, BrokerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_request_id(inner: &mut BrokerInner) -> RequestId {
        let now = Utc::now().timestamp_millis();
        let id = if now <= inner.last_id_ms {
            inner.last_id_ms + 1
        } else {
            now
        };
        inner.last_id_ms = id;
        id.to_string()
    }

    // =========================================================================
    // Opening waits
    // =========================================================================

    /// Opens a broadcast-and-collect wait over `participants`.
    ///
    /// The expected set is fixed at issuance time; participants connecting
    /// afterwards are not part of this request.
    pub fn begin_poll(&self, participants: &[ConnId]) -> RequestId {
        let mut inner = self.lock();
        let rid = Self::next_request_id(&mut inner);
        inner.pending.insert(
            rid.clone(),
            PendingWait {
                expected: participants.iter().copied().collect(),
                replies: HashMap::new(),
                kind: WaitKind::Quorum,
                satisfied: false,
                notify: Arc::new(Notify::new()),
            },
        );
        trace!(rid = %rid, participants = participants.len(), "Opened poll wait");
        rid
    }

    /// Opens a single-target wait resolved early by the first reply
    /// satisfying `predicate`.
    pub fn begin_single<P>(&self, target: ConnId, predicate: P) -> RequestId
    where
        P: Fn(&Reply) -> bool + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let rid = Self::next_request_id(&mut inner);
        inner.pending.insert(
            rid.clone(),
            PendingWait {
                expected: HashSet::from([target]),
                replies: HashMap::new(),
                kind: WaitKind::Predicate(Box::new(predicate)),
                satisfied: false,
                notify: Arc::new(Notify::new()),
            },
        );
        trace!(rid = %rid, conn = target, "Opened single-target wait");
        rid
    }

    /// Opens a wait for `ACK ID=<expected_id>` from `target`.
    ///
    /// Acks are correlated by sender, so the sender→rid index is updated
    /// alongside the pending entry.
    pub fn begin_ack(&self, target: ConnId, expected_id: i64) -> RequestId {
        let rid = self.begin_single(target, move |reply| {
            matches!(reply, Reply::Ack(value) if *value == expected_id)
        });
        self.lock().ack_waits.insert(target, rid.clone());
        rid
    }

    // =========================================================================
    // Recording replies (dispatcher side)
    // =========================================================================

    /// Inserts or overwrites `from`'s entry in the pending correlation and
    /// wakes its waiter.
    ///
    /// Returns false — with no other effect — when the request-id is
    /// unknown (late reply after timeout cleanup) or the sender is not in
    /// the expected set. Duplicates overwrite: last write per participant
    /// per request-id wins.
    pub fn record_reply(&self, rid: &str, from: ConnId, reply: Reply) -> bool {
        let mut inner = self.lock();
        let Some(wait) = inner.pending.get_mut(rid) else {
            trace!(rid = %rid, conn = from, "Reply for unknown request-id, discarding");
            return false;
        };
        if !wait.expected.contains(&from) {
            trace!(rid = %rid, conn = from, "Reply from unexpected participant, discarding");
            return false;
        }
        if let WaitKind::Predicate(predicate) = &wait.kind {
            if predicate(&reply) {
                wait.satisfied = true;
            }
        }
        wait.replies.insert(from, reply);
        wait.notify.notify_waiters();
        true
    }

    /// Routes an `ACK ID=<value>` from a sender into its outstanding ack
    /// wait, if any.
    pub fn record_ack(&self, from: ConnId, value: i64) -> bool {
        let rid = self.lock().ack_waits.get(&from).cloned();
        match rid {
            Some(rid) => self.record_reply(&rid, from, Reply::Ack(value)),
            None => false,
        }
    }

    // =========================================================================
    // Waiting (control-logic side)
    // =========================================================================

    /// Blocks the calling task until the wait is complete or `timeout`
    /// elapses, then removes the pending entry and returns the collected
    /// replies.
    ///
    /// The deadline is absolute: repeated wakeups re-derive the remaining
    /// budget rather than restarting it. After every wake the completion
    /// predicate is re-checked under the lock, which also covers spurious
    /// wakeups and replies interleaving from concurrent dispatcher tasks.
    pub async fn wait(&self, rid: &str, timeout: Duration) -> Collected {
        let deadline = Instant::now() + timeout;

        let notify = {
            let inner = self.lock();
            match inner.pending.get(rid) {
                Some(wait) => wait.notify.clone(),
                // Already resolved or never opened: nothing to wait for.
                None => return self.resolve(rid),
            }
        };

        let mut notified = pin!(notify.notified());
        loop {
            // Register interest before checking, so a notification landing
            // between the check and the await is not lost.
            notified.as_mut().enable();

            let complete = {
                let inner = self.lock();
                inner.pending.get(rid).map(|w| w.is_complete()).unwrap_or(true)
            };
            if complete {
                break;
            }

            match timeout_at(deadline, notified.as_mut()).await {
                Ok(()) => notified.set(notify.notified()),
                Err(_) => break, // deadline reached: resolve with what we have
            }
        }

        self.resolve(rid)
    }

    /// Abandons a wait without blocking, e.g. when the send itself failed.
    pub fn discard(&self, rid: &str) {
        self.resolve(rid);
    }

    /// Removes the pending entry and builds the outcome.
    fn resolve(&self, rid: &str) -> Collected {
        let mut inner = self.lock();
        inner.ack_waits.retain(|_, pending_rid| pending_rid.as_str() != rid);
        match inner.pending.remove(rid) {
            Some(wait) => {
                let mut missing: Vec<ConnId> = wait
                    .expected
                    .iter()
                    .filter(|id| !wait.replies.contains_key(*id))
                    .copied()
                    .collect();
                missing.sort_unstable();
                let satisfied = match wait.kind {
                    WaitKind::Quorum => missing.is_empty(),
                    WaitKind::Predicate(_) => wait.satisfied,
                };
                Collected {
                    rid: rid.to_string(),
                    replies: wait.replies,
                    missing,
                    satisfied,
                }
            }
            None => Collected {
                rid: rid.to_string(),
                replies: HashMap::new(),
                missing: Vec::new(),
                satisfied: false,
            },
        }
    }

    /// Number of outstanding correlations (diagnostics).
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_quorum_partial_replies_resolve_at_timeout() {
        let broker = Arc::new(CorrelationBroker::new());
        let rid = broker.begin_poll(&[1, 2, 3]);

        let recorder = {
            let broker = broker.clone();
            let rid = rid.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(20)).await;
                assert!(broker.record_reply(&rid, 1, Reply::Empty));
                assert!(broker.record_reply(&rid, 2, Reply::Uid("04A3".into())));
                // participant 3 never replies
            })
        };

        let started = std::time::Instant::now();
        let outcome = broker.wait(&rid, Duration::from_millis(150)).await;
        let elapsed = started.elapsed();

        assert_eq!(outcome.replies.len(), 2);
        assert_eq!(outcome.missing, vec![3]);
        assert!(!outcome.satisfied);
        // Returned at the deadline, not before and not long after
        assert!(elapsed >= Duration::from_millis(140));
        assert!(elapsed < Duration::from_secs(2));
        recorder.await.unwrap();

        // Nothing left behind
        assert_eq!(broker.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_quorum_complete_resolves_before_timeout() {
        let broker = Arc::new(CorrelationBroker::new());
        let rid = broker.begin_poll(&[1, 2]);

        {
            let broker = broker.clone();
            let rid = rid.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(10)).await;
                broker.record_reply(&rid, 1, Reply::Empty);
                broker.record_reply(&rid, 2, Reply::Empty);
            });
        }

        let started = std::time::Instant::now();
        let outcome = broker.wait(&rid, Duration::from_secs(5)).await;

        assert!(outcome.satisfied);
        assert!(outcome.missing.is_empty());
        assert_eq!(outcome.replies.len(), 2);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_ack_predicate_resolves_early() {
        let broker = Arc::new(CorrelationBroker::new());
        let rid = broker.begin_ack(7, 7);

        {
            let broker = broker.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(50)).await;
                assert!(broker.record_ack(7, 7));
            });
        }

        let started = std::time::Instant::now();
        let outcome = broker.wait(&rid, Duration::from_millis(2000)).await;

        // Resolved at reply time, nowhere near the 2s budget
        assert!(outcome.satisfied);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(outcome.reply_of(7), Some(&Reply::Ack(7)));
    }

    #[tokio::test]
    async fn test_wrong_ack_value_waits_out_the_timeout() {
        let broker = Arc::new(CorrelationBroker::new());
        let rid = broker.begin_ack(7, 5);

        {
            let broker = broker.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(10)).await;
                broker.record_ack(7, 6);
            });
        }

        let outcome = broker.wait(&rid, Duration::from_millis(120)).await;

        // The mismatched ack is recorded but does not satisfy the wait
        assert!(!outcome.satisfied);
        assert_eq!(outcome.reply_of(7), Some(&Reply::Ack(6)));
    }

    #[tokio::test]
    async fn test_uid_predicate_matches_any_uid_reply() {
        let broker = Arc::new(CorrelationBroker::new());
        let rid = broker.begin_single(3, |reply| matches!(reply, Reply::Uid(_)));

        {
            let broker = broker.clone();
            let rid = rid.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(15)).await;
                broker.record_reply(&rid, 3, Reply::Uid("04A3B2C1".into()));
            });
        }

        let outcome = broker.wait(&rid, Duration::from_secs(2)).await;
        assert!(outcome.satisfied);
        assert_eq!(outcome.reply_of(3), Some(&Reply::Uid("04A3B2C1".into())));
    }

    #[tokio::test]
    async fn test_late_reply_is_discarded_without_effect() {
        let broker = CorrelationBroker::new();
        let rid = broker.begin_poll(&[1]);

        // Resolve by timeout first
        let outcome = broker.wait(&rid, Duration::from_millis(10)).await;
        assert_eq!(outcome.missing, vec![1]);
        assert_eq!(broker.pending_len(), 0);

        // The straggler arrives after cleanup: accepted without error,
        // no observable effect
        assert!(!broker.record_reply(&rid, 1, Reply::Empty));
        assert_eq!(broker.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_reply_from_unexpected_participant_is_ignored() {
        let broker = CorrelationBroker::new();
        let rid = broker.begin_poll(&[1, 2]);

        assert!(!broker.record_reply(&rid, 99, Reply::Empty));

        let outcome = broker.wait(&rid, Duration::from_millis(10)).await;
        assert!(outcome.replies.is_empty());
        assert_eq!(outcome.missing, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_duplicate_reply_last_write_wins() {
        let broker = CorrelationBroker::new();
        let rid = broker.begin_poll(&[1, 2]);

        assert!(broker.record_reply(&rid, 1, Reply::Empty));
        // Retransmission with payload this time
        assert!(broker.record_reply(&rid, 1, Reply::Uid("AA11".into())));

        let outcome = broker.wait(&rid, Duration::from_millis(10)).await;
        assert_eq!(outcome.replies.len(), 1);
        assert_eq!(outcome.reply_of(1), Some(&Reply::Uid("AA11".into())));
    }

    #[tokio::test]
    async fn test_empty_participant_set_resolves_immediately() {
        let broker = CorrelationBroker::new();
        let rid = broker.begin_poll(&[]);

        let started = std::time::Instant::now();
        let outcome = broker.wait(&rid, Duration::from_secs(10)).await;

        assert!(outcome.satisfied);
        assert!(outcome.replies.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_request_ids_are_strictly_increasing() {
        let broker = CorrelationBroker::new();
        let a: i64 = broker.begin_poll(&[1]).parse().unwrap();
        let b: i64 = broker.begin_poll(&[1]).parse().unwrap();
        let c: i64 = broker.begin_poll(&[1]).parse().unwrap();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_ack_wait_reregistration_last_wins() {
        let broker = CorrelationBroker::new();
        let stale = broker.begin_ack(4, 1);
        let fresh = broker.begin_ack(4, 2);

        // The sender's ack routes to the freshest wait
        assert!(broker.record_ack(4, 2));
        let outcome = broker.wait(&fresh, Duration::from_millis(10)).await;
        assert!(outcome.satisfied);

        // The stale wait never sees it
        let outcome = broker.wait(&stale, Duration::from_millis(10)).await;
        assert!(!outcome.satisfied);
    }

    #[tokio::test]
    async fn test_discard_drops_pending_state() {
        let broker = CorrelationBroker::new();
        let rid = broker.begin_ack(2, 9);
        assert_eq!(broker.pending_len(), 1);

        broker.discard(&rid);
        assert_eq!(broker.pending_len(), 0);
        assert!(!broker.record_ack(2, 9));
    }
}
