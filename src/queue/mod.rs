//! The queue engine: message lease state machine.
//!
//! ```text
//! pending --claim--> in flight --ack--> done
//!                    in flight --ping--> in flight
//!                    in flight --nack | lease expiry--> pending
//!                    in flight --claim past max_retries--> dead-lettered, done
//! ```
//!
//! Every transition is one [`RecordStore::find_one_and_update`] call. The
//! engine keeps no state between calls, so any number of processes can
//! share a collection.
//!
//! Dead-lettering is not atomic across the two queues: the message is
//! added to the dead-letter queue first and acked here second. A crash in
//! between leaves it in both places (at-least-once).

pub mod options;

pub use options::{
    AddOptions, ClaimOptions, DEFAULT_MAX_RETRIES, DEFAULT_VISIBILITY, NackOptions, PingOptions,
    QueueOptions, QueueStats,
};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use opentelemetry::KeyValue;
use tracing::{Instrument, Span, debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Message, NewRecord};
use crate::store::{Filter, RecordStore, Sort, Update};
use crate::telemetry::lease::{record_claimed, start_claim_span};
use crate::telemetry::metrics;

/// A queue over one store collection.
pub struct Queue<S> {
    store: S,
    options: QueueOptions,
    dead_letter: Option<Arc<Queue<S>>>,
}

/// Fresh, unguessable lease token (128 random bits, hex).
fn new_ack() -> String {
    Uuid::new_v4().simple().to_string()
}

/// `now + d`, rejecting durations chrono cannot represent.
fn offset(now: DateTime<Utc>, d: Duration) -> Result<DateTime<Utc>> {
    TimeDelta::from_std(d)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| Error::InvalidArgument(format!("duration out of range: {d:?}")))
}

/// A zero window means "not set".
fn or_visibility(d: Option<Duration>, fallback: Duration) -> Duration {
    d.filter(|d| !d.is_zero()).unwrap_or(fallback)
}

impl<S: RecordStore> Queue<S> {
    /// Queue with default options: 30s visibility, no delay.
    pub fn new(store: S) -> Result<Self> {
        Self::with_options(store, QueueOptions::default())
    }

    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if the store is bound to an empty
    /// collection name. A zero `options.visibility` falls back to
    /// [`DEFAULT_VISIBILITY`].
    pub fn with_options(store: S, mut options: QueueOptions) -> Result<Self> {
        if store.collection().trim().is_empty() {
            return Err(Error::InvalidArgument(
                "queue requires a collection name".to_string(),
            ));
        }
        options.visibility = or_visibility(Some(options.visibility), DEFAULT_VISIBILITY);
        Ok(Self {
            store,
            options,
            dead_letter: None,
        })
    }

    /// Forward messages claimed more than `max_retries` times to `queue`.
    pub fn dead_letter(mut self, queue: Arc<Queue<S>>) -> Self {
        self.dead_letter = Some(queue);
        self
    }

    pub fn name(&self) -> &str {
        self.store.collection()
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn dead_letter_queue(&self) -> Option<&Arc<Queue<S>>> {
        self.dead_letter.as_ref()
    }

    fn record_op(&self, operation: &'static str, result: &'static str) {
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", self.name().to_string()),
                KeyValue::new("operation", operation),
                KeyValue::new("result", result),
            ],
        );
    }

    /// Create the store indexes the queue relies on. Idempotent.
    pub async fn ensure_indexes(&self) -> Result<()> {
        self.store.ensure_indexes().await
    }

    // -----------------------------------------------------------------------
    // Producing
    // -----------------------------------------------------------------------

    /// Add one message with the queue's default delay.
    pub async fn add(&self, payload: serde_json::Value) -> Result<String> {
        self.add_with(payload, AddOptions::default()).await
    }

    pub async fn add_with(&self, payload: serde_json::Value, opts: AddOptions) -> Result<String> {
        let visible = offset(Utc::now(), opts.delay.unwrap_or(self.options.delay))?;
        let id = self
            .store
            .insert_one(NewRecord::new(payload, visible))
            .await
            .inspect_err(|_| self.record_op("add", "error"))?;

        self.record_op("add", "ok");
        debug!(queue = self.name(), %id, %visible, "message added");
        Ok(id.to_string())
    }

    /// Add many messages at once, sharing one visibility time. Ids come
    /// back in the order of `payloads`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `payloads` is empty.
    pub async fn add_many(&self, payloads: Vec<serde_json::Value>) -> Result<Vec<String>> {
        self.add_many_with(payloads, AddOptions::default()).await
    }

    pub async fn add_many_with(
        &self,
        payloads: Vec<serde_json::Value>,
        opts: AddOptions,
    ) -> Result<Vec<String>> {
        if payloads.is_empty() {
            return Err(Error::InvalidArgument(
                "add_many requires at least one payload".to_string(),
            ));
        }

        let visible = offset(Utc::now(), opts.delay.unwrap_or(self.options.delay))?;
        let records = payloads
            .into_iter()
            .map(|payload| NewRecord::new(payload, visible))
            .collect();
        let ids = self
            .store
            .insert_many(records)
            .await
            .inspect_err(|_| self.record_op("add", "error"))?;

        self.record_op("add", "ok");
        debug!(queue = self.name(), count = ids.len(), %visible, "messages added");
        Ok(ids.into_iter().map(|id| id.to_string()).collect())
    }

    // -----------------------------------------------------------------------
    // Consuming
    // -----------------------------------------------------------------------

    /// Lease the oldest claimable message, or `None` if there is none.
    pub async fn claim(&self) -> Result<Option<Message>> {
        self.claim_with(ClaimOptions::default()).await
    }

    /// Lease the oldest claimable message.
    ///
    /// Selection is by smallest id, which approximates arrival order but
    /// does not guarantee it under concurrent producers. A message whose
    /// `tries` now exceeds `max_retries` is moved to the dead-letter queue
    /// (when one is configured) and the next message is claimed instead.
    /// A zero `opts.visibility` uses the queue's window.
    pub async fn claim_with(&self, opts: ClaimOptions) -> Result<Option<Message>> {
        let visibility = or_visibility(opts.visibility, self.options.visibility);
        let span = start_claim_span(self.name());
        self.claim_loop(visibility, &span)
            .instrument(span.clone())
            .await
    }

    async fn claim_loop(&self, visibility: Duration, span: &Span) -> Result<Option<Message>> {
        loop {
            let now = Utc::now();
            let update = Update::Claim {
                ack: new_ack(),
                visible: offset(now, visibility)?,
            };
            let record = self
                .store
                .find_one_and_update(Filter::Available { now }, update, Sort::IdAscending)
                .await
                .inspect_err(|_| self.record_op("claim", "error"))?;

            let Some(record) = record else {
                self.record_op("claim_empty", "ok");
                return Ok(None);
            };
            let msg = Message::try_from(record)?;

            metrics::claim_tries().record(
                u64::from(msg.tries),
                &[KeyValue::new("queue", self.name().to_string())],
            );

            if let Some(dead) = &self.dead_letter {
                if msg.tries > self.options.max_retries {
                    self.forward_to_dead_letter(dead, msg).await?;
                    continue;
                }
            }

            self.record_op("claim", "ok");
            record_claimed(span, &msg.id, msg.tries);
            debug!(queue = self.name(), id = %msg.id, tries = msg.tries, "message claimed");
            return Ok(Some(msg));
        }
    }

    async fn forward_to_dead_letter(&self, dead: &Queue<S>, msg: Message) -> Result<()> {
        warn!(
            queue = self.name(),
            dead_letter = dead.name(),
            id = %msg.id,
            tries = msg.tries,
            max_retries = self.options.max_retries,
            "retries exhausted, dead-lettering message"
        );

        dead.add(serde_json::to_value(&msg)?).await?;

        // The lease may have run out while the dead-letter insert was in
        // progress, so resolve by token alone. A re-claim meanwhile changes
        // the token and nothing matches.
        let now = Utc::now();
        let resolved = self
            .store
            .find_one_and_update(
                Filter::Token {
                    ack: msg.ack.clone(),
                },
                Update::Resolve { deleted: now },
                Sort::Natural,
            )
            .await
            .inspect_err(|_| self.record_op("dead_letter", "error"))?;
        if resolved.is_none() {
            warn!(
                queue = self.name(),
                id = %msg.id,
                "message re-claimed during dead-lettering, origin left unresolved"
            );
            self.record_op("dead_letter", "superseded");
            return Ok(());
        }
        self.record_op("dead_letter", "ok");

        metrics::dead_lettered().add(
            1,
            &[
                KeyValue::new("queue", self.name().to_string()),
                KeyValue::new("dead_letter", dead.name().to_string()),
            ],
        );
        Ok(())
    }

    /// Apply `update` to the live lease named by `ack`, returning the id.
    async fn update_lease(
        &self,
        op: &'static str,
        ack: &str,
        now: DateTime<Utc>,
        update: Update,
    ) -> Result<String> {
        let filter = Filter::Lease {
            ack: ack.to_string(),
            now,
        };
        let record = self
            .store
            .find_one_and_update(filter, update, Sort::Natural)
            .await
            .inspect_err(|_| self.record_op(op, "error"))?;

        match record {
            Some(record) => {
                self.record_op(op, "ok");
                debug!(queue = self.name(), id = %record.id, op, "lease updated");
                Ok(record.id.to_string())
            }
            None => {
                self.record_op(op, "unknown_ack");
                Err(Error::unknown_ack(op, ack))
            }
        }
    }

    /// Extend a live lease by the queue's visibility window.
    pub async fn ping(&self, ack: &str) -> Result<String> {
        self.ping_with(ack, PingOptions::default()).await
    }

    /// Extend a live lease. An expired or resolved lease is rejected with
    /// [`Error::UnknownAck`], never revived.
    /// A zero `opts.visibility` uses the queue's window.
    pub async fn ping_with(&self, ack: &str, opts: PingOptions) -> Result<String> {
        let visibility = or_visibility(opts.visibility, self.options.visibility);
        let now = Utc::now();
        let update = Update::Extend {
            visible: offset(now, visibility)?,
        };
        self.update_lease("ping", ack, now, update).await
    }

    /// Resolve a live lease permanently.
    ///
    /// Not idempotent: acking the same token twice fails the second time.
    pub async fn ack(&self, ack: &str) -> Result<String> {
        let now = Utc::now();
        self.update_lease("ack", ack, now, Update::Resolve { deleted: now })
            .await
    }

    /// Release a live lease so the message is claimable again right away.
    pub async fn nack(&self, ack: &str) -> Result<String> {
        self.nack_with(ack, NackOptions::default()).await
    }

    /// Release a live lease, making the message claimable after
    /// `opts.delay`. `tries` is kept.
    ///
    /// The token is not cleared. Until the delay passes it still counts as
    /// a live lease, so `ack` and `ping` accept it and a `ping` pushes the
    /// message's visibility out again. Stop using a token once it is nacked.
    pub async fn nack_with(&self, ack: &str, opts: NackOptions) -> Result<String> {
        let now = Utc::now();
        let update = Update::Extend {
            visible: offset(now, opts.delay.unwrap_or(Duration::ZERO))?,
        };
        self.update_lease("nack", ack, now, update).await
    }

    // -----------------------------------------------------------------------
    // Maintenance & statistics
    // -----------------------------------------------------------------------

    /// Delete every acknowledged message. Returns how many were removed.
    pub async fn clean(&self) -> Result<u64> {
        let removed = self
            .store
            .delete_many(Filter::Done)
            .await
            .inspect_err(|_| self.record_op("clean", "error"))?;
        self.record_op("clean", "ok");
        debug!(queue = self.name(), removed, "cleaned done messages");
        Ok(removed)
    }

    /// All records, whatever their state.
    pub async fn total(&self) -> Result<u64> {
        self.store.count(Filter::All).await
    }

    /// Records claimable right now.
    pub async fn size(&self) -> Result<u64> {
        self.store.count(Filter::Available { now: Utc::now() }).await
    }

    /// Records under a live lease.
    pub async fn in_flight(&self) -> Result<u64> {
        self.store.count(Filter::InFlight { now: Utc::now() }).await
    }

    /// Acknowledged records not yet removed by `clean`.
    pub async fn done(&self) -> Result<u64> {
        self.store.count(Filter::Done).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            total: self.total().await?,
            size: self.size().await?,
            in_flight: self.in_flight().await?,
            done: self.done().await?,
        })
    }
}
