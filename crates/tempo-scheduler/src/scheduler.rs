use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::rule::RecurrenceRule;
use crate::store::ScheduleStore;

/// Host-supplied serializer/deserializer pair for message payloads.
///
/// The store only ever sees the encoded bytes, so it stays agnostic to the
/// payload shape and never deserializes arbitrary types itself.
pub trait PayloadCodec<M> {
    fn encode(&self, message: &M) -> Result<Vec<u8>>;
    fn decode(&self, payload: &[u8]) -> Result<M>;
}

/// JSON codec for any serde-capable message type.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<M: Serialize + DeserializeOwned> PayloadCodec<M> for JsonCodec {
    fn encode(&self, message: &M) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| SchedulerError::Payload(e.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> Result<M> {
        serde_json::from_slice(payload).map_err(|e| SchedulerError::Payload(e.to_string()))
    }
}

/// Thin facade over the store: generates an identifier and inserts.
pub struct MessageScheduler<S> {
    store: S,
}

impl<S: ScheduleStore> MessageScheduler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Schedule pre-encoded payload bytes. Returns the generated identifier.
    pub fn schedule_raw(
        &self,
        payload: Vec<u8>,
        trigger_at: DateTime<Utc>,
        rule: Option<RecurrenceRule>,
        start_at: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.store
            .insert(&id, trigger_at, &payload, rule.as_ref(), start_at)?;
        info!(%id, trigger_at = %trigger_at, recurring = rule.is_some(), "message scheduled");
        Ok(id)
    }

    /// Encode `message` with `codec` and schedule it.
    pub fn schedule<M>(
        &self,
        codec: &impl PayloadCodec<M>,
        message: &M,
        trigger_at: DateTime<Utc>,
        rule: Option<RecurrenceRule>,
        start_at: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let payload = codec.encode(message)?;
        self.schedule_raw(payload, trigger_at, rule, start_at)
    }
}
