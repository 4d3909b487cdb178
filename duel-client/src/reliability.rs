//! Message reliability layer.
//!
//! Wraps a lossy [`Transport`] with acknowledgement, bounded retry and
//! receive-side deduplication:
//!
//! - `send` transmits immediately; messages that require an ACK are kept
//!   pending and retransmitted every `retry_interval` up to `max_retries`
//!   times, then dropped with a warning.
//! - `receive` parses a frame. ACKs cancel the matching retry. Other
//!   messages are acknowledged (if required) and delivered once; repeats
//!   are re-acknowledged but not delivered again.
//! - Dedup entries expire after `dedup_ttl`, swept by a background task
//!   that starts on the first receive.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use duel_types::{EndpointId, Frame, MessageId, ReliableMessage};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cleanup::spawn_cleanup_task;
use crate::config::ReliabilityConfig;
use crate::transport::{Transport, TransportError};

/// Reliable delivery over an unreliable transport.
pub struct ReliableChannel<T: Transport + 'static> {
    transport: Arc<T>,
    retry_interval: Duration,
    max_retries: u32,
    dedup_ttl: Duration,
    cleanup_interval: Duration,
    pending: Arc<DashMap<MessageId, JoinHandle<()>>>,
    seen: Arc<DashMap<MessageId, Instant>>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport + 'static> ReliableChannel<T> {
    /// Create a channel over `transport`.
    pub fn new(transport: Arc<T>, config: &ReliabilityConfig) -> Self {
        Self {
            transport,
            retry_interval: config.retry_interval(),
            max_retries: config.max_retries,
            dedup_ttl: config.dedup_ttl(),
            cleanup_interval: config.cleanup_interval(),
            pending: Arc::new(DashMap::new()),
            seen: Arc::new(DashMap::new()),
            cleanup: Mutex::new(None),
        }
    }

    /// Get a reference to the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Send `msg` to `endpoint`.
    ///
    /// Returns once the first transmission was handed to the transport.
    /// A failed first transmission of an acknowledged message is left to
    /// the retry timer; for fire-and-forget messages it is returned.
    pub async fn send(
        &self,
        endpoint: &EndpointId,
        msg: ReliableMessage,
    ) -> Result<MessageId, TransportError> {
        let id = msg.message_id.clone();
        let bytes = Frame::Message(msg.clone()).to_bytes();

        if msg.requires_ack {
            // Register before the first transmission so an immediate ACK
            // finds the entry.
            let handle = self.spawn_retry(endpoint.clone(), id.clone(), bytes.clone(), msg);
            if let Some(previous) = self.pending.insert(id.clone(), handle) {
                previous.abort();
            }
        }

        match self.transport.send_raw(endpoint, &bytes).await {
            Ok(()) => Ok(id),
            Err(e) if self.pending.contains_key(&id) => {
                tracing::warn!("Initial send of {} failed, will retry: {}", id, e);
                Ok(id)
            }
            Err(e) => Err(e),
        }
    }

    fn spawn_retry(
        &self,
        endpoint: EndpointId,
        id: MessageId,
        bytes: Vec<u8>,
        msg: ReliableMessage,
    ) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let pending = Arc::clone(&self.pending);
        let interval = self.retry_interval;
        let max_retries = self.max_retries;

        tokio::spawn(async move {
            for attempt in 1..=max_retries {
                tokio::time::sleep(interval).await;
                if !pending.contains_key(&id) {
                    return;
                }
                tracing::debug!(
                    "Retransmitting {} {} (retry {}/{})",
                    msg.msg_type,
                    id,
                    attempt,
                    max_retries
                );
                if let Err(e) = transport.send_raw(&endpoint, &bytes).await {
                    tracing::debug!("Retransmission of {} failed: {}", id, e);
                }
            }
            tokio::time::sleep(interval).await;
            if pending.remove(&id).is_some() {
                tracing::warn!(
                    "Giving up on {} {} after {} retries",
                    msg.msg_type,
                    id,
                    max_retries
                );
            }
        })
    }

    /// Process raw bytes from `endpoint`.
    ///
    /// Returns the message if it is new; ACKs, duplicates and malformed
    /// frames yield `None`.
    pub async fn receive(&self, endpoint: &EndpointId, bytes: &[u8]) -> Option<ReliableMessage> {
        self.ensure_cleanup();

        let frame = match Frame::from_bytes(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Dropping malformed frame from {}: {}", endpoint, e);
                return None;
            }
        };

        let msg = match frame {
            Frame::Ack(target) => {
                self.handle_ack(&target);
                return None;
            }
            Frame::Message(msg) => msg,
        };

        let is_new = match self.seen.entry(msg.message_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                true
            }
        };

        if msg.requires_ack {
            let ack = Frame::ack_for(&msg).to_bytes();
            if let Err(e) = self.transport.send_raw(endpoint, &ack).await {
                tracing::debug!("Failed to ack {}: {}", msg.message_id, e);
            }
        }

        if is_new {
            Some(msg)
        } else {
            tracing::debug!("Duplicate {} {} suppressed", msg.msg_type, msg.message_id);
            None
        }
    }

    /// Cancel the retry for `target`. Returns `false` for unknown ids.
    pub fn handle_ack(&self, target: &MessageId) -> bool {
        match self.pending.remove(target) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => {
                tracing::debug!("ACK for unknown message {}", target);
                false
            }
        }
    }

    /// Whether `id` is still awaiting an ACK.
    pub fn is_pending(&self, id: &MessageId) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of messages awaiting an ACK.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of remembered message ids.
    pub fn dedup_len(&self) -> usize {
        self.seen.len()
    }

    /// Cancel every retry and the cleanup sweep, and forget all state.
    pub fn stop_all(&self) {
        let ids: Vec<MessageId> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, handle)) = self.pending.remove(&id) {
                handle.abort();
            }
        }
        if let Ok(mut cleanup) = self.cleanup.lock() {
            if let Some(handle) = cleanup.take() {
                handle.abort();
            }
        }
        self.seen.clear();
    }

    fn ensure_cleanup(&self) {
        if let Ok(mut cleanup) = self.cleanup.lock() {
            if cleanup.is_none() {
                *cleanup = Some(spawn_cleanup_task(
                    Arc::clone(&self.seen),
                    self.dedup_ttl,
                    self.cleanup_interval,
                ));
            }
        }
    }
}

impl<T: Transport + 'static> Drop for ReliableChannel<T> {
    fn drop(&mut self) {
        self.stop_all();
    }
}
