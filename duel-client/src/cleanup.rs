//! Background sweep for expired dedup entries.
//!
//! Runs periodically to forget message ids that have exceeded their TTL.

use dashmap::DashMap;
use duel_types::MessageId;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};

/// Remove entries first seen more than `ttl` ago. Returns how many went.
pub fn sweep_expired(seen: &DashMap<MessageId, Instant>, ttl: Duration) -> usize {
    let now = Instant::now();
    let before = seen.len();
    seen.retain(|_, first_seen| now.saturating_duration_since(*first_seen) < ttl);
    before.saturating_sub(seen.len())
}

/// Spawn a background dedup sweep.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(
    seen: Arc<DashMap<MessageId, Instant>>,
    ttl: Duration,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!(
            "Dedup cleanup started (interval: {}s, ttl: {}s)",
            every.as_secs(),
            ttl.as_secs()
        );

        let mut timer = interval_at(Instant::now() + every, every);

        loop {
            timer.tick().await;

            let removed = sweep_expired(&seen, ttl);
            if removed > 0 {
                tracing::debug!("Dedup cleanup: forgot {} message ids", removed);
            } else {
                tracing::trace!("Dedup cleanup: nothing expired");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired_entries() {
        let seen = DashMap::new();
        let old = MessageId::new();
        seen.insert(old.clone(), Instant::now());

        tokio::time::advance(Duration::from_secs(200)).await;
        let fresh = MessageId::new();
        seen.insert(fresh.clone(), Instant::now());

        tokio::time::advance(Duration::from_secs(150)).await;
        assert_eq!(sweep_expired(&seen, Duration::from_secs(300)), 1);
        assert!(!seen.contains_key(&old));
        assert!(seen.contains_key(&fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_task_sweeps_periodically() {
        let seen = Arc::new(DashMap::new());
        seen.insert(MessageId::new(), Instant::now());

        let handle = spawn_cleanup_task(
            Arc::clone(&seen),
            Duration::from_secs(300),
            Duration::from_secs(60),
        );

        // Entry survives sweeps before its TTL.
        tokio::time::sleep(Duration::from_secs(250)).await;
        assert_eq!(seen.len(), 1);

        // First sweep after 300s removes it (next tick at 360s).
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(seen.is_empty());

        handle.abort();
    }
}
