//! Deferred `last_used_at` writes.
//!
//! The gate hands each successful authorization to a bounded channel and
//! moves on. A single writer task drains it into the store. When the
//! channel is full the update is dropped: delivery is at most once, and
//! the request path never waits on the store for this.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::store::CredentialStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastUsed {
    pub credential_id: Uuid,
    pub at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct LastUsedRecorder {
    tx: mpsc::Sender<LastUsed>,
}

impl LastUsedRecorder {
    /// Spawn the writer task. Must be called from within a Tokio runtime.
    pub fn spawn(store: Arc<dyn CredentialStore>, capacity: usize) -> Self {
        let (recorder, rx) = Self::detached(capacity);
        tokio::spawn(run(store, rx));
        recorder
    }

    /// Recorder without a writer; the caller owns the receiving end.
    pub fn detached(capacity: usize) -> (Self, mpsc::Receiver<LastUsed>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue an update. Never blocks, never fails the caller.
    pub fn record(&self, credential_id: Uuid, at: DateTime<Utc>) {
        match self.tx.try_send(LastUsed { credential_id, at }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::debug!(credential_id = %credential_id, "last_used queue full, update dropped");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(credential_id = %credential_id, "last_used writer stopped, update dropped");
            }
        }
    }
}

async fn run(store: Arc<dyn CredentialStore>, mut rx: mpsc::Receiver<LastUsed>) {
    while let Some(update) = rx.recv().await {
        if let Err(e) = store.touch_last_used(update.credential_id, update.at).await {
            tracing::warn!(
                credential_id = %update.credential_id,
                "failed to update last_used_at: {}",
                e
            );
        }
    }
    tracing::debug!("last_used writer exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CredentialKind, NewCredential};
    use crate::store::memory::MemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (recorder, mut rx) = LastUsedRecorder::detached(2);
        let id = Uuid::new_v4();
        let now = Utc::now();

        for _ in 0..10 {
            recorder.record(id, now);
        }

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 2);
    }

    #[tokio::test]
    async fn test_closed_queue_is_harmless() {
        let (recorder, rx) = LastUsedRecorder::detached(1);
        drop(rx);
        recorder.record(Uuid::new_v4(), Utc::now());
    }

    #[tokio::test]
    async fn test_writer_updates_store() {
        let store = Arc::new(MemoryStore::new());
        let cred = store
            .insert(NewCredential {
                id: Uuid::new_v4(),
                owner_id: "o".into(),
                name: "n".into(),
                prefix: "sk_".into(),
                digest: "d".into(),
                hint: "abcd".into(),
                kind: CredentialKind::General,
                rate_limit: 1,
                created_at: Utc::now(),
                permissions: None,
            })
            .await
            .unwrap();

        let recorder = LastUsedRecorder::spawn(store.clone(), 8);
        let at = Utc::now();
        recorder.record(cred.id, at);

        let mut seen = None;
        for _ in 0..50 {
            seen = store.find_by_digest("d").await.unwrap().and_then(|c| c.last_used_at);
            if seen.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen, Some(at));
    }
}
