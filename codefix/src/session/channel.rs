// Push channel routing
// Maps a session identifier to the one live push connection serving it.
// Connections own the receiving half; dropping the sender closes the socket.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("No client found for identifier '{0}'")]
    NoClient(String),
    #[error("Connection for identifier '{0}' has closed")]
    Closed(String),
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug)]
struct ChannelHandle {
    connection_id: u64,
    tx: mpsc::UnboundedSender<String>,
}

/// Returned to a connection when it is bound
#[derive(Debug)]
pub struct Binding {
    pub connection_id: u64,
    /// Serialized messages queued for this connection; `None` means close
    pub outbound: mpsc::UnboundedReceiver<String>,
}

/// Owns the identifier -> connection map
#[derive(Debug, Default)]
pub struct ChannelRouter {
    next_id: AtomicU64,
    channels: Mutex<HashMap<String, ChannelHandle>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a new connection to `identifier`, replacing any previous one.
    ///
    /// The replaced connection sees its outbound queue end and closes itself.
    pub async fn bind(&self, identifier: &str) -> Binding {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, outbound) = mpsc::unbounded_channel();

        let previous = self.channels.lock().await.insert(
            identifier.to_string(),
            ChannelHandle { connection_id, tx },
        );
        if let Some(previous) = previous {
            tracing::info!(
                identifier,
                replaced = previous.connection_id,
                connection_id,
                "Replacing push connection"
            );
        }

        Binding {
            connection_id,
            outbound,
        }
    }

    /// Remove the mapping only if it still belongs to `connection_id`
    pub async fn unbind(&self, identifier: &str, connection_id: u64) -> bool {
        let mut channels = self.channels.lock().await;
        match channels.get(identifier) {
            Some(handle) if handle.connection_id == connection_id => {
                channels.remove(identifier);
                true
            }
            _ => false,
        }
    }

    /// Serialize `message` and queue it on the identifier's connection
    pub async fn send_to_session<T: Serialize>(
        &self,
        identifier: &str,
        message: &T,
    ) -> Result<(), DeliveryError> {
        let payload = serde_json::to_string(message)?;

        let mut channels = self.channels.lock().await;
        let handle = channels
            .get(identifier)
            .ok_or_else(|| DeliveryError::NoClient(identifier.to_string()))?;

        if handle.tx.send(payload).is_err() {
            channels.remove(identifier);
            return Err(DeliveryError::Closed(identifier.to_string()));
        }
        Ok(())
    }

    /// Close the connection bound to `identifier`, if any
    pub async fn disconnect(&self, identifier: &str) -> bool {
        self.channels.lock().await.remove(identifier).is_some()
    }

    /// Close every connection
    pub async fn close_all(&self) -> usize {
        let mut channels = self.channels.lock().await;
        let count = channels.len();
        channels.clear();
        count
    }

    pub async fn is_bound(&self, identifier: &str) -> bool {
        self.channels.lock().await.contains_key(identifier)
    }

    pub async fn len(&self) -> usize {
        self.channels.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::protocol::ChannelNotification;

    #[tokio::test]
    async fn test_send_without_client_is_no_client() {
        let router = ChannelRouter::new();
        let err = router
            .send_to_session("proj1", &serde_json::json!({"a": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::NoClient(ref id) if id == "proj1"));
    }

    #[tokio::test]
    async fn test_send_delivers_serialized_json() {
        let router = ChannelRouter::new();
        let mut binding = router.bind("proj1").await;

        let notification = ChannelNotification::FileWritten {
            file_path: "hello.txt".to_string(),
            contents: "hi".to_string(),
        };
        router.send_to_session("proj1", &notification).await.unwrap();

        let received = binding.outbound.recv().await.unwrap();
        assert_eq!(received, serde_json::to_string(&notification).unwrap());
    }

    #[tokio::test]
    async fn test_rebind_replaces_and_closes_previous() {
        let router = ChannelRouter::new();
        let mut first = router.bind("proj1").await;
        let mut second = router.bind("proj1").await;
        assert_ne!(first.connection_id, second.connection_id);
        assert_eq!(router.len().await, 1);

        // Old queue ends once its sender is dropped
        assert!(first.outbound.recv().await.is_none());

        router.send_to_session("proj1", &"ping").await.unwrap();
        assert_eq!(second.outbound.recv().await.unwrap(), "\"ping\"");
    }

    #[tokio::test]
    async fn test_stale_unbind_keeps_newer_mapping() {
        let router = ChannelRouter::new();
        let first = router.bind("proj1").await;
        let second = router.bind("proj1").await;

        assert!(!router.unbind("proj1", first.connection_id).await);
        assert!(router.is_bound("proj1").await);

        assert!(router.unbind("proj1", second.connection_id).await);
        assert!(!router.is_bound("proj1").await);
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_is_closed() {
        let router = ChannelRouter::new();
        let binding = router.bind("proj1").await;
        drop(binding);

        let err = router.send_to_session("proj1", &"x").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Closed(_)));
        assert!(!router.is_bound("proj1").await);
    }

    #[tokio::test]
    async fn test_disconnect_and_close_all() {
        let router = ChannelRouter::new();
        let mut a = router.bind("a").await;
        let _b = router.bind("b").await;

        assert!(router.disconnect("a").await);
        assert!(!router.disconnect("a").await);
        assert!(a.outbound.recv().await.is_none());

        assert_eq!(router.close_all().await, 1);
        assert!(router.is_empty().await);
    }
}
