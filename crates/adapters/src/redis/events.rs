// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pub/sub forwarding into a local event bus

use futures::StreamExt;
use warden_core::{EventBus, LockError, LockEvent};

/// Decode one channel payload; unknown shapes are skipped
pub fn decode_event(payload: &str) -> Option<LockEvent> {
    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(error = %e, payload, "skipping undecodable event");
            None
        }
    }
}

/// Subscribe to `pattern` and republish every decoded event on `bus`
///
/// Runs until the connection drops. Delivery to subscribers goes through the
/// bus, so a full mailbox drops the event there and never blocks the reader.
pub async fn spawn_forwarder(
    client: redis::Client,
    pattern: String,
    bus: EventBus,
) -> Result<tokio::task::JoinHandle<()>, LockError> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| LockError::backend(format!("pubsub connect: {}", e)))?;
    pubsub
        .psubscribe(&pattern)
        .await
        .map_err(|e| LockError::backend(format!("psubscribe {}: {}", pattern, e)))?;

    Ok(tokio::spawn(async move {
        let mut messages = pubsub.into_on_message();
        while let Some(message) = messages.next().await {
            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::debug!(error = %e, "non-text event payload");
                    continue;
                }
            };
            if let Some(event) = decode_event(&payload) {
                bus.publish(event);
            }
        }
        tracing::warn!(pattern, "event subscription closed");
    }))
}
