//! Best-effort publication of domain events to NATS.

use crate::domain::events::DomainEvent;

pub const SUBJECT_PREFIX: &str = "marketplace";

#[derive(Clone, Default)]
pub struct EventPublisher {
    nats: Option<async_nats::Client>,
}

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self { Self { nats } }

    /// Connects when a URL is given; a failed connection disables publishing.
    pub async fn connect(url: Option<&str>) -> Self {
        let Some(url) = url else { return Self::default() };
        match async_nats::connect(url).await {
            Ok(client) => {
                tracing::info!(%url, "connected to NATS");
                Self::new(Some(client))
            }
            Err(e) => {
                tracing::warn!(%url, error = %e, "NATS unavailable, events will be dropped");
                Self::default()
            }
        }
    }

    pub fn is_connected(&self) -> bool { self.nats.is_some() }

    pub fn subject_for(event: &DomainEvent) -> String { format!("{SUBJECT_PREFIX}.{}", event.subject()) }

    /// Never fails the caller.
    pub async fn publish(&self, event: DomainEvent) {
        let subject = Self::subject_for(&event);
        let Some(client) = &self.nats else {
            tracing::debug!(%subject, "no NATS client, event dropped");
            return;
        };
        let payload = match serde_json::to_vec(&event) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(%subject, error = %e, "event serialization failed");
                return;
            }
        };
        if let Err(e) = client.publish(subject.clone(), payload.into()).await {
            tracing::warn!(%subject, error = %e, "event publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::ProductId;

    #[tokio::test]
    async fn disconnected_publisher_drops_silently() {
        let events = EventPublisher::connect(None).await;
        assert!(!events.is_connected());
        let event = DomainEvent::ProductDeleted { product_id: ProductId::generate(), cart_items_removed: 1, images_removed: 2 };
        assert_eq!(EventPublisher::subject_for(&event), "marketplace.product.deleted");
        events.publish(event).await;
    }
}
