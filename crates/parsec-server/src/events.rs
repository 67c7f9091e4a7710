//! In-process publish/subscribe, keyed by organization.
//!
//! Each organization gets its own broadcast channel so that subscribers of
//! one organization never observe another's traffic and per-organization
//! publish order is preserved. Slow subscribers lag and eventually miss
//! events, which the SSE layer turns into a clean disconnect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use parsec_types::{
    DateTime, InvitationStatus, InvitationToken, OrganizationID, SequesterServiceID, UserID,
    VlobID,
};

/// A typed event, delivered to subscribers of one organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A certificate touched the common topic.
    CommonCertificate { timestamp: DateTime },
    /// A certificate touched a realm topic.
    RealmCertificate {
        realm_id: VlobID,
        timestamp: DateTime,
    },
    /// A certificate touched the sequester topic.
    SequesterCertificate { timestamp: DateTime },
    /// A certificate touched the Shamir recovery topic; recipients and the
    /// setup author need to refresh.
    ShamirRecoveryCertificate { timestamp: DateTime },
    Pinged {
        ping: String,
    },
    UserRevokedOrFrozen {
        user_id: UserID,
    },
    UserUnfrozen {
        user_id: UserID,
    },
    InvitationChanged {
        token: InvitationToken,
        status: InvitationStatus,
    },
    PkiEnrollment,
    VlobsUpdated {
        realm_id: VlobID,
        checkpoint: u64,
        vlob_id: VlobID,
        version: u64,
    },
    /// A webhook sequester service could not be reached; surfaced for
    /// monitoring, never for clients.
    SequesterWebhookFailed {
        service_id: SequesterServiceID,
    },
}

/// Per-organization event bus.
#[derive(Clone)]
pub struct EventBus {
    capacity: usize,
    channels: Arc<Mutex<HashMap<OrganizationID, broadcast::Sender<Event>>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn channel(&self, organization_id: &OrganizationID) -> broadcast::Sender<Event> {
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels
            .entry(organization_id.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Emit an event to all subscribers of the organization.
    pub fn emit(&self, organization_id: &OrganizationID, event: Event) {
        tracing::debug!(organization = %organization_id, ?event, "emit");
        // Ignore send errors (no subscribers)
        let _ = self.channel(organization_id).send(event);
    }

    /// Subscribe to one organization's events.
    pub fn subscribe(&self, organization_id: &OrganizationID) -> broadcast::Receiver<Event> {
        self.channel(organization_id).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org(raw: &str) -> OrganizationID {
        raw.parse().unwrap()
    }

    #[tokio::test]
    async fn test_publish_order_per_organization() {
        let bus = EventBus::new(16);
        let org_id = org("CoolOrg");
        let mut rx = bus.subscribe(&org_id);

        for i in 0..3 {
            bus.emit(
                &org_id,
                Event::Pinged {
                    ping: i.to_string(),
                },
            );
        }
        for i in 0..3 {
            assert_eq!(
                rx.recv().await.unwrap(),
                Event::Pinged {
                    ping: i.to_string()
                }
            );
        }
    }

    #[tokio::test]
    async fn test_organizations_are_isolated() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe(&org("OrgA"));
        bus.emit(&org("OrgB"), Event::PkiEnrollment);
        bus.emit(&org("OrgA"), Event::Pinged { ping: "hi".into() });
        assert_eq!(rx.recv().await.unwrap(), Event::Pinged { ping: "hi".into() });
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags() {
        let bus = EventBus::new(2);
        let org_id = org("CoolOrg");
        let mut rx = bus.subscribe(&org_id);
        for i in 0..5 {
            bus.emit(
                &org_id,
                Event::Pinged {
                    ping: i.to_string(),
                },
            );
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }
}
