//! Host-driven beacon engine. The advertiser hands out encoded beacons; the listener turns
//! received datagrams into actions. Neither does I/O and they share no state.

use std::time::Duration;

use serde::Serialize;

use crate::protocol::{IpndMessage, PROTOCOL_VERSION};
use crate::registry::ServiceRegistry;
use crate::service::Service;
use crate::wire::{self, MessageDecodeError, MessageEncodeError};

/// Placeholder data volume (bytes) of a derived contact window.
pub const DEFAULT_CONTACT_CAPACITY: u64 = 1000;

/// Owns the outbound template; only the sequence number changes between beacons.
#[derive(Debug, Clone)]
pub struct Advertiser {
    template: IpndMessage,
}

impl Advertiser {
    pub fn new(eid: impl Into<String>, period_secs: u64, services: Vec<Service>) -> Self {
        Self {
            template: IpndMessage {
                version: PROTOCOL_VERSION,
                sequence_number: 0,
                eid: Some(eid.into()),
                services,
                period: Some(period_secs),
            },
        }
    }

    /// Sequence number the next beacon will carry.
    pub fn sequence_number(&self) -> u16 {
        self.template.sequence_number
    }

    pub fn template(&self) -> &IpndMessage {
        &self.template
    }

    /// Encode the next beacon and advance the sequence number (65535 wraps to 0).
    /// An error means the locally built template is invalid; the sequence number is left as is.
    pub fn next_beacon(&mut self) -> Result<Vec<u8>, MessageEncodeError> {
        let frame = wire::encode_message(&self.template)?;
        self.template.sequence_number = self.template.sequence_number.wrapping_add(1);
        Ok(frame)
    }
}

/// Filters received beacons and derives contact updates for the router.
#[derive(Debug, Clone)]
pub struct Listener {
    own_eid: String,
    default_period: u64,
    capacity: u64,
    registry: ServiceRegistry,
}

impl Listener {
    /// `default_period` (seconds) sizes the contact window when a neighbor advertises no period.
    pub fn new(own_eid: impl Into<String>, default_period: u64) -> Self {
        Self {
            own_eid: own_eid.into(),
            default_period,
            capacity: DEFAULT_CONTACT_CAPACITY,
            registry: ServiceRegistry::default(),
        }
    }

    pub fn with_registry(mut self, registry: ServiceRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Set the data volume placed in derived contact windows.
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn own_eid(&self) -> &str {
        &self.own_eid
    }

    /// Process one received datagram.
    pub fn on_datagram(&self, bytes: &[u8]) -> Action {
        match wire::decode_message_with(bytes, &self.registry) {
            Ok(msg) => self.on_message(msg),
            Err(e) => Action::Discard(DiscardReason::Malformed(e)),
        }
    }

    /// Process an already decoded beacon.
    pub fn on_message(&self, msg: IpndMessage) -> Action {
        let Some(eid) = msg.eid.as_deref() else {
            return Action::Discard(DiscardReason::NoEid);
        };
        if eid == self.own_eid {
            return Action::Discard(DiscardReason::OwnBeacon);
        }
        // First advertised CLA wins.
        let Some(cla_address) = msg.cla_services().find_map(Service::cla_address) else {
            return Action::Discard(DiscardReason::NoConvergenceLayer {
                eid: eid.to_string(),
            });
        };
        let period = msg.period.unwrap_or(self.default_period);
        Action::ContactUpdate(ContactUpdate {
            neighbor_eid: eid.to_string(),
            cla_address,
            contacts: vec![ContactWindow::for_period(period, self.capacity)],
        })
    }
}

/// What the host should do with a received datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ContactUpdate(ContactUpdate),
    Discard(DiscardReason),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DiscardReason {
    #[error("{0}")]
    Malformed(MessageDecodeError),
    #[error("beacon carries no eid")]
    NoEid,
    #[error("own beacon")]
    OwnBeacon,
    #[error("no convergence-layer service advertised by {eid}")]
    NoConvergenceLayer { eid: String },
}

/// Contact-update request for the routing daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactUpdate {
    pub neighbor_eid: String,
    pub cla_address: String,
    pub contacts: Vec<ContactWindow>,
}

/// Window in which the neighbor is expected to be reachable, as offsets from now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContactWindow {
    pub start: Duration,
    pub end: Duration,
    /// Data volume in bytes.
    pub capacity: u64,
}

impl ContactWindow {
    /// `[0, 1.5 * period)`.
    pub fn for_period(period_secs: u64, capacity: u64) -> Self {
        Self {
            start: Duration::ZERO,
            end: Duration::from_millis(period_secs.saturating_mul(1500)),
            capacity,
        }
    }
}
