//! IPND wire protocol: message type, flags and well-known constants.

use crate::service::Service;

/// Current protocol version. Written in every beacon.
pub const PROTOCOL_VERSION: u8 = 4;

/// Flag bit: the message carries an EID.
pub const FLAG_EID: u8 = 0b0000_0001;
/// Flag bit: the message carries at least one service.
pub const FLAG_SERVICES: u8 = 0b0000_0010;
/// Flag bit: the message carries a beacon period.
pub const FLAG_PERIOD: u8 = 0b0000_1000;

/// IPv4 multicast group for beacons.
pub const MULTICAST_GROUP_V4: &str = "224.0.0.26";
/// IPv6 multicast group for beacons (all nodes, link-local).
pub const MULTICAST_GROUP_V6: &str = "ff02::1";
/// UDP port beacons are sent to and received on.
pub const DISCOVERY_PORT: u16 = 3003;
/// Multicast TTL / hop limit: beacons never leave the link.
pub const MULTICAST_TTL: u32 = 1;

/// One beacon. Optional fields are present on the wire only when set.
#[derive(Debug, Clone, PartialEq)]
pub struct IpndMessage {
    pub version: u8,
    /// Per-sender counter; wraps modulo 65536.
    pub sequence_number: u16,
    /// Sender's endpoint identifier (ASCII).
    pub eid: Option<String>,
    /// Wire order is list order. Empty means the services field is absent.
    pub services: Vec<Service>,
    /// Beacon interval in seconds.
    pub period: Option<u64>,
}

impl IpndMessage {
    /// Flags byte derived from which optional fields are present.
    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.eid.is_some() {
            flags |= FLAG_EID;
        }
        if !self.services.is_empty() {
            flags |= FLAG_SERVICES;
        }
        if self.period.is_some() {
            flags |= FLAG_PERIOD;
        }
        flags
    }

    /// Convergence-layer address services, in wire order.
    pub fn cla_services(&self) -> impl Iterator<Item = &Service> {
        self.services
            .iter()
            .filter(|s| matches!(s, Service::ConvergenceLayer { .. }))
    }
}

impl Default for IpndMessage {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence_number: 0,
            eid: None,
            services: Vec::new(),
            period: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Primitive;

    #[test]
    fn flags_follow_optional_fields() {
        let mut m = IpndMessage::default();
        assert_eq!(m.flags(), 0);
        m.eid = Some("dtn://a.dtn".into());
        assert_eq!(m.flags(), FLAG_EID);
        m.period = Some(3);
        assert_eq!(m.flags(), FLAG_EID | FLAG_PERIOD);
        m.services.push(Primitive::Bool(true).into());
        assert_eq!(m.flags(), 0b0000_1011);
    }

    #[test]
    fn cla_services_skip_other_kinds() {
        let m = IpndMessage {
            services: vec![
                Primitive::Uint(1).into(),
                Service::tcpcl("10.0.0.1".parse().unwrap(), 4556),
                Service::Unknown {
                    tag: 65,
                    payload: vec![],
                },
                Service::tcpcl("::1".parse().unwrap(), 4556),
            ],
            ..Default::default()
        };
        let tags: Vec<u8> = m.cla_services().map(Service::tag).collect();
        assert_eq!(tags, vec![64, 66]);
    }
}
