//! IPND (IP Neighbor Discovery) reference implementation.
//! Host-driven: no I/O; host passes datagrams and clock readings and receives beacons and actions.

pub mod protocol;
pub mod registry;
pub mod sdnv;
pub mod service;
pub mod wire;

pub use protocol::{IpndMessage, PROTOCOL_VERSION};
pub use registry::{ServiceDecoder, ServiceRegistry};
pub use service::{Primitive, PrimitiveType, Service, ServiceDecodeError, ServiceEncodeError};
pub use wire::{
    decode_message, decode_message_with, encode_message, MessageDecodeError, MessageEncodeError,
};
pub use crate::core::{Action, Advertiser, ContactUpdate, ContactWindow, DiscardReason, Listener};
pub use crate::scheduler::BeaconSchedule;

pub mod core;
pub mod scheduler;
