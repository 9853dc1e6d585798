//! IPND services: primitive scalars, constructed convergence-layer addresses, and opaque unknown tags.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use crate::registry::ServiceRegistry;
use crate::sdnv::{self, AmbiguousArray, SdnvError};

/// Tag of a TCP convergence-layer service carrying an IPv4 address.
pub const TAG_CLA_TCP_V4: u8 = 64;
/// Tag of a TCP convergence-layer service carrying an IPv6 address.
pub const TAG_CLA_TCP_V6: u8 = 66;

/// Scheme prefix of the CLA address string handed to the router.
pub const CLA_SCHEME: &str = "tcpclv3";

/// Primitive service type. The discriminant is the wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PrimitiveType {
    Bool = 0,
    Uint = 1,
    Sint = 2,
    Fixed16 = 3,
    Fixed32 = 4,
    Fixed64 = 5,
    Float = 6,
    Double = 7,
    String = 8,
    Bytes = 9,
}

impl PrimitiveType {
    pub const ALL: [PrimitiveType; 10] = [
        PrimitiveType::Bool,
        PrimitiveType::Uint,
        PrimitiveType::Sint,
        PrimitiveType::Fixed16,
        PrimitiveType::Fixed32,
        PrimitiveType::Fixed64,
        PrimitiveType::Float,
        PrimitiveType::Double,
        PrimitiveType::String,
        PrimitiveType::Bytes,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Bool => "bool",
            PrimitiveType::Uint => "uint64",
            PrimitiveType::Sint => "sint64",
            PrimitiveType::Fixed16 => "fixed16",
            PrimitiveType::Fixed32 => "fixed32",
            PrimitiveType::Fixed64 => "fixed64",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
            PrimitiveType::String => "string",
            PrimitiveType::Bytes => "bytes",
        }
    }
}

impl TryFrom<u8> for PrimitiveType {
    type Error = UnknownPrimitiveType;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        PrimitiveType::ALL
            .into_iter()
            .find(|t| t.tag() == tag)
            .ok_or_else(|| UnknownPrimitiveType(format!("tag {tag}")))
    }
}

impl FromStr for PrimitiveType {
    type Err = UnknownPrimitiveType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PrimitiveType::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| UnknownPrimitiveType(s.to_string()))
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Requested primitive type does not exist. Raised when building values, never while decoding the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown primitive service type {0}")]
pub struct UnknownPrimitiveType(pub String);

/// A primitive service value; the variant fixes the type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Bool(bool),
    Uint(u64),
    /// Zigzag-mapped before SDNV encoding.
    Sint(i64),
    Fixed16(u16),
    Fixed32(u32),
    Fixed64(u64),
    Float(f32),
    Double(f64),
    /// ASCII only.
    String(String),
    Bytes(Vec<u8>),
}

impl Primitive {
    pub fn primitive_type(&self) -> PrimitiveType {
        match self {
            Primitive::Bool(_) => PrimitiveType::Bool,
            Primitive::Uint(_) => PrimitiveType::Uint,
            Primitive::Sint(_) => PrimitiveType::Sint,
            Primitive::Fixed16(_) => PrimitiveType::Fixed16,
            Primitive::Fixed32(_) => PrimitiveType::Fixed32,
            Primitive::Fixed64(_) => PrimitiveType::Fixed64,
            Primitive::Float(_) => PrimitiveType::Float,
            Primitive::Double(_) => PrimitiveType::Double,
            Primitive::String(_) => PrimitiveType::String,
            Primitive::Bytes(_) => PrimitiveType::Bytes,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), ServiceEncodeError> {
        out.push(self.primitive_type().tag());
        match self {
            Primitive::Bool(v) => out.push(u8::from(*v)),
            Primitive::Uint(v) => {
                sdnv::encode_into(out, *v);
            }
            Primitive::Sint(v) => {
                sdnv::encode_into(out, sdnv::zigzag_encode(*v));
            }
            Primitive::Fixed16(v) => out.extend_from_slice(&v.to_be_bytes()),
            Primitive::Fixed32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Primitive::Fixed64(v) => out.extend_from_slice(&v.to_be_bytes()),
            Primitive::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
            Primitive::Double(v) => out.extend_from_slice(&v.to_be_bytes()),
            Primitive::String(s) => {
                if !s.is_ascii() {
                    return Err(ServiceEncodeError::NonAscii);
                }
                sdnv::encode_array(out, s.as_bytes())?;
            }
            Primitive::Bytes(b) => sdnv::encode_array(out, b)?,
        }
        Ok(())
    }
}

/// One advertised service.
#[derive(Debug, Clone, PartialEq)]
pub enum Service {
    Primitive(Primitive),
    /// TCP convergence-layer address; the tag follows the address family.
    ConvergenceLayer { address: IpAddr, port: u16 },
    /// Tag not known to the decoding registry. Payload is the raw content, re-encoded as is.
    Unknown { tag: u8, payload: Vec<u8> },
}

impl Service {
    pub fn tcpcl(address: IpAddr, port: u16) -> Self {
        Service::ConvergenceLayer { address, port }
    }

    pub fn tag(&self) -> u8 {
        match self {
            Service::Primitive(p) => p.primitive_type().tag(),
            Service::ConvergenceLayer {
                address: IpAddr::V4(_),
                ..
            } => TAG_CLA_TCP_V4,
            Service::ConvergenceLayer {
                address: IpAddr::V6(_),
                ..
            } => TAG_CLA_TCP_V6,
            Service::Unknown { tag, .. } => *tag,
        }
    }

    /// Router-facing CLA address (`tcpclv3:192.168.0.1:4556`, `tcpclv3:[fe80::1]:4556`).
    /// `None` for services that are not convergence-layer addresses.
    pub fn cla_address(&self) -> Option<String> {
        match self {
            Service::ConvergenceLayer { address, port } => {
                Some(format!("{CLA_SCHEME}:{}", SocketAddr::new(*address, *port)))
            }
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ServiceEncodeError> {
        let mut out = Vec::new();
        self.encode_into(&mut out)?;
        Ok(out)
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), ServiceEncodeError> {
        match self {
            Service::Primitive(p) => p.encode_into(out),
            Service::ConvergenceLayer { address, port } => {
                let mut content = Vec::new();
                for p in cla_fields(*address, *port) {
                    p.encode_into(&mut content)?;
                }
                write_envelope(out, self.tag(), &content);
                Ok(())
            }
            Service::Unknown { tag, payload } => {
                write_envelope(out, *tag, payload);
                Ok(())
            }
        }
    }
}

impl From<Primitive> for Service {
    fn from(p: Primitive) -> Self {
        Service::Primitive(p)
    }
}

/// Nested primitives of a CL address service: packed address, then port.
pub fn cla_fields(address: IpAddr, port: u16) -> [Primitive; 2] {
    let address = match address {
        IpAddr::V4(a) => Primitive::Fixed32(u32::from(a)),
        IpAddr::V6(a) => Primitive::Bytes(a.octets().to_vec()),
    };
    [address, Primitive::Fixed16(port)]
}

fn write_envelope(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    sdnv::encode_into(out, content.len() as u64);
    out.extend_from_slice(content);
}

/// Decode one service from the front of `bytes`. Returns the service and the number of bytes consumed.
pub fn decode_service(
    bytes: &[u8],
    registry: &ServiceRegistry,
) -> Result<(Service, usize), ServiceDecodeError> {
    let tag = *bytes.first().ok_or(ServiceDecodeError::Truncated)?;
    match registry.decoder(tag) {
        Some(decode) => decode(bytes, registry),
        None => decode_unknown(bytes, registry),
    }
}

/// Decode exactly `count` services back to back.
pub fn decode_services(
    count: u64,
    bytes: &[u8],
    registry: &ServiceRegistry,
) -> Result<(Vec<Service>, usize), ServiceDecodeError> {
    // Every service takes at least one byte; do not trust `count` for the allocation.
    let mut services = Vec::with_capacity((count as usize).min(bytes.len()));
    let mut offset = 0;
    for _ in 0..count {
        let (service, n) = decode_service(&bytes[offset..], registry)?;
        services.push(service);
        offset += n;
    }
    Ok((services, offset))
}

/// Decoder for tags 0-9.
pub fn decode_primitive(
    bytes: &[u8],
    _registry: &ServiceRegistry,
) -> Result<(Service, usize), ServiceDecodeError> {
    let (p, n) = read_primitive(bytes)?;
    Ok((Service::Primitive(p), n))
}

/// Decoder for the TCP CL address tags. The address family comes from the tag alone.
pub fn decode_cla(
    bytes: &[u8],
    _registry: &ServiceRegistry,
) -> Result<(Service, usize), ServiceDecodeError> {
    let (tag, content, consumed) = read_envelope(bytes)?;
    let malformed = |reason| ServiceDecodeError::Malformed { tag, reason };

    let (address, n) = read_primitive(content)?;
    let (port, _) = read_primitive(&content[n..])?;
    let address = match (tag, address) {
        (TAG_CLA_TCP_V4, Primitive::Fixed32(a)) => IpAddr::V4(Ipv4Addr::from(a)),
        (TAG_CLA_TCP_V6, Primitive::Bytes(b)) => {
            let octets: [u8; 16] = b
                .try_into()
                .map_err(|_| malformed("IPv6 address must be 16 bytes"))?;
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        (TAG_CLA_TCP_V4 | TAG_CLA_TCP_V6, _) => {
            return Err(malformed("address does not match the tag's address family"))
        }
        _ => return Err(malformed("not a convergence-layer address tag")),
    };
    let Primitive::Fixed16(port) = port else {
        return Err(malformed("port must be fixed16"));
    };
    Ok((Service::ConvergenceLayer { address, port }, consumed))
}

/// Fallback for tags missing from the registry: capture the enveloped content untouched.
pub fn decode_unknown(
    bytes: &[u8],
    _registry: &ServiceRegistry,
) -> Result<(Service, usize), ServiceDecodeError> {
    let (tag, content, consumed) = read_envelope(bytes)?;
    Ok((
        Service::Unknown {
            tag,
            payload: content.to_vec(),
        },
        consumed,
    ))
}

/// `tag || SDNV(len) || content`. Returns tag, content and total length.
fn read_envelope(bytes: &[u8]) -> Result<(u8, &[u8], usize), ServiceDecodeError> {
    let tag = *bytes.first().ok_or(ServiceDecodeError::Truncated)?;
    let (len, n) = sdnv::decode(bytes, 1)?;
    let start = 1 + n;
    let end = usize::try_from(len)
        .ok()
        .and_then(|len| start.checked_add(len))
        .ok_or(ServiceDecodeError::Truncated)?;
    let content = bytes.get(start..end).ok_or(ServiceDecodeError::Truncated)?;
    Ok((tag, content, end))
}

fn read_primitive(bytes: &[u8]) -> Result<(Primitive, usize), ServiceDecodeError> {
    let tag = *bytes.first().ok_or(ServiceDecodeError::Truncated)?;
    let ty = PrimitiveType::try_from(tag).map_err(|_| ServiceDecodeError::Malformed {
        tag,
        reason: "not a primitive type",
    })?;
    let body = &bytes[1..];
    let (value, n) = match ty {
        PrimitiveType::Bool => {
            let b = match body.first() {
                Some(0) => false,
                Some(1) => true,
                Some(_) => {
                    return Err(ServiceDecodeError::Malformed {
                        tag,
                        reason: "bool must be 0 or 1",
                    })
                }
                None => return Err(ServiceDecodeError::Truncated),
            };
            (Primitive::Bool(b), 1)
        }
        PrimitiveType::Uint => {
            let (v, n) = sdnv::decode(body, 0)?;
            (Primitive::Uint(v), n)
        }
        PrimitiveType::Sint => {
            let (v, n) = sdnv::decode(body, 0)?;
            (Primitive::Sint(sdnv::zigzag_decode(v)), n)
        }
        PrimitiveType::Fixed16 => (Primitive::Fixed16(u16::from_be_bytes(fixed(body)?)), 2),
        PrimitiveType::Fixed32 => (Primitive::Fixed32(u32::from_be_bytes(fixed(body)?)), 4),
        PrimitiveType::Fixed64 => (Primitive::Fixed64(u64::from_be_bytes(fixed(body)?)), 8),
        PrimitiveType::Float => (Primitive::Float(f32::from_be_bytes(fixed(body)?)), 4),
        PrimitiveType::Double => (Primitive::Double(f64::from_be_bytes(fixed(body)?)), 8),
        PrimitiveType::String => {
            let (data, n) = sdnv::decode_array(body, 0)?;
            if !data.is_ascii() {
                return Err(ServiceDecodeError::InvalidAscii { tag });
            }
            let s = String::from_utf8(data.to_vec())
                .map_err(|_| ServiceDecodeError::InvalidAscii { tag })?;
            (Primitive::String(s), n)
        }
        PrimitiveType::Bytes => {
            let (data, n) = sdnv::decode_array(body, 0)?;
            (Primitive::Bytes(data.to_vec()), n)
        }
    };
    Ok((value, 1 + n))
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], ServiceDecodeError> {
    bytes
        .get(..N)
        .and_then(|b| b.try_into().ok())
        .ok_or(ServiceDecodeError::Truncated)
}

/// Error encoding a service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceEncodeError {
    #[error("string service is not ASCII")]
    NonAscii,
    #[error("a single zero byte cannot be sent as a string or bytes service")]
    AmbiguousEmptyArray,
}

impl From<AmbiguousArray> for ServiceEncodeError {
    fn from(_: AmbiguousArray) -> Self {
        ServiceEncodeError::AmbiguousEmptyArray
    }
}

/// Error decoding a service (malformed service).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceDecodeError {
    #[error("truncated service")]
    Truncated,
    #[error("service length does not fit in 64 bits")]
    Overflow,
    #[error("malformed service (tag {tag}): {reason}")]
    Malformed { tag: u8, reason: &'static str },
    #[error("string service (tag {tag}) is not ASCII")]
    InvalidAscii { tag: u8 },
}

impl From<SdnvError> for ServiceDecodeError {
    fn from(e: SdnvError) -> Self {
        match e {
            SdnvError::Truncated => ServiceDecodeError::Truncated,
            SdnvError::Overflow => ServiceDecodeError::Overflow,
        }
    }
}
