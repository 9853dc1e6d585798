//! Message codec: `version || flags || seq (u16 BE) || [eid] || [services] || [period]`.
//! Optional fields appear in that fixed order, each only when its flag bit is set.

use crate::protocol::{IpndMessage, FLAG_EID, FLAG_PERIOD, FLAG_SERVICES};
use crate::registry::ServiceRegistry;
use crate::sdnv::{self, SdnvError};
use crate::service::{self, ServiceDecodeError, ServiceEncodeError};

const HEADER_LEN: usize = 4;

/// Encode a message into a single datagram payload.
pub fn encode_message(msg: &IpndMessage) -> Result<Vec<u8>, MessageEncodeError> {
    let mut out = Vec::with_capacity(64);
    out.push(msg.version);
    out.push(msg.flags());
    out.extend_from_slice(&msg.sequence_number.to_be_bytes());
    if let Some(eid) = &msg.eid {
        if !eid.is_ascii() {
            return Err(MessageEncodeError::NonAsciiEid);
        }
        sdnv::encode_into(&mut out, eid.len() as u64);
        out.extend_from_slice(eid.as_bytes());
    }
    if !msg.services.is_empty() {
        sdnv::encode_into(&mut out, msg.services.len() as u64);
        for s in &msg.services {
            s.encode_into(&mut out)?;
        }
    }
    if let Some(period) = msg.period {
        sdnv::encode_into(&mut out, period);
    }
    Ok(out)
}

/// Error encoding a locally built message: non-ASCII text, or a value the wire cannot represent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageEncodeError {
    #[error("eid is not ASCII")]
    NonAsciiEid,
    #[error("service encode error: {0}")]
    Service(#[from] ServiceEncodeError),
}

/// Decode a message with the default service registry. Trailing bytes are ignored.
pub fn decode_message(bytes: &[u8]) -> Result<IpndMessage, MessageDecodeError> {
    decode_message_with(bytes, &ServiceRegistry::default())
}

/// Decode a message, resolving service tags through `registry`.
pub fn decode_message_with(
    bytes: &[u8],
    registry: &ServiceRegistry,
) -> Result<IpndMessage, MessageDecodeError> {
    decode_message_with_len(bytes, registry).map(|(msg, _)| msg)
}

/// Decode a message from the front of `bytes`. Returns the message and the number of bytes consumed.
pub fn decode_message_with_len(
    bytes: &[u8],
    registry: &ServiceRegistry,
) -> Result<(IpndMessage, usize), MessageDecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(MessageDecodeError::Truncated { field: "header" });
    }
    let version = bytes[0];
    let flags = bytes[1];
    let sequence_number = u16::from_be_bytes([bytes[2], bytes[3]]);
    let mut offset = HEADER_LEN;

    let mut eid = None;
    if flags & FLAG_EID != 0 {
        let (len, n) = read_sdnv(bytes, offset, "eid length")?;
        offset += n;
        let raw = usize::try_from(len)
            .ok()
            .and_then(|len| bytes.get(offset..offset.checked_add(len)?))
            .ok_or(MessageDecodeError::Truncated { field: "eid" })?;
        if !raw.is_ascii() {
            return Err(MessageDecodeError::InvalidEid);
        }
        eid = Some(String::from_utf8(raw.to_vec()).map_err(|_| MessageDecodeError::InvalidEid)?);
        offset += raw.len();
    }

    let mut services = Vec::new();
    if flags & FLAG_SERVICES != 0 {
        let (count, n) = read_sdnv(bytes, offset, "service count")?;
        offset += n;
        let (decoded, n) = service::decode_services(count, &bytes[offset..], registry)?;
        services = decoded;
        offset += n;
    }

    let mut period = None;
    if flags & FLAG_PERIOD != 0 {
        let (p, n) = read_sdnv(bytes, offset, "period")?;
        period = Some(p);
        offset += n;
    }

    Ok((
        IpndMessage {
            version,
            sequence_number,
            eid,
            services,
            period,
        },
        offset,
    ))
}

fn read_sdnv(
    bytes: &[u8],
    offset: usize,
    field: &'static str,
) -> Result<(u64, usize), MessageDecodeError> {
    sdnv::decode(bytes, offset).map_err(|source| MessageDecodeError::Sdnv { field, source })
}

/// Malformed message: a field ran past the end of the datagram or failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageDecodeError {
    #[error("malformed message: truncated {field}")]
    Truncated { field: &'static str },
    #[error("malformed message: {field}: {source}")]
    Sdnv {
        field: &'static str,
        source: SdnvError,
    },
    #[error("malformed message: eid is not ASCII")]
    InvalidEid,
    #[error("malformed message: {0}")]
    Service(#[from] ServiceDecodeError),
}
