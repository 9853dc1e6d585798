//! Service registry: immutable tag → decoder table consulted while decoding services.

use std::collections::HashMap;

use crate::service::{
    self, PrimitiveType, Service, ServiceDecodeError, TAG_CLA_TCP_V4, TAG_CLA_TCP_V6,
};

/// Decodes one service from a slice starting at its tag byte.
/// Returns the service and the number of bytes consumed.
pub type ServiceDecoder =
    fn(&[u8], &ServiceRegistry) -> Result<(Service, usize), ServiceDecodeError>;

/// Tags missing from the registry decode as [`Service::Unknown`].
#[derive(Clone)]
pub struct ServiceRegistry {
    decoders: HashMap<u8, ServiceDecoder>,
}

impl ServiceRegistry {
    /// Registry with no tags bound; every service decodes as unknown.
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Copy of this registry with `tag` bound to `decoder`, replacing any previous binding.
    pub fn with_decoder(mut self, tag: u8, decoder: ServiceDecoder) -> Self {
        self.decoders.insert(tag, decoder);
        self
    }

    /// Copy of this registry with `tag` unbound.
    pub fn without(mut self, tag: u8) -> Self {
        self.decoders.remove(&tag);
        self
    }

    pub fn decoder(&self, tag: u8) -> Option<ServiceDecoder> {
        self.decoders.get(&tag).copied()
    }

    pub fn contains(&self, tag: u8) -> bool {
        self.decoders.contains_key(&tag)
    }
}

impl Default for ServiceRegistry {
    /// Primitive tags 0-9 and the TCP CL address tags 64/66.
    fn default() -> Self {
        let registry = PrimitiveType::ALL
            .into_iter()
            .fold(Self::empty(), |r, ty| {
                r.with_decoder(ty.tag(), service::decode_primitive)
            });
        registry
            .with_decoder(TAG_CLA_TCP_V4, service::decode_cla)
            .with_decoder(TAG_CLA_TCP_V6, service::decode_cla)
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<u8> = self.decoders.keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("ServiceRegistry").field("tags", &tags).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{decode_service, Primitive};

    #[test]
    fn default_binds_builtin_tags() {
        let r = ServiceRegistry::default();
        for tag in 0..=9 {
            assert!(r.contains(tag));
        }
        assert!(r.contains(64));
        assert!(r.contains(66));
        assert!(!r.contains(65));
        assert!(!r.contains(10));
    }

    #[test]
    fn unbound_tag_falls_back_to_unknown() {
        let wire = Service::tcpcl("10.1.2.3".parse().unwrap(), 4556)
            .encode()
            .unwrap();
        let r = ServiceRegistry::default().without(64);
        let (s, n) = decode_service(&wire, &r).unwrap();
        assert_eq!(n, wire.len());
        assert_eq!(
            s,
            Service::Unknown {
                tag: 64,
                payload: wire[2..].to_vec()
            }
        );
        assert_eq!(s.encode().unwrap(), wire);
    }

    fn decode_as_uint(
        bytes: &[u8],
        _registry: &ServiceRegistry,
    ) -> Result<(Service, usize), ServiceDecodeError> {
        let (v, n) = crate::sdnv::decode(bytes, 1)?;
        Ok((Service::Primitive(Primitive::Uint(v)), 1 + n))
    }

    #[test]
    fn custom_decoder_is_used() {
        let r = ServiceRegistry::default().with_decoder(100, decode_as_uint);
        let (s, n) = decode_service(&[100, 0x81, 0x00], &r).unwrap();
        assert_eq!(n, 3);
        assert_eq!(s, Service::Primitive(Primitive::Uint(128)));
    }

    #[test]
    fn empty_registry_treats_primitives_as_unknown() {
        // Bool tag followed by what the unknown decoder reads as a length of 1.
        let (s, n) = decode_service(&[0, 1, 7], &ServiceRegistry::empty()).unwrap();
        assert_eq!(n, 3);
        assert_eq!(
            s,
            Service::Unknown {
                tag: 0,
                payload: vec![7]
            }
        );
    }
}
