//! Local interface addresses, turned into the TCP CL services this node advertises.

use std::net::IpAddr;

use ipnd_core::Service;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};

/// Source of `(interface name, address)` pairs.
pub trait InterfaceSource {
    fn addresses(&self) -> std::io::Result<Vec<(String, IpAddr)>>;
}

/// Addresses of the host's network interfaces.
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn addresses(&self) -> std::io::Result<Vec<(String, IpAddr)>> {
        let ifaces = NetworkInterface::show()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        let mut out = Vec::new();
        for iface in ifaces {
            for addr in &iface.addr {
                let ip = match addr {
                    Addr::V4(v4) => IpAddr::V4(v4.ip),
                    Addr::V6(v6) => IpAddr::V6(v6.ip),
                };
                out.push((iface.name.clone(), ip));
            }
        }
        Ok(out)
    }
}

/// One TCP CL service per usable address, in source order. Duplicates are dropped.
pub fn advertised_services(
    source: &dyn InterfaceSource,
    cla_port: u16,
    include_loopback: bool,
) -> std::io::Result<Vec<Service>> {
    let mut services: Vec<Service> = Vec::new();
    for (name, ip) in source.addresses()? {
        if !include_loopback && (name == "lo" || ip.is_loopback()) {
            continue;
        }
        if ip.is_unspecified() || ip.is_multicast() {
            continue;
        }
        let service = Service::tcpcl(ip, cla_port);
        if !services.contains(&service) {
            services.push(service);
        }
    }
    Ok(services)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<(&'static str, &'static str)>);

    impl InterfaceSource for Fixed {
        fn addresses(&self) -> std::io::Result<Vec<(String, IpAddr)>> {
            Ok(self
                .0
                .iter()
                .map(|(n, a)| (n.to_string(), a.parse().unwrap()))
                .collect())
        }
    }

    fn source() -> Fixed {
        Fixed(vec![
            ("lo", "127.0.0.1"),
            ("lo", "::1"),
            ("eth0", "192.168.0.1"),
            ("eth0", "fe80::b453:d21:cf3c:aec2"),
            ("eth1", "192.168.0.1"),
            ("eth1", "0.0.0.0"),
        ])
    }

    #[test]
    fn skips_loopback_and_duplicates() {
        let services = advertised_services(&source(), 4556, false).unwrap();
        assert_eq!(
            services,
            vec![
                Service::tcpcl("192.168.0.1".parse().unwrap(), 4556),
                Service::tcpcl("fe80::b453:d21:cf3c:aec2".parse().unwrap(), 4556),
            ]
        );
    }

    #[test]
    fn loopback_when_requested() {
        let services = advertised_services(&source(), 4556, true).unwrap();
        assert_eq!(services.len(), 4);
        assert_eq!(services[0].cla_address().as_deref(), Some("tcpclv3:127.0.0.1:4556"));
    }
}
