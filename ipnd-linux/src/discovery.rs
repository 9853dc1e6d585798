//! LAN discovery: periodic IPND beacons over UDP multicast, and a listener per address family
//! that turns neighbor beacons into contact updates for the router.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ipnd_core::protocol::MULTICAST_TTL;
use ipnd_core::{Action, Advertiser, BeaconSchedule, DiscardReason, Listener, Service};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::router::{RouterLink, SharedRouter};

const RECV_BUF_LEN: usize = 65536;
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Run discovery until a task fails: one advertising task, one listening task per enabled family.
pub async fn run_discovery<R: RouterLink + 'static>(
    cfg: Config,
    own_eid: String,
    services: Vec<Service>,
    router: SharedRouter<R>,
) -> io::Result<()> {
    let mut groups = Vec::new();
    if cfg.ipv4 {
        groups.push(SocketAddr::new(IpAddr::V4(cfg.group_v4), cfg.port));
    }
    if cfg.ipv6 {
        groups.push(SocketAddr::new(IpAddr::V6(cfg.group_v6), cfg.port));
    }
    let (targets, receivers) = bind_families(&groups, open_family)?;

    let advertiser = Advertiser::new(own_eid.clone(), cfg.period, services);
    let listener = Arc::new(
        Listener::new(own_eid, cfg.period).with_capacity(cfg.contact_capacity),
    );

    let mut tasks = JoinSet::new();
    tasks.spawn(beacon_loop(
        targets,
        advertiser,
        Duration::from_secs(cfg.period),
    ));
    for socket in receivers {
        tasks.spawn(recv_loop(Arc::new(socket), listener.clone(), router.clone()));
    }

    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(e) => return Err(io::Error::new(io::ErrorKind::Other, e)),
        }
    }
    Ok(())
}

type Targets = Vec<(Arc<UdpSocket>, SocketAddr)>;

/// Open each group's family with `open`. A family that fails is skipped; an error is
/// returned only when no family could be bound.
fn bind_families<F>(groups: &[SocketAddr], open: F) -> io::Result<(Targets, Vec<UdpSocket>)>
where
    F: Fn(SocketAddr) -> io::Result<(UdpSocket, UdpSocket)>,
{
    let mut targets = Vec::new();
    let mut receivers = Vec::new();
    let mut last_err = None;
    for &group in groups {
        match open(group) {
            Ok((send, recv)) => {
                info!("beaconing on {}", group);
                targets.push((Arc::new(send), group));
                receivers.push(recv);
            }
            Err(e) => {
                warn!("skipping {}: {}", group, e);
                last_err = Some(e);
            }
        }
    }
    if targets.is_empty() {
        return Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "both IPv4 and IPv6 are disabled",
            )
        }));
    }
    Ok((targets, receivers))
}

/// Sending and receiving socket for the family of `group`.
fn open_family(group: SocketAddr) -> io::Result<(UdpSocket, UdpSocket)> {
    match group.ip() {
        IpAddr::V4(g) => Ok((
            make_send_socket(Domain::IPV4)?,
            make_recv_socket_v4(g, group.port())?,
        )),
        IpAddr::V6(g) => Ok((
            make_send_socket(Domain::IPV6)?,
            make_recv_socket_v6(g, group.port())?,
        )),
    }
}

fn make_send_socket(domain: Domain) -> io::Result<UdpSocket> {
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    let bind: SocketAddr = if domain == Domain::IPV6 {
        socket.set_multicast_hops_v6(MULTICAST_TTL)?;
        socket.set_multicast_loop_v6(false)?;
        (Ipv6Addr::UNSPECIFIED, 0).into()
    } else {
        socket.set_multicast_ttl_v4(MULTICAST_TTL)?;
        (Ipv4Addr::UNSPECIFIED, 0).into()
    };
    socket.bind(&SockAddr::from(bind))?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

fn make_recv_socket_v4(group: Ipv4Addr, port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SockAddr::from(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))))?;
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

fn make_recv_socket_v6(group: Ipv6Addr, port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_only_v6(true)?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SockAddr::from(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port))))?;
    socket.join_multicast_v6(&group, 0)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// Send the current beacon to every target when due, then sleep until the next deadline.
/// Send failures are retried on the next tick; an encode failure ends the task.
async fn beacon_loop(
    targets: Vec<(Arc<UdpSocket>, SocketAddr)>,
    mut advertiser: Advertiser,
    period: Duration,
) -> io::Result<()> {
    let mut schedule = BeaconSchedule::new(period, Instant::now());
    loop {
        let now = Instant::now();
        if !schedule.is_due(now) {
            tokio::time::sleep_until(schedule.deadline().into()).await;
            continue;
        }
        let seq = advertiser.sequence_number();
        let frame = advertiser
            .next_beacon()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        for (socket, dest) in &targets {
            if let Err(e) = socket.send_to(&frame, dest).await {
                warn!("beacon {} to {} failed: {}", seq, dest, e);
            }
        }
        trace!("beacon {} sent ({} bytes)", seq, frame.len());
        schedule.mark_sent(now);
    }
}

/// Where the listening task reads datagrams from.
#[async_trait]
pub(crate) trait DatagramSource: Send + Sync {
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

#[async_trait]
impl DatagramSource for UdpSocket {
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.recv_from(buf).await
    }
}

/// Feed every datagram to the listener until shutdown. Receive errors are logged and retried.
async fn recv_loop<S: DatagramSource + ?Sized, R: RouterLink>(
    socket: Arc<S>,
    listener: Arc<Listener>,
    router: SharedRouter<R>,
) -> io::Result<()> {
    let mut buf = vec![0u8; RECV_BUF_LEN];
    loop {
        let (n, from) = match socket.recv_datagram(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("receive failed: {}", e);
                tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                continue;
            }
        };
        handle_datagram(&listener, &router, &buf[..n], from).await;
    }
}

/// Run one datagram through the listener. Returns true when a contact update was accepted by the router.
pub(crate) async fn handle_datagram<R: RouterLink>(
    listener: &Listener,
    router: &SharedRouter<R>,
    data: &[u8],
    from: SocketAddr,
) -> bool {
    let update = match listener.on_datagram(data) {
        Action::ContactUpdate(update) => update,
        Action::Discard(DiscardReason::OwnBeacon) => return false,
        Action::Discard(reason @ DiscardReason::Malformed(_)) => {
            warn!("invalid ipnd packet from {}: {}", from, reason);
            return false;
        }
        Action::Discard(reason) => {
            debug!("skipping beacon from {}: {}", from, reason);
            return false;
        }
    };
    debug!(
        "beacon from {} ({}) via {}",
        update.neighbor_eid, update.cla_address, from
    );
    let mut link = router.lock().await;
    match link.submit_contact_update(&update).await {
        Ok(()) => true,
        Err(e) => {
            warn!("contact update for {} failed: {:#}", update.neighbor_eid, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use ipnd_core::{encode_message, ContactUpdate, IpndMessage};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        updates: Vec<ContactUpdate>,
        fail: bool,
    }

    #[async_trait]
    impl RouterLink for Recording {
        async fn register(&mut self, _identity_suffix: &str) -> anyhow::Result<String> {
            Ok("dtn://self.dtn".into())
        }

        async fn submit_contact_update(&mut self, update: &ContactUpdate) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("router unavailable");
            }
            self.updates.push(update.clone());
            Ok(())
        }
    }

    fn from() -> SocketAddr {
        "192.168.0.1:3003".parse().unwrap()
    }

    fn beacon(eid: &str) -> Vec<u8> {
        encode_message(&IpndMessage {
            eid: Some(eid.into()),
            services: vec![Service::tcpcl("192.168.0.1".parse().unwrap(), 4556)],
            period: Some(3),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn neighbor_beacon_reaches_router() {
        let listener = Listener::new("dtn://self.dtn", 3);
        let router = Arc::new(Mutex::new(Recording::default()));
        assert!(handle_datagram(&listener, &router, &beacon("dtn://peer.dtn"), from()).await);
        let r = router.lock().await;
        assert_eq!(r.updates.len(), 1);
        assert_eq!(r.updates[0].neighbor_eid, "dtn://peer.dtn");
        assert_eq!(r.updates[0].cla_address, "tcpclv3:192.168.0.1:4556");
        assert_eq!(r.updates[0].contacts[0].end, Duration::from_millis(4500));
    }

    #[tokio::test]
    async fn own_and_malformed_beacons_never_reach_router() {
        let listener = Listener::new("dtn://self.dtn", 3);
        let router = Arc::new(Mutex::new(Recording::default()));
        assert!(!handle_datagram(&listener, &router, &beacon("dtn://self.dtn"), from()).await);
        assert!(!handle_datagram(&listener, &router, &[4, 1, 0], from()).await);
        // The listener keeps working after garbage.
        assert!(handle_datagram(&listener, &router, &beacon("dtn://peer.dtn"), from()).await);
        assert_eq!(router.lock().await.updates.len(), 1);
    }

    #[tokio::test]
    async fn router_failure_is_not_fatal() {
        let listener = Listener::new("dtn://self.dtn", 3);
        let router = Arc::new(Mutex::new(Recording {
            fail: true,
            ..Default::default()
        }));
        assert!(!handle_datagram(&listener, &router, &beacon("dtn://peer.dtn"), from()).await);
        router.lock().await.fail = false;
        assert!(handle_datagram(&listener, &router, &beacon("dtn://peer.dtn"), from()).await);
    }

    #[tokio::test]
    async fn beacons_arrive_over_loopback() {
        let recv = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = recv.local_addr().unwrap();
        let send = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let advertiser = Advertiser::new("dtn://peer.dtn", 1, vec![]);
        let task = tokio::spawn(beacon_loop(
            vec![(send, dest)],
            advertiser,
            Duration::from_millis(20),
        ));

        let mut buf = [0u8; 512];
        let mut seqs = Vec::new();
        for _ in 0..2 {
            let (n, _) = recv.recv_from(&mut buf).await.unwrap();
            seqs.push(ipnd_core::decode_message(&buf[..n]).unwrap().sequence_number);
        }
        task.abort();
        assert_eq!(seqs, vec![0, 1]);
    }

    /// Yields queued results, then waits forever.
    struct Scripted(std::sync::Mutex<VecDeque<io::Result<Vec<u8>>>>);

    #[async_trait]
    impl DatagramSource for Scripted {
        async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            let next = self.0.lock().unwrap().pop_front();
            match next {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok((data.len(), from()))
                }
                Some(Err(e)) => Err(e),
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test]
    async fn receive_error_does_not_stop_listening() {
        let source = Arc::new(Scripted(std::sync::Mutex::new(VecDeque::from([
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "icmp unreachable")),
            Ok(beacon("dtn://peer.dtn")),
        ]))));
        let listener = Arc::new(Listener::new("dtn://self.dtn", 3));
        let router = Arc::new(Mutex::new(Recording::default()));
        let task = tokio::spawn(recv_loop(source, listener, router.clone()));

        let delivered = tokio::time::timeout(Duration::from_secs(5), async {
            while router.lock().await.updates.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(!task.is_finished());
        task.abort();
        assert!(delivered.is_ok(), "datagram after the error was not handled");
        assert_eq!(router.lock().await.updates[0].neighbor_eid, "dtn://peer.dtn");
    }

    fn loopback_pair() -> io::Result<(UdpSocket, UdpSocket)> {
        let open = || -> io::Result<UdpSocket> {
            let socket = std::net::UdpSocket::bind("127.0.0.1:0")?;
            socket.set_nonblocking(true)?;
            UdpSocket::from_std(socket)
        };
        Ok((open()?, open()?))
    }

    #[tokio::test]
    async fn failed_family_is_skipped() {
        let v4: SocketAddr = "224.0.0.26:3003".parse().unwrap();
        let v6: SocketAddr = "[ff02::1]:3003".parse().unwrap();
        let (targets, receivers) = bind_families(&[v4, v6], |group| {
            if group.is_ipv6() {
                Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "no ipv6"))
            } else {
                loopback_pair()
            }
        })
        .unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].1, v4);
        assert_eq!(receivers.len(), 1);
    }

    #[tokio::test]
    async fn no_family_bound_is_an_error() {
        let v4: SocketAddr = "224.0.0.26:3003".parse().unwrap();
        let err = bind_families(&[v4], |_| -> io::Result<(UdpSocket, UdpSocket)> {
            Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "down"))
        })
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrNotAvailable);

        let err = bind_families(&[], |_| loopback_pair()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
