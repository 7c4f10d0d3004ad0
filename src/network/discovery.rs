use log::{info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::core::config::POLL_INTERVAL;
use crate::core::peer::{unix_now, PeerRecord, PeerRegistry};
use crate::core::protocol::DiscoveryMessage;
use crate::utils::Result;

/// Periodic UDP self-announcement plus a listener that feeds the peer
/// registry. Both loops run until the shared shutdown flag is raised.
pub struct DiscoveryService {
    registry: Arc<PeerRegistry>,
    self_peer_id: String,
    display_name: String,
    tcp_port: u16,
    discovery_port: u16,
    announce_interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl DiscoveryService {
    pub fn new(
        registry: Arc<PeerRegistry>,
        self_peer_id: String,
        display_name: String,
        tcp_port: u16,
        discovery_port: u16,
        announce_interval: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registry,
            self_peer_id,
            display_name,
            tcp_port,
            discovery_port,
            announce_interval,
            shutdown,
        }
    }

    /// Bind both sockets and spawn the announce and listen loops. Bind
    /// failures surface here instead of inside the background tasks.
    pub async fn start(&self) -> Result<()> {
        let payload = serde_json::to_vec(&DiscoveryMessage::Announce {
            peer_id: self.self_peer_id.clone(),
            display_name: self.display_name.clone(),
            tcp_port: self.tcp_port,
        })?;

        let announce_socket = UdpSocket::bind("0.0.0.0:0").await?;
        announce_socket.set_broadcast(true)?;
        let target = SocketAddr::from((Ipv4Addr::BROADCAST, self.discovery_port));

        let listen_socket =
            reusable_udp_socket(SocketAddr::from(([0, 0, 0, 0], self.discovery_port)))?;
        info!("discovery listening on udp port {}", self.discovery_port);

        let interval = self.announce_interval;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            announce_loop(announce_socket, payload, target, interval, shutdown).await;
        });

        let registry = self.registry.clone();
        let self_peer_id = self.self_peer_id.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            listen_loop(listen_socket, registry, self_peer_id, shutdown).await;
        });

        Ok(())
    }
}

async fn announce_loop(
    socket: UdpSocket,
    payload: Vec<u8>,
    target: SocketAddr,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        if let Err(e) = socket.send_to(&payload, target).await {
            warn!("announce send failed: {e}");
        }
        tokio::time::sleep(interval).await;
    }
}

async fn listen_loop(
    socket: UdpSocket,
    registry: Arc<PeerRegistry>,
    self_peer_id: String,
    shutdown: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 64 * 1024];

    while !shutdown.load(Ordering::Relaxed) {
        let (len, source) = match timeout(POLL_INTERVAL, socket.recv_from(&mut buf)).await {
            // Poll timeout: loop around to observe shutdown.
            Err(_) => continue,
            Ok(Err(e)) => {
                warn!("discovery receive error: {e}");
                continue;
            }
            Ok(Ok(pair)) => pair,
        };

        let Some(message) = parse_announcement(&buf[..len]) else {
            continue;
        };
        if let Some(peer) = register_announcement(&registry, &self_peer_id, message, source.ip()).await
        {
            info!(
                "discovered peer {} ({}) at {}:{}",
                peer.display_name, peer.peer_id, peer.addr, peer.tcp_port
            );
        }
    }
}

/// Malformed datagrams and non-ANNOUNCE kinds both fail deserialization and
/// are silently dropped.
fn parse_announcement(payload: &[u8]) -> Option<DiscoveryMessage> {
    serde_json::from_slice(payload).ok()
}

/// Apply one announcement to the registry. Returns the record only when the
/// peer was previously unseen; self-announcements looped back by the network
/// stack are ignored.
async fn register_announcement(
    registry: &PeerRegistry,
    self_peer_id: &str,
    message: DiscoveryMessage,
    source: IpAddr,
) -> Option<PeerRecord> {
    let DiscoveryMessage::Announce {
        peer_id,
        display_name,
        tcp_port,
    } = message;

    if peer_id.is_empty() || peer_id == self_peer_id {
        return None;
    }

    let record = PeerRecord {
        peer_id,
        display_name,
        addr: source,
        tcp_port,
        last_seen: unix_now(),
    };
    registry.upsert(record.clone()).await.then_some(record)
}

/// UDP socket with SO_REUSEADDR (and SO_REUSEPORT where available) so that a
/// restarted node can rebind the discovery port immediately.
fn reusable_udp_socket(addr: SocketAddr) -> Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    if let Err(e) = socket.set_reuse_port(true) {
        warn!("SO_REUSEPORT unavailable: {e}");
    }

    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> IpAddr {
        IpAddr::from([192, 168, 0, 42])
    }

    #[test]
    fn parse_accepts_announce_only() {
        let good = br#"{"kind":"ANNOUNCE","peer_id":"abc","display_name":"pc","tcp_port":6001}"#;
        assert!(parse_announcement(good).is_some());

        let wrong_kind = br#"{"kind":"CHAT","peer_id":"abc"}"#;
        assert!(parse_announcement(wrong_kind).is_none());

        assert!(parse_announcement(b"garbage").is_none());
        assert!(parse_announcement(b"").is_none());
    }

    #[tokio::test]
    async fn self_announcements_are_ignored() {
        let registry = PeerRegistry::new();
        let message = DiscoveryMessage::Announce {
            peer_id: "me1234".into(),
            display_name: "self".into(),
            tcp_port: 6001,
        };

        let seen = register_announcement(&registry, "me1234", message, source()).await;
        assert!(seen.is_none());
        assert_eq!(registry.peer_count().await, 0);
    }

    #[tokio::test]
    async fn first_announcement_is_new_then_refreshes() {
        let registry = PeerRegistry::new();
        let announce = |port: u16| DiscoveryMessage::Announce {
            peer_id: "peer01".into(),
            display_name: "friend".into(),
            tcp_port: port,
        };

        let first = register_announcement(&registry, "me", announce(6001), source()).await;
        assert!(first.is_some());

        // Same id announcing from a new port: refreshed, not re-reported.
        let second = register_announcement(&registry, "me", announce(7001), source()).await;
        assert!(second.is_none());
        let stored = registry.get("peer01").await.expect("present");
        assert_eq!(stored.tcp_port, 7001);
    }

    #[tokio::test]
    async fn empty_peer_id_is_rejected() {
        let registry = PeerRegistry::new();
        let message = DiscoveryMessage::Announce {
            peer_id: String::new(),
            display_name: "ghost".into(),
            tcp_port: 6001,
        };
        assert!(register_announcement(&registry, "me", message, source())
            .await
            .is_none());
    }
}
