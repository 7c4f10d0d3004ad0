pub mod discovery;
pub mod framing;

pub use discovery::DiscoveryService;
pub use framing::{recv_frame, send_frame, MAX_FRAME_BYTES};

use std::net::{IpAddr, Ipv4Addr};
use tokio::net::UdpSocket;

/// Best-effort LAN address of this machine, found by the route a connected
/// UDP socket would take. No packet is actually sent. Falls back to the
/// loopback address in environments without outbound routing.
pub async fn local_ip() -> IpAddr {
    if let Ok(socket) = UdpSocket::bind("0.0.0.0:0").await {
        if socket.connect(("8.8.8.8", 80)).await.is_ok() {
            if let Ok(addr) = socket.local_addr() {
                return addr.ip();
            }
        }
    }
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}
