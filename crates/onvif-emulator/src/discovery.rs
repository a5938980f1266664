use crate::templates;
use crate::types::DeviceModel;
use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const WS_DISCOVERY_PORT: u16 = 3702;
pub const WS_DISCOVERY_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

const MAX_DATAGRAM_SIZE: usize = 65535;

/// Containment match on the two tokens every ONVIF NVT probe carries
pub fn is_probe(payload: &[u8]) -> bool {
    contains(payload, b"Probe") && contains(payload, b"NetworkVideoTransmitter")
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// ProbeMatches message announcing `device`
pub fn probe_matches(device: &DeviceModel, message_id: Uuid) -> String {
    let uuid = device.uuid.to_string();
    templates::probe_matches(
        &message_id.to_string(),
        &uuid,
        &uuid,
        &device.name,
        &device.device_service_url(),
    )
}

/// UDP socket bound to the WS-Discovery port and joined to the multicast
/// group. Address reuse lets every emulated device bind the same port.
fn multicast_socket(port: u16, group: Ipv4Addr) -> std::io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Answers WS-Discovery probes on behalf of one emulated device
pub struct DiscoveryResponder {
    device: Arc<DeviceModel>,
    socket: UdpSocket,
}

impl DiscoveryResponder {
    /// Join the WS-Discovery multicast group on all interfaces
    pub fn bind(device: Arc<DeviceModel>) -> Result<Self> {
        let socket = multicast_socket(WS_DISCOVERY_PORT, WS_DISCOVERY_MULTICAST_GROUP)
            .context("failed to join WS-Discovery multicast group")?;
        let socket = UdpSocket::from_std(socket).context("failed to register discovery socket")?;

        info!(
            device = %device.name,
            group = %WS_DISCOVERY_MULTICAST_GROUP,
            port = WS_DISCOVERY_PORT,
            "WS-Discovery listening"
        );

        Ok(Self::with_socket(device, socket))
    }

    /// Answer probes arriving on an already bound socket
    pub fn with_socket(device: Arc<DeviceModel>, socket: UdpSocket) -> Self {
        Self { device, socket }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive loop; returns only when the socket fails irrecoverably
    pub async fn run(self) {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (size, src_addr) = match self.socket.recv_from(&mut buffer).await {
                Ok(received) => received,
                Err(e) if is_transient(e.kind()) => {
                    debug!(device = %self.device.name, error = %e, "transient discovery receive error");
                    continue;
                }
                Err(e) => {
                    error!(device = %self.device.name, error = %e, "discovery socket failed");
                    return;
                }
            };

            if !is_probe(&buffer[..size]) {
                continue;
            }

            debug!(
                device = %self.device.name,
                src_addr = %src_addr,
                probe_size = size,
                "received WS-Discovery probe"
            );

            let response = probe_matches(&self.device, Uuid::new_v4());
            if let Err(e) = self.socket.send_to(response.as_bytes(), src_addr).await {
                warn!(
                    device = %self.device.name,
                    src_addr = %src_addr,
                    error = %e,
                    "failed to send ProbeMatches"
                );
            }
        }
    }
}

/// Errors a UDP socket reports for a single datagram rather than for itself
fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    )
}
