use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::net::UdpSocket;
use tracing::{debug, info};

static ANY_ADDR: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);
static MULTICAST_ADDRESS: Ipv4Addr = Ipv4Addr::new(239, 255, 6, 6);
static MULTICAST_PORT: u16 = 6688;

/// First IPv4 address of an interface that is up and not loopback.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    pnet::datalink::interfaces()
        .into_iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback())
        .flat_map(|iface| iface.ips)
        .find_map(|network| match network.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
}

/// `u32` length of the rest, `u16` HTTP port, then the display name. All
/// integers little endian.
pub fn encode_announcement(display_name: &str, http_port: u16) -> BytesMut {
    let name = display_name.as_bytes();
    let mut packet = BytesMut::with_capacity(4 + 2 + name.len());
    packet.put_u32_le((2 + name.len()) as u32);
    packet.put_u16_le(http_port);
    packet.put_slice(name);
    packet
}

/// Periodically tells the local network where the web interface lives.
pub async fn announce(display_name: String, http_port: u16, interval: Duration) -> std::io::Result<()> {
    let socket = UdpSocket::bind((ANY_ADDR, 0)).await?;
    let packet = encode_announcement(&display_name, http_port);
    info!(
        "Announcing '{}' on {}:{}",
        display_name, MULTICAST_ADDRESS, MULTICAST_PORT
    );

    loop {
        socket
            .send_to(&packet, (MULTICAST_ADDRESS, MULTICAST_PORT))
            .await?;
        debug!("Sent discovery announcement");
        tokio::time::sleep(interval).await;
    }
}
