//! Framed UDP send/receive on top of `hopt_base::WireMessage`, and an
//! own-IP discovery trick for finding the host's outward-facing address.

use hopt_base::wire::WireDecodeError;
use hopt_base::WireMessage;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

/// Opens a UDP socket, "connects" it to an unroutable address, and reads
/// back the local endpoint the kernel picked to determine the host's
/// outward-facing IP — without ever sending a packet. Falls back to
/// loopback on any error.
pub fn discover_own_ip() -> IpAddr {
    (|| -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(("10.255.255.255", 1))?;
        Ok(socket.local_addr()?.ip())
    })()
    .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Sends one wire message as a single datagram.
pub fn send_wire_message(
    socket: &UdpSocket,
    dest: SocketAddr,
    message: &WireMessage,
) -> std::io::Result<()> {
    let encoded = message.encode();
    socket.send_to(&encoded, dest)?;
    Ok(())
}

/// Receives one datagram and decodes it. `Ok(Err(_))` means a datagram
/// arrived but didn't parse as a known message — logged and dropped by the
/// caller, not escalated.
pub fn recv_wire_message(
    socket: &UdpSocket,
    buf: &mut [u8],
) -> std::io::Result<(SocketAddr, Result<WireMessage, WireDecodeError>)> {
    let (n, from) = socket.recv_from(buf)?;
    Ok((from, WireMessage::decode(&buf[..n])))
}
