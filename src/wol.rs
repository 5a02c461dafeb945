use crate::error::{Error, Result};
use log::debug;
use tokio::net::UdpSocket;

/// Wake-on-LAN port
pub const WOL_PORT: u16 = 9;

const MAGIC_PACKET_LEN: usize = 102;

/// Parse a `aa:bb:cc:dd:ee:ff` (or `-` separated) MAC address
pub fn parse_mac(mac: &str) -> Result<[u8; 6]> {
    let parts: Vec<&str> = mac.split(|c| c == ':' || c == '-').collect();
    if parts.len() != 6 {
        return Err(Error::Other(format!("invalid MAC address: {}", mac)));
    }

    let mut bytes = [0u8; 6];
    for (byte, part) in bytes.iter_mut().zip(parts) {
        *byte = u8::from_str_radix(part, 16)
            .map_err(|_| Error::Other(format!("invalid MAC address: {}", mac)))?;
    }
    Ok(bytes)
}

/// Six 0xFF bytes followed by the MAC address repeated 16 times
pub fn magic_packet(mac: &str) -> Result<[u8; MAGIC_PACKET_LEN]> {
    let mac = parse_mac(mac)?;
    let mut packet = [0xFFu8; MAGIC_PACKET_LEN];
    for chunk in packet[6..].chunks_mut(6) {
        chunk.copy_from_slice(&mac);
    }
    Ok(packet)
}

/// Send the magic packet for `mac` to `host`
pub async fn wake(host: &str, mac: &str) -> Result<()> {
    let packet = magic_packet(mac)?;
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;
    socket.send_to(&packet, (host, WOL_PORT)).await?;
    debug!("Sent wake-on-LAN packet for {} to {}", mac, host);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_packet_layout() {
        let packet = magic_packet("a8:23:fe:01:02:0c").unwrap();
        assert_eq!(&packet[..6], &[0xFF; 6]);
        for repeat in packet[6..].chunks(6) {
            assert_eq!(repeat, &[0xa8, 0x23, 0xfe, 0x01, 0x02, 0x0c]);
        }
    }

    #[test]
    fn test_invalid_mac() {
        assert!(parse_mac("a8:23:fe:01:02").is_err());
        assert!(parse_mac("zz:23:fe:01:02:0c").is_err());
        assert_eq!(parse_mac("A8-23-FE-01-02-0C").unwrap()[0], 0xa8);
    }
}
