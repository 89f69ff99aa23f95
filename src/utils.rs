use std::{
    io,
    net::UdpSocket,
    time::Duration,
};

use crate::error::ConnectionError;

pub fn udp_sock(bind_addr: &str, read_timeout: Duration) -> Result<UdpSocket, ConnectionError> {
    let bind_err = |source| ConnectionError::Bind {
        addr: bind_addr.to_owned(),
        source,
    };
    let sock = UdpSocket::bind(bind_addr).map_err(bind_err)?;
    // a bounded read lets the receive loops notice shutdown
    sock.set_read_timeout(Some(read_timeout)).map_err(bind_err)?;
    sock.set_write_timeout(Some(read_timeout)).map_err(bind_err)?;
    Ok(sock)
}

pub fn contains_any(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Read timeouts surface as `WouldBlock` on unix and `TimedOut` on windows.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_contains_any() {
        assert_eq!(Some(0), contains_any(b"conn_ack:\x96\x17", b"conn_ack:"));
        assert_eq!(Some(2), contains_any(b"xxconn_ack:", b"conn_ack:"));
        assert_eq!(None, contains_any(b"conn_req:\x96\x17", b"conn_ack:"));
    }

    #[test]
    fn test_udp_sock_times_out() {
        let sock = udp_sock("127.0.0.1:0", Duration::from_millis(20)).expect("bind");
        let mut buff = [0u8; 16];
        let err = sock.recv(&mut buff).expect_err("nothing was sent");
        assert!(is_timeout(&err));
    }
}
