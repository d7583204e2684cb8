//! Acknowledgement peer: bounce every datagram back to whoever sent it

use std::{
    io::ErrorKind,
    net::UdpSocket,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use tracing::{debug, info};

use crate::Result;

const POLL: Duration = Duration::from_millis(200);

/// Serve until `shutdown` is raised, returns how many datagrams were echoed
pub fn serve(socket: &UdpSocket, shutdown: &AtomicBool) -> Result<usize> {
    socket.set_read_timeout(Some(POLL))?;
    info!(addr = %socket.local_addr()?, "Echoing acknowledgements");
    let mut buf = [0u8; 1024];
    let mut echoed = 0usize;
    while !shutdown.load(Ordering::Relaxed) {
        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(x) => x,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => return Err(e.into()),
        };
        debug!(%from, payload = %String::from_utf8_lossy(&buf[..n]), "Echo");
        socket.send_to(&buf[..n], from)?;
        echoed += 1;
    }
    info!(echoed, "Echo server stopped");
    Ok(echoed)
}
