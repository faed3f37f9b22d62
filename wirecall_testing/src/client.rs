//! Minimal TCP client side for end-to-end tests.

use std::time::Duration;

use tokio::{io::AsyncReadExt, net::TcpStream, time::timeout};

use crate::frames::{DecodedFrame, decode_frames};

/// Upper bound on how long a test waits for the server.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect to a `tcp://host:port` URL.
///
/// # Panics
///
/// Panics if the URL lacks the `tcp://` prefix or the connection fails.
pub async fn connect(url: &str) -> TcpStream {
    let addr = url.strip_prefix("tcp://").expect("tcp url");
    timeout(IO_TIMEOUT, TcpStream::connect(addr))
        .await
        .expect("connect in time")
        .expect("connect")
}

/// Read from `stream` until `count` complete frames have arrived.
///
/// # Panics
///
/// Panics on timeout, I/O error, or if the peer closes first.
pub async fn read_frames(stream: &mut TcpStream, count: usize) -> Vec<DecodedFrame> {
    let mut buf = Vec::new();
    loop {
        let frames = decode_frames(&buf);
        if frames.len() >= count {
            return frames;
        }
        let mut chunk = [0u8; 4096];
        let n = timeout(IO_TIMEOUT, stream.read(&mut chunk))
            .await
            .expect("frames in time")
            .expect("read frames");
        assert!(n > 0, "peer closed after {} of {count} frames", frames.len());
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Wait for the peer to close `stream`, returning any bytes read first.
///
/// A reset counts as closed.
///
/// # Panics
///
/// Panics if the peer keeps the connection open past [`IO_TIMEOUT`].
pub async fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    match timeout(IO_TIMEOUT, stream.read_to_end(&mut buf)).await {
        Ok(_) => buf,
        Err(_) => panic!("connection still open after {IO_TIMEOUT:?}"),
    }
}
