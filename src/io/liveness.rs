//! Liveness and data-availability checks
//!
//! A stream socket gives no push notification when the peer goes away. The
//! check infers it instead: a socket that polls readable while holding zero
//! buffered bytes has reached end-of-stream (or an error state), so it is
//! treated as dead.
//!
//! The inference is a heuristic. A check that races with a concurrent read can
//! see the readable flag from before the read and the byte count from after it,
//! and it cannot tell a half-closed peer from a fully closed one. A wrong
//! answer is corrected on the next poll cycle.

use std::io;
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

/// Non-blocking readiness queries on a byte-stream socket
///
/// This is the seam between the session layer and the transport. Queries must
/// never block beyond `timeout` and must never consume data.
pub trait Pollable {
    /// Whether a read would not block (data, end-of-stream, or error pending)
    fn poll_readable(&self, timeout: Duration) -> io::Result<bool>;

    /// Number of bytes received and not yet read by the owner
    fn buffered_bytes(&self) -> io::Result<usize>;
}

impl Pollable for TcpStream {
    fn poll_readable(&self, timeout: Duration) -> io::Result<bool> {
        poll_fd_readable(self.as_raw_fd(), timeout)
    }

    fn buffered_bytes(&self) -> io::Result<usize> {
        fd_buffered_bytes(self.as_raw_fd())
    }
}

impl<T: Pollable + ?Sized> Pollable for Arc<T> {
    fn poll_readable(&self, timeout: Duration) -> io::Result<bool> {
        (**self).poll_readable(timeout)
    }

    fn buffered_bytes(&self) -> io::Result<usize> {
        (**self).buffered_bytes()
    }
}

/// Combined liveness check
///
/// Dead when the socket reports readable and has nothing buffered. Any query
/// fault (invalid descriptor, closed connection) is also dead.
pub fn is_alive<P: Pollable + ?Sized>(socket: &P, timeout: Duration) -> bool {
    let readable = match socket.poll_readable(timeout) {
        Ok(readable) => readable,
        Err(e) => {
            trace!(error = %e, "Readability poll failed");
            return false;
        }
    };

    match socket.buffered_bytes() {
        Ok(buffered) => !(readable && buffered == 0),
        Err(e) => {
            trace!(error = %e, "Buffered byte query failed");
            false
        }
    }
}

fn poll_fd_readable(fd: libc::c_int, timeout: Duration) -> io::Result<bool> {
    let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };

    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    if ret == 0 {
        return Ok(false);
    }
    if pfd.revents & libc::POLLNVAL != 0 {
        return Err(io::Error::from_raw_os_error(libc::EBADF));
    }

    Ok(pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
}

fn fd_buffered_bytes(fd: libc::c_int) -> io::Result<usize> {
    let mut available: libc::c_int = 0;

    let ret = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut available as *mut libc::c_int) };

    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(available.max(0) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;

    struct FakeSocket {
        readable: io::Result<bool>,
        buffered: io::Result<usize>,
    }

    impl FakeSocket {
        fn new(readable: bool, buffered: usize) -> Self {
            Self {
                readable: Ok(readable),
                buffered: Ok(buffered),
            }
        }
    }

    impl Pollable for FakeSocket {
        fn poll_readable(&self, _timeout: Duration) -> io::Result<bool> {
            match &self.readable {
                Ok(r) => Ok(*r),
                Err(e) => Err(io::Error::new(e.kind(), "fake")),
            }
        }

        fn buffered_bytes(&self) -> io::Result<usize> {
            match &self.buffered {
                Ok(n) => Ok(*n),
                Err(e) => Err(io::Error::new(e.kind(), "fake")),
            }
        }
    }

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_heuristic_readable_and_empty_is_dead() {
        assert!(!is_alive(&FakeSocket::new(true, 0), Duration::ZERO));
    }

    #[test]
    fn test_heuristic_other_combinations_are_alive() {
        assert!(is_alive(&FakeSocket::new(false, 0), Duration::ZERO));
        assert!(is_alive(&FakeSocket::new(true, 12), Duration::ZERO));
        assert!(is_alive(&FakeSocket::new(false, 3), Duration::ZERO));
    }

    #[test]
    fn test_poll_fault_is_dead() {
        let socket = FakeSocket {
            readable: Err(io::Error::from(io::ErrorKind::NotConnected)),
            buffered: Ok(0),
        };
        assert!(!is_alive(&socket, Duration::ZERO));

        let socket = FakeSocket {
            readable: Ok(false),
            buffered: Err(io::Error::from(io::ErrorKind::NotConnected)),
        };
        assert!(!is_alive(&socket, Duration::ZERO));
    }

    #[test]
    fn test_fresh_connection_is_alive() {
        let (client, _server) = socket_pair();
        assert!(is_alive(&client, Duration::ZERO));
        assert_eq!(client.buffered_bytes().unwrap(), 0);
        assert!(!client.poll_readable(Duration::ZERO).unwrap());
    }

    #[test]
    fn test_buffered_bytes_reported() {
        let (client, mut server) = socket_pair();
        server.write_all(b"hello").unwrap();

        assert!(wait_until(|| client.buffered_bytes().unwrap() == 5));
        assert!(client.poll_readable(Duration::ZERO).unwrap());
        assert!(is_alive(&client, Duration::ZERO));
    }

    #[test]
    fn test_peer_close_detected() {
        let (client, server) = socket_pair();
        drop(server);

        assert!(wait_until(|| !is_alive(&client, Duration::ZERO)));
    }

    #[test]
    fn test_peer_close_masked_by_unread_data() {
        let (client, mut server) = socket_pair();
        server.write_all(b"bye").unwrap();
        drop(server);

        assert!(wait_until(|| client.buffered_bytes().unwrap() == 3));
        assert!(is_alive(&client, Duration::ZERO));
    }
}
