//! Kernel file-to-socket transfer for the zero-copy Fetch path (spec §4.5,
//! §9's "capability predicate on the writer: expose this as a capability
//! predicate on the writer; fall back to a buffered loop when absent").
//!
//! Only Linux gets a real `sendfile(2)` transfer here; every other target
//! reports itself unavailable through [`is_available`] and callers fall back
//! to [`crate::connection::PeerStream::stream_range_buffered`].

#[cfg(target_os = "linux")]
mod imp {
    use std::io;
    use std::os::unix::io::AsRawFd;

    use tokio::io::Interest;
    use tokio::net::TcpStream;

    pub fn is_available() -> bool {
        true
    }

    /// Transfer `length` bytes starting at `offset` in `file` to `socket`,
    /// looping `sendfile` calls around the socket's writable readiness since
    /// the syscall itself respects the non-blocking flag tokio sets on its
    /// sockets.
    pub async fn send_all(
        socket: &TcpStream,
        file: &std::fs::File,
        offset: u64,
        length: usize,
    ) -> io::Result<()> {
        let in_fd = file.as_raw_fd();
        let out_fd = socket.as_raw_fd();
        let mut off: libc::off_t = offset as libc::off_t;
        let mut remaining = length;

        while remaining > 0 {
            socket.writable().await?;
            let result = socket.try_io(Interest::WRITABLE, || {
                let n = unsafe { libc::sendfile(out_fd, in_fd, &mut off, remaining) };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });
            match result {
                Ok(0) => break,
                Ok(n) => remaining -= n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use std::io;

    use tokio::net::TcpStream;

    pub fn is_available() -> bool {
        false
    }

    pub async fn send_all(
        _socket: &TcpStream,
        _file: &std::fs::File,
        _offset: u64,
        _length: usize,
    ) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "sendfile is not available on this platform",
        ))
    }
}

pub use imp::{is_available, send_all};
