//! Per-connection frame I/O: length-prefixed request/response framing plus
//! the zero-copy record transfer used by the Fetch handler (spec §4.5/§4.6).

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

use ridgeline_log::SegmentRange;

use crate::sendfile;

/// Read deadline before a connection's negotiated session timeout is known
/// (DESIGN.md "Frame reads" open-question resolution).
pub const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(30);

/// Guards against a corrupt or hostile length prefix turning into an
/// unbounded allocation.
const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

pub enum PeerStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl PeerStream {
    /// Whether this connection can use the kernel file-to-socket path: only
    /// plain TCP qualifies, since `sendfile` transfers raw bytes and can't
    /// be interposed with TLS record framing.
    pub fn supports_sendfile(&self) -> bool {
        matches!(self, PeerStream::Plain(_)) && sendfile::is_available()
    }

    /// Read one length-prefixed frame, or `Ok(None)` on a clean EOF between
    /// frames (the client closed the connection).
    pub async fn read_frame(&mut self, read_deadline: Duration) -> io::Result<Option<BytesMut>> {
        let mut len_buf = [0u8; 4];
        match self.read_exact_deadline(&mut len_buf, read_deadline).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let len = i32::from_be_bytes(len_buf);
        if !(0..=MAX_FRAME_LEN as i32).contains(&len) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid frame length {len}"),
            ));
        }
        let mut body = BytesMut::zeroed(len as usize);
        self.read_exact_deadline(&mut body, read_deadline).await?;
        Ok(Some(body))
    }

    async fn read_exact_deadline(&mut self, buf: &mut [u8], deadline: Duration) -> io::Result<()> {
        let fut = async {
            match self {
                PeerStream::Plain(s) => s.read_exact(buf).await,
                PeerStream::Tls(s) => s.read_exact(buf).await,
            }
        };
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "read deadline exceeded")),
        }
    }

    pub async fn write_frame(&mut self, payload: &[u8]) -> io::Result<()> {
        let header = (payload.len() as i32).to_be_bytes();
        self.write_raw(&header).await?;
        self.write_raw(payload).await?;
        self.flush().await
    }

    pub async fn write_raw(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            PeerStream::Plain(s) => s.write_all(buf).await,
            PeerStream::Tls(s) => s.write_all(buf).await,
        }
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        match self {
            PeerStream::Plain(s) => s.flush().await,
            PeerStream::Tls(s) => s.flush().await,
        }
    }

    /// Stream a resolved segment byte range to the socket: `sendfile` on a
    /// plain connection where the platform supports it, a buffered copy
    /// otherwise. Callers write the fetch response header and per-partition
    /// prelude first; this only ever appends raw record bytes (spec §4.5).
    pub async fn stream_range(&mut self, range: &SegmentRange) -> io::Result<()> {
        if let PeerStream::Plain(socket) = self {
            if sendfile::is_available() {
                let file = std::fs::File::open(&range.path)?;
                return sendfile::send_all(socket, &file, range.file_offset, range.length).await;
            }
        }
        self.stream_range_buffered(range).await
    }

    /// Fallback transfer for TLS connections and platforms without
    /// `sendfile`: read the resolved range off disk in a blocking task (so
    /// the positioned read never stalls the async executor), then write it.
    async fn stream_range_buffered(&mut self, range: &SegmentRange) -> io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};

        let path = range.path.clone();
        let file_offset = range.file_offset;
        let length = range.length;
        let bytes = tokio::task::spawn_blocking(move || -> io::Result<Vec<u8>> {
            let mut file = std::fs::File::open(&path)?;
            file.seek(SeekFrom::Start(file_offset))?;
            let mut buf = vec![0u8; length];
            file.read_exact(&mut buf)?;
            Ok(buf)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

        self.write_raw(&bytes).await
    }
}
