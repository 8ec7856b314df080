use std::io;
use std::pin::Pin;

use futures::{Sink, Stream};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::chunk::{Chunk, FileMeta};
use crate::{Error, Result};

/// ALPN protocol identifier for the upload service
pub const MLS_ALPN: &[u8] = b"mls/upload/1";

/// Metadata key carrying the uploaded file's name
pub const FILE_NAME_KEY: &str = "file_name";

/// Metadata key carrying the file size as a decimal string
pub const FILE_SIZE_KEY: &str = "file_size";

/// Upper bound for a single frame on the wire (10 MB)
pub const MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

/// Room a chunk frame needs besides its content: variant tag, id and length
/// varints, and the 64-char checksum with its length prefix
pub const FRAME_OVERHEAD: usize = 128;

/// Key/value pairs attached to the upload call before the first chunk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallMetadata {
    pairs: Vec<(String, String)>,
}

impl CallMetadata {
    pub fn for_file(meta: &FileMeta) -> Self {
        let mut md = Self::default();
        md.insert(FILE_NAME_KEY, meta.name.clone());
        md.insert(FILE_SIZE_KEY, meta.size.to_string());
        md
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Client to server messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UploadRequest {
    /// Always the first frame of a call
    Metadata(CallMetadata),

    /// File data chunk
    Chunk(Chunk),
}

/// Server to client acknowledgment.
///
/// `success` is the full set of chunk ids the server has stored so far, not
/// a delta. A server that forgets an id in a later snapshot will stall the
/// upload until it reports it again.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadStatus {
    pub success: Vec<i64>,
}

impl UploadRequest {
    /// Serialize message to bytes using postcard
    pub fn to_bytes(&self) -> std::result::Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Deserialize message from bytes
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

/// Write a length-prefixed frame
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = postcard::to_allocvec(msg)
        .map_err(|e| Error::Protocol(format!("serialization error: {}", e)))?;

    if bytes.len() > MAX_FRAME_LEN {
        return Err(Error::Protocol("message too large".into()));
    }

    let len = (bytes.len() as u32).to_be_bytes();
    writer.write_all(&len).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;

    Ok(())
}

/// Read a length-prefixed frame.
///
/// Returns `Ok(None)` when the peer finished the stream on a frame boundary.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    let first = reader.read(&mut len_buf).await?;
    if first == 0 {
        return Ok(None);
    }
    read_exact_frame(reader, &mut len_buf[first..]).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_LEN {
        return Err(Error::Protocol("message too large".into()));
    }

    let mut buf = vec![0u8; len];
    read_exact_frame(reader, &mut buf).await?;

    postcard::from_bytes(&buf)
        .map(Some)
        .map_err(|e| Error::Protocol(format!("deserialization error: {}", e)))
}

async fn read_exact_frame<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(Error::Protocol("stream ended inside a frame".into()))
        }
        Err(e) => Err(e.into()),
    }
}

fn is_peer_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}

/// Write one request frame.
///
/// A peer that stopped reading surfaces as [`Error::StreamClosed`].
pub async fn send_request<W>(writer: &mut W, req: &UploadRequest) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match write_frame(writer, req).await {
        Err(Error::Io(e)) if is_peer_closed(&e) => Err(Error::StreamClosed),
        res => res,
    }
}

/// Outbound half of an upload call
pub type RequestSink = Pin<Box<dyn Sink<UploadRequest, Error = Error> + Send>>;

/// Inbound half of an upload call
pub type StatusStream = Pin<Box<dyn Stream<Item = Result<UploadStatus>> + Send>>;

/// Wrap a writer into a sink of framed requests, see [`send_request`].
pub fn request_sink<W>(writer: W) -> RequestSink
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    Box::pin(futures::sink::unfold(
        writer,
        |mut writer, req: UploadRequest| async move {
            send_request(&mut writer, &req).await?;
            Ok(writer)
        },
    ))
}

/// Wrap a reader into a stream of acknowledgment snapshots.
///
/// The stream ends cleanly when the peer finishes its side; after an error
/// it yields nothing more.
pub fn status_stream<R>(reader: R) -> StatusStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    Box::pin(futures::stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        match read_frame::<_, UploadStatus>(&mut reader).await {
            Ok(Some(status)) => Some((Ok(status), Some(reader))),
            Ok(None) => None,
            Err(e) => Some((Err(e), None)),
        }
    }))
}
