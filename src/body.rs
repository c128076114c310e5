//! Response body plumbing
//!
//! Every response the gateway produces is a [`GatewayBody`]. Static bodies
//! use [`full`]; streamed upstream responses go through a bounded channel
//! fed by the task that reads the upstream body (and tees it into the
//! cache), so disk and network backpressure reach the upstream read loop.

use crate::error::{FetchError, Result};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use std::fmt::Display;
use std::io;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

/// Boxed body type of every gateway response
pub type GatewayBody = UnsyncBoxBody<Bytes, io::Error>;

/// Sending half of a streamed response body
pub type BodySender = mpsc::Sender<io::Result<Bytes>>;

/// Read size used when streaming cache files
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Chunks buffered between the upstream reader and the client
pub const CHANNEL_CAPACITY: usize = 16;

/// Longest a client may leave a chunk unread before it counts as gone
pub const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// A complete in-memory body
pub fn full(data: impl Into<Bytes>) -> GatewayBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Wrap a byte stream as a response body
pub fn from_stream<S>(stream: S) -> GatewayBody
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync()
}

/// Create a streamed body and the sender that feeds it
///
/// The body ends when every sender is dropped. An `Err` item aborts the
/// body, which the client sees as a truncated response.
pub fn channel() -> (BodySender, GatewayBody) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (tx, from_stream(stream))
}

/// Stream an open file in chunks of [`READ_CHUNK_SIZE`]
pub fn file_stream(file: File) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    futures::stream::try_unfold(file, |mut file| async move {
        let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
        let read = file.read_buf(&mut buf).await?;
        let next = if read == 0 {
            None
        } else {
            Some((buf.freeze(), file))
        };
        Ok::<_, io::Error>(next)
    })
}

/// Copy an upstream body to the client without caching
///
/// # Returns
/// * `Ok(bytes)` once the whole body was handed to the client
/// * `Err(FetchError::UpstreamFetch)` if the upstream body failed mid-stream
/// * `Err(FetchError::IoError)` if the client went away or stopped reading
///   for longer than `write_timeout`
pub async fn pipe<S, E>(body: S, client: &BodySender, write_timeout: Duration) -> Result<u64>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Display,
{
    let mut body = std::pin::pin!(body);
    let mut copied = 0u64;

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return Err(abort_client(client, e).await),
        };
        copied += chunk.len() as u64;
        send_chunk(client, chunk, write_timeout).await?;
    }

    Ok(copied)
}

/// Hand one chunk to the client, giving up after `write_timeout`
pub(crate) async fn send_chunk(client: &BodySender, chunk: Bytes, write_timeout: Duration) -> Result<()> {
    match tokio::time::timeout(write_timeout, client.send(Ok(chunk))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(FetchError::IoError("client disconnected".to_string())),
        Err(_) => Err(FetchError::IoError(format!(
            "client stopped reading for {:?}",
            write_timeout
        ))),
    }
}

/// Terminate the client body after an upstream read error
pub(crate) async fn abort_client<E: Display>(client: &BodySender, err: E) -> FetchError {
    let message = err.to_string();
    let _ = client.send(Err(io::Error::other(message.clone()))).await;
    FetchError::UpstreamFetch(format!("upstream body: {}", message))
}
