//! Framed socket transport for client control channels.
//!
//! Each accepted socket becomes a [`Connection`]: a length-delimited inbound
//! frame stream consumed by the relay's read task, plus a cloneable
//! [`FrameWriter`] feeding a dedicated writer task through a bounded queue.
//! The writer never applies backpressure to the rest of the daemon; a slow
//! or dead client loses frames instead of stalling the mesh.

use std::net::SocketAddr;

use bytes::Bytes;
use futures::SinkExt;
use prost::Message as _;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::debug;

use peerwire_proto::PeerMessage;

/// Per-connection tunables, set from daemon flags.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    /// Maximum wire frame size in bytes, enforced by the codec both ways.
    pub max_frame: usize,
    /// Outbound frame queue depth.
    pub send_queue: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_frame: 1024 * 1024,
            send_queue: 128,
        }
    }
}

/// One client control channel.
pub struct Connection {
    pub peer_addr: SocketAddr,
    pub(crate) inbound: FramedRead<OwnedReadHalf, LengthDelimitedCodec>,
    writer: FrameWriter,
}

impl Connection {
    /// Wrap an accepted socket and start its writer task.
    pub fn spawn(stream: TcpStream, peer_addr: SocketAddr, limits: ConnectionLimits) -> Self {
        let (read_half, write_half) = stream.into_split();
        let inbound = FramedRead::new(read_half, codec(limits.max_frame));
        let outbound = FramedWrite::new(write_half, codec(limits.max_frame));

        let (frame_tx, frame_rx) = mpsc::channel(limits.send_queue);
        tokio::spawn(write_loop(outbound, frame_rx, peer_addr));

        Self {
            peer_addr,
            inbound,
            writer: FrameWriter { tx: frame_tx },
        }
    }

    /// Non-owning outbound handle for the relay and its delivery callback.
    pub fn writer(&self) -> FrameWriter {
        self.writer.clone()
    }
}

fn codec(max_frame: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame)
        .new_codec()
}

/// Drain queued frames onto the socket until the queue closes or the sink
/// errors. Sink errors are terminal for the connection; the read side will
/// observe the close and run the relay teardown.
async fn write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
    mut frames: mpsc::Receiver<PeerMessage>,
    peer_addr: SocketAddr,
) {
    while let Some(frame) = frames.recv().await {
        let wire = Bytes::from(frame.encode_to_vec());
        if let Err(e) = sink.send(wire).await {
            debug!(peer = %peer_addr, error = %e, "outbound write failed, stopping writer");
            break;
        }
    }
}

/// Cloneable, non-blocking handle queueing frames to one client.
#[derive(Clone)]
pub struct FrameWriter {
    tx: mpsc::Sender<PeerMessage>,
}

impl FrameWriter {
    #[cfg(test)]
    pub(crate) fn for_queue(tx: mpsc::Sender<PeerMessage>) -> Self {
        Self { tx }
    }

    /// Queue a frame for the writer task. Never blocks.
    pub fn write(&self, frame: PeerMessage) -> Result<(), WriteError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WriteError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => WriteError::ConnectionClosed,
        })
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("outbound queue full")]
    QueueFull,

    #[error("connection closed")]
    ConnectionClosed,
}
