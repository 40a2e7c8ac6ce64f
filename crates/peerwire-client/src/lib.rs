//! PeerWire Client Library
//!
//! Thin client for the daemon's control channel: open one topic, send
//! alias-addressed payloads, receive deliveries. Embedders and integration
//! tests both drive the daemon through this.

use std::net::SocketAddr;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use prost::Message as _;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, warn};

use peerwire_proto::PeerMessage;
use peerwire_proto::peer_message::Payload;

/// Inbound delivery: the sending peer's alias and the raw payload.
pub type Delivery = (u32, Vec<u8>);

/// Capacity of the inbound delivery queue handed to the caller.
const DELIVERY_QUEUE: usize = 128;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to one control channel.
///
/// Dropping the client closes the channel; the daemon then releases the
/// topic membership held for this connection.
pub struct TopicClient {
    sink: Mutex<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>,
}

impl TopicClient {
    /// Connect to a daemon. Returns the client and the stream of inbound
    /// deliveries; the stream ends when the connection does.
    pub async fn connect(addr: SocketAddr) -> Result<(Self, mpsc::Receiver<Delivery>), ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let (delivery_tx, delivery_rx) = mpsc::channel(DELIVERY_QUEUE);
        tokio::spawn(read_loop(
            FramedRead::new(read_half, LengthDelimitedCodec::new()),
            delivery_tx,
        ));

        Ok((
            Self {
                sink: Mutex::new(FramedWrite::new(write_half, LengthDelimitedCodec::new())),
            },
            delivery_rx,
        ))
    }

    /// Join `topic`. Meaningful once per connection; the daemon ignores
    /// later OPENs.
    pub async fn open(&self, topic: &str) -> Result<(), ClientError> {
        self.write(PeerMessage::open(topic)).await
    }

    /// Send `payload` to the peer behind `alias`.
    pub async fn send(&self, alias: u32, payload: impl Into<Vec<u8>>) -> Result<(), ClientError> {
        self.write(PeerMessage::data(alias, payload)).await
    }

    async fn write(&self, frame: PeerMessage) -> Result<(), ClientError> {
        let mut sink = self.sink.lock().await;
        sink.send(Bytes::from(frame.encode_to_vec())).await?;
        Ok(())
    }
}

/// Decode inbound frames, surfacing DATA deliveries. Unknown frame kinds
/// are skipped for forward compatibility.
async fn read_loop(
    mut inbound: FramedRead<OwnedReadHalf, LengthDelimitedCodec>,
    deliveries: mpsc::Sender<Delivery>,
) {
    while let Some(next) = inbound.next().await {
        match next {
            Ok(wire) => match PeerMessage::decode(wire.freeze()) {
                Ok(PeerMessage {
                    payload: Some(Payload::Data(data)),
                }) => {
                    if deliveries.send((data.alias, data.payload)).await.is_err() {
                        // Caller dropped the receiver; keep draining so the
                        // socket stays healthy until the client is dropped.
                        debug!("delivery receiver dropped");
                    }
                }
                Ok(_) => debug!("ignoring non-DATA frame from daemon"),
                Err(e) => warn!(error = %e, "undecodable frame from daemon"),
            },
            Err(e) => {
                debug!(error = %e, "control channel read failed");
                break;
            }
        }
    }
}
