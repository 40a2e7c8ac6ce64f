//! PeerWire Protocol Frames
//!
//! Message shapes carried on a client control channel, one prost-encoded
//! [`PeerMessage`] per length-delimited frame, in both directions.
//!
//! The structs are hand-maintained prost messages rather than protoc output
//! so the crate builds without a system protobuf toolchain. Field tags are
//! part of the wire contract and must never be reused or renumbered.

#![allow(clippy::derive_partial_eq_without_eq)]

/// One frame on the control channel.
///
/// `payload` decodes to `None` for frame kinds this build does not know
/// about; receivers must tolerate and skip those rather than fail the
/// connection.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeerMessage {
    #[prost(oneof = "peer_message::Payload", tags = "1, 2")]
    pub payload: Option<peer_message::Payload>,
}

pub mod peer_message {
    /// Frame discriminator.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        Open(super::Open),
        #[prost(message, tag = "2")]
        Data(super::Data),
    }
}

/// Client request to join a topic. Valid once per connection.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Open {
    #[prost(string, tag = "1")]
    pub topic: String,
}

/// Opaque payload addressed to (or received from) the peer behind `alias`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Data {
    #[prost(uint32, tag = "1")]
    pub alias: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

impl PeerMessage {
    /// Build an OPEN frame for `topic`.
    pub fn open(topic: impl Into<String>) -> Self {
        Self {
            payload: Some(peer_message::Payload::Open(Open {
                topic: topic.into(),
            })),
        }
    }

    /// Build a DATA frame addressed to `alias`.
    pub fn data(alias: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: Some(peer_message::Payload::Data(Data {
                alias,
                payload: payload.into(),
            })),
        }
    }
}
