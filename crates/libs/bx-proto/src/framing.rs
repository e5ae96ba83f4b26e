//! Length-prefixed framed transport for protocol messages.
//!
//! Every frame carries one JSON-encoded message. The codec configuration
//! must be identical on both peers, so both construct it through
//! [`frame_codec`].

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::prelude::*;

/// Maximum size of a single frame.
///
/// Command transcripts dominate frame size; a compile step that logs tens of
/// megabytes still fits, while a corrupt length prefix cannot make a peer
/// allocate without bound.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// A framed protocol connection.
pub type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;

/// Builds the length-delimited codec used on both ends of a connection.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Wraps a TCP stream in the protocol framing.
pub fn framed(stream: TcpStream) -> FramedStream {
    Framed::new(stream, frame_codec())
}

/// Encodes a message into a single frame payload.
pub fn encode_message<M: Serialize>(message: &M) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

/// Decodes a frame payload into a message.
pub fn decode_message<M: DeserializeOwned>(frame: &[u8]) -> Result<M> {
    Ok(serde_json::from_slice(frame)?)
}

/// Sends one message over a framed connection.
pub async fn send<T, M>(framed: &mut Framed<T, LengthDelimitedCodec>, message: &M) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    M: Serialize,
{
    framed.send(encode_message(message)?).await?;
    Ok(())
}

/// Receives the next message from a framed connection.
///
/// Returns `Ok(None)` when the peer has closed the connection.
pub async fn recv<T, M>(framed: &mut Framed<T, LengthDelimitedCodec>) -> Result<Option<M>>
where
    T: AsyncRead + AsyncWrite + Unpin,
    M: DeserializeOwned,
{
    match framed.next().await {
        Some(frame) => Ok(Some(decode_message(&frame?)?)),
        None => Ok(None),
    }
}
