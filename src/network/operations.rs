//! Outbound wire I/O: framed reads and writes plus the one-shot
//! request/response exchange every protocol interaction is built from.

use super::message::{MAX_MESSAGE_SIZE, Message};
use crate::error::{CoinError, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Total budget for one connect/send/receive exchange with a peer.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Write one framed message.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = message.to_bytes()?;
    writer.write_all(&frame).await?;
    Ok(())
}

/// Read one framed message, looping until the declared length is consumed.
/// A clean end-of-stream before the prefix means the peer had nothing to
/// say and yields `None`.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let length = u32::from_be_bytes(prefix) as usize;
    if length > MAX_MESSAGE_SIZE {
        return Err(CoinError::MalformedMessage(format!(
            "frame of {length} bytes exceeds the limit"
        )));
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

/// Connect to `peer`, deliver `message`, and wait for an optional reply.
///
/// The whole exchange shares one [`REQUEST_TIMEOUT`] budget. Connection
/// refusal and timeout both surface as [`CoinError::PeerUnreachable`]; the
/// caller is expected to fold either into the peer's failure counter.
pub async fn send_request(peer: &str, message: &Message) -> Result<Option<Message>> {
    debug!(peer, message_type = ?message.message_type, "sending message");
    let exchange = async {
        let mut stream = TcpStream::connect(peer)
            .await
            .map_err(|err| CoinError::PeerUnreachable(format!("{peer}: {err}")))?;
        write_message(&mut stream, message).await?;
        read_message(&mut stream).await
    };
    match timeout(REQUEST_TIMEOUT, exchange).await {
        Ok(result) => result,
        Err(_) => Err(CoinError::PeerUnreachable(format!(
            "{peer}: request timed out"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn framed_round_trip_over_a_duplex_pipe() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let mut message = Message::ping();
        message.sender = "127.0.0.1:5000".to_string();

        write_message(&mut client, &message).await.unwrap();
        drop(client);

        let received = read_message(&mut server).await.unwrap().unwrap();
        assert_eq!(received, message);
        // Stream is exhausted afterwards.
        assert!(read_message(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected_before_allocation() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let prefix = ((MAX_MESSAGE_SIZE + 1) as u32).to_be_bytes();
        client.write_all(&prefix).await.unwrap();
        drop(client);

        assert!(matches!(
            read_message(&mut server).await,
            Err(CoinError::MalformedMessage(_))
        ));
    }

    #[tokio::test]
    async fn truncated_bodies_are_io_errors() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        assert!(read_message(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_peers_report_as_such() {
        // Grab an ephemeral port and release it so nothing is listening.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let result = send_request(&format!("127.0.0.1:{port}"), &Message::ping()).await;
        assert!(matches!(result, Err(CoinError::PeerUnreachable(_))));
    }
}
