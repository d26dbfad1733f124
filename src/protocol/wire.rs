//! Wire protocol utilities
//!
//! Async framing helpers for reading and writing handshakes and
//! length-prefixed messages on any tokio stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{trace, warn};

use crate::error::{Result, TorrentError};

use super::handshake::HANDSHAKE_LENGTH;
use super::{Handshake, Message};

/// Largest frame accepted from a peer (a 16 KiB block plus generous headroom)
pub const MAX_FRAME_LENGTH: usize = 1 << 20;

/// Read a complete message from the stream
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    let mut length_buf = [0u8; 4];
    reader.read_exact(&mut length_buf).await?;
    let length = u32::from_be_bytes(length_buf) as usize;

    if length == 0 {
        return Ok(Message::KeepAlive);
    }

    if length > MAX_FRAME_LENGTH {
        warn!("Refusing {} byte frame (limit {})", length, MAX_FRAME_LENGTH);
        return Err(TorrentError::protocol_error_with_source(
            "Frame too large",
            format!("{} bytes", length),
        ));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    trace!("Read {} byte frame", length);

    Message::from_payload(&payload)
}

/// Write a message to the stream
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    writer.write_all(&message.serialize()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a handshake from the stream
pub async fn read_handshake<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Handshake> {
    let mut buf = [0u8; HANDSHAKE_LENGTH];
    reader.read_exact(&mut buf).await?;
    Handshake::deserialize(&buf)
}

/// Write a handshake to the stream
pub async fn write_handshake<W: AsyncWrite + Unpin>(writer: &mut W, handshake: &Handshake) -> Result<()> {
    writer.write_all(&handshake.serialize()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_messages_and_handshake() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let handshake = Handshake::new([4u8; 20], [5u8; 20]);
        write_handshake(&mut client, &handshake).await.unwrap();
        write_message(&mut client, &Message::Interested).await.unwrap();
        write_message(&mut client, &Message::KeepAlive).await.unwrap();

        assert_eq!(read_handshake(&mut server).await.unwrap(), handshake);
        assert_eq!(read_message(&mut server).await.unwrap(), Message::Interested);
        assert_eq!(read_message(&mut server).await.unwrap(), Message::KeepAlive);
    }

    #[tokio::test]
    async fn test_read_message_rejects_oversized_frame() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&(u32::MAX).to_be_bytes()).await.unwrap();
        assert!(read_message(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn test_read_message_eof_is_error() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_message(&mut server).await.is_err());
    }
}
