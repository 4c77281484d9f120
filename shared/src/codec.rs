//! Length-prefixed framing over any async byte stream.
//!
//! Every frame is a 4-byte big-endian body length followed by a bincode
//! body. Keeping the frame boundary separate from the body lets a reader skip
//! a body it cannot decode (for example a packet kind added by a newer peer)
//! without losing its place in the stream.

use bincode::{deserialize, serialize};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest body accepted or produced, in bytes.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const HEADER_LEN: usize = 4;

/// Reads one raw frame body.
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary. A
/// stream that ends inside a frame, or a length above [`MAX_FRAME_LEN`], is an
/// error: the stream cannot be resynchronised after either.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream closed inside frame header",
            ));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit of {}", len, MAX_FRAME_LEN),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Decodes a frame body produced by [`write_frame`].
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> io::Result<T> {
    deserialize(body).map_err(to_io_error)
}

/// Reads and decodes one frame. Decode failures surface as `InvalidData`.
pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match read_frame(reader).await? {
        Some(body) => decode(&body).map(Some),
        None => Ok(None),
    }
}

/// Encodes `message` as a single frame, writes it and flushes.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize + ?Sized,
{
    let body = serialize(message).map_err(to_io_error)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds limit of {}", body.len(), MAX_FRAME_LEN),
        ));
    }

    // Header and body go out in one write so a frame is never split by
    // another writer's flush.
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: bincode::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Packet;

    #[tokio::test]
    async fn test_packets_survive_the_wire() {
        let packets = vec![
            Packet::movement("alice", "UP"),
            Packet::movement("bob", ""),
            Packet::collision("alice", "hit bob"),
            Packet::logout("bob", "bye"),
            Packet::heartbeat(),
            Packet::new_connection("carol", "Red"),
        ];

        let (mut writer, mut reader) = tokio::io::duplex(4096);
        for packet in &packets {
            write_frame(&mut writer, packet).await.unwrap();
        }
        drop(writer);

        for expected in &packets {
            let received: Packet = read_message(&mut reader).await.unwrap().unwrap();
            assert_eq!(&received, expected);
            assert_eq!(received.kind(), expected.kind());
            assert_eq!(received.username(), expected.username());
            assert_eq!(received.payload(), expected.payload());
        }
        assert!(read_message::<_, Packet>(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_username_frame_roundtrip() {
        let (mut writer, mut reader) = tokio::io::duplex(256);
        write_frame(&mut writer, "alice").await.unwrap();

        let name: String = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(name, "alice");
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let body = serialize(&Packet::movement("alice", "DOWN")).unwrap();
        let header = (body.len() as u32).to_be_bytes();
        let mut mock = tokio_test::io::Builder::new()
            .read(&header[..2])
            .read(&header[2..])
            .read(&body[..3])
            .read(&body[3..])
            .build();

        let packet: Packet = read_message(&mut mock).await.unwrap().unwrap();
        assert_eq!(packet, Packet::movement("alice", "DOWN"));
    }

    #[tokio::test]
    async fn test_clean_eof_yields_none() {
        let mut mock = tokio_test::io::Builder::new().build();
        assert!(read_frame(&mut mock).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_inside_header_is_error() {
        let mut mock = tokio_test::io::Builder::new().read(&[0, 0]).build();
        let err = read_frame(&mut mock).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_eof_inside_body_is_error() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&[0, 0, 0, 10])
            .read(&[1, 2, 3])
            .build();
        let err = read_frame(&mut mock).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let header = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        let mut mock = tokio_test::io::Builder::new().read(&header).build();
        let err = read_frame(&mut mock).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_undecodable_body_keeps_stream_aligned() {
        let (mut writer, mut reader) = tokio::io::duplex(1024);
        // Variant index 99 does not exist in this build.
        let unknown = 99u32.to_le_bytes();
        writer.write_all(&(unknown.len() as u32).to_be_bytes()).await.unwrap();
        writer.write_all(&unknown).await.unwrap();
        write_frame(&mut writer, &Packet::heartbeat()).await.unwrap();

        let body = read_frame(&mut reader).await.unwrap().unwrap();
        assert!(decode::<Packet>(&body).is_err());

        let next: Packet = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(next, Packet::heartbeat());
    }
}
