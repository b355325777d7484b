//! Length-prefixed message framing
//!
//! Every message on a stream is `[4 bytes little-endian length][payload]`.
//! The payload is one bincode-encoded protocol message.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Errors that can occur during message framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {0} bytes (max {1})")]
    MessageTooLarge(usize, usize),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Read one framed message, rejecting payloads larger than `max_size`
pub async fn read_message<R: AsyncRead + Unpin>(stream: &mut R, max_size: usize) -> Result<Vec<u8>, FramingError> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(FramingError::ConnectionClosed);
        }
        Err(e) => return Err(FramingError::Io(e)),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max_size {
        return Err(FramingError::MessageTooLarge(len, max_size));
    }
    if len == 0 {
        return Ok(Vec::new());
    }

    let mut buf = vec![0u8; len];
    match stream.read_exact(&mut buf).await {
        Ok(_) => Ok(buf),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FramingError::ConnectionClosed),
        Err(e) => Err(FramingError::Io(e)),
    }
}

/// Prefix `data` with its length
pub fn frame(data: &[u8], max_size: usize) -> Result<Vec<u8>, FramingError> {
    if data.len() > max_size {
        return Err(FramingError::MessageTooLarge(data.len(), max_size));
    }
    let mut framed = Vec::with_capacity(4 + data.len());
    framed.extend_from_slice(&(data.len() as u32).to_le_bytes());
    framed.extend_from_slice(data);
    Ok(framed)
}

/// Write one framed message and flush
pub async fn write_message<W: AsyncWrite + Unpin>(
    stream: &mut W,
    data: &[u8],
    max_size: usize,
) -> Result<(), FramingError> {
    let framed = frame(data, max_size)?;
    stream.write_all(&framed).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const MAX: usize = 1024;

    #[tokio::test]
    async fn test_read_write_message() {
        let data = b"Hello, World!";
        let mut buffer = Vec::new();

        write_message(&mut buffer, data, MAX).await.unwrap();

        let mut cursor = Cursor::new(buffer);
        let result = read_message(&mut cursor, MAX).await.unwrap();
        assert_eq!(result, data);
    }

    #[tokio::test]
    async fn test_empty_message() {
        let mut buffer = Vec::new();
        write_message(&mut buffer, b"", MAX).await.unwrap();

        let mut cursor = Cursor::new(buffer);
        assert!(read_message(&mut cursor, MAX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_message_too_large() {
        let large_data = vec![0u8; MAX + 1];
        let mut buffer = Vec::new();

        let result = write_message(&mut buffer, &large_data, MAX).await;
        assert!(matches!(result, Err(FramingError::MessageTooLarge(_, _))));
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_rejected() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&((MAX as u32) + 1).to_le_bytes());

        let mut cursor = Cursor::new(buffer);
        let result = read_message(&mut cursor, MAX).await;
        assert!(matches!(result, Err(FramingError::MessageTooLarge(len, MAX)) if len == MAX + 1));
    }

    #[tokio::test]
    async fn test_read_truncated_length() {
        let mut cursor = Cursor::new(vec![0u8; 2]);
        let result = read_message(&mut cursor, MAX).await;
        assert!(matches!(result, Err(FramingError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_read_truncated_payload() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&10u32.to_le_bytes());
        buffer.extend_from_slice(&[1, 2, 3]);

        let mut cursor = Cursor::new(buffer);
        let result = read_message(&mut cursor, MAX).await;
        assert!(matches!(result, Err(FramingError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_read_split_across_segments() {
        let mut stream = tokio_test::io::Builder::new()
            .read(&5u32.to_le_bytes()[..2])
            .read(&5u32.to_le_bytes()[2..])
            .read(b"ab")
            .read(b"cde")
            .build();
        assert_eq!(read_message(&mut stream, MAX).await.unwrap(), b"abcde");
    }

    #[tokio::test]
    async fn test_write_goes_out_as_one_frame() {
        let mut expected = 3u32.to_le_bytes().to_vec();
        expected.extend_from_slice(b"xyz");
        let mut stream = tokio_test::io::Builder::new().write(&expected).build();
        write_message(&mut stream, b"xyz", MAX).await.unwrap();
    }

    #[tokio::test]
    async fn test_multiple_messages() {
        let messages = vec![
            b"First message".to_vec(),
            b"Second".to_vec(),
            b"Third message here".to_vec(),
        ];

        let mut buffer = Vec::new();
        for msg in &messages {
            buffer.extend(frame(msg, MAX).unwrap());
        }

        let mut cursor = Cursor::new(buffer);
        for expected in &messages {
            let result = read_message(&mut cursor, MAX).await.unwrap();
            assert_eq!(&result, expected);
        }
    }
}
