//! Primitives that move an exact number of bytes over a stream.
//!
//! Socket error codes are only ever observed here, every layer above
//! sees a connection that failed mid-operation as a single error kind.

use std::{num::NonZeroUsize, slice::Chunks};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("connection failed after receiving {} of {expected} bytes", .partial.len())]
    ShortRead { expected: usize, partial: Vec<u8> },

    #[error("connection failed after sending {sent} of {expected} bytes")]
    ShortWrite { expected: usize, sent: usize },
}

/// Receives exactly `n` bytes from the connection
///
/// keeps issuing reads until the whole buffer is filled. if the peer closes
/// the connection, or the read fails, the bytes collected so far are handed
/// back inside the error.
pub async fn recv_exact<R>(n: usize, conn: &mut R) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buffer = vec![0u8; n];
    let mut received = 0;

    while received < n {
        match conn.read(&mut buffer[received..]).await {
            Ok(0) => break,
            Ok(rcount) => received += rcount,
            Err(err) => {
                tracing::debug!("read failed after {} bytes: {}", received, err);
                break;
            }
        }
    }

    if received < n {
        buffer.truncate(received);
        return Err(TransportError::ShortRead {
            expected: n,
            partial: buffer,
        });
    }

    Ok(buffer)
}

/// Sends every byte of `bytes` through the connection
///
/// returns the number of bytes that made it through when the connection fails.
pub async fn send_all<W>(bytes: &[u8], conn: &mut W) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut sent = 0;

    while sent < bytes.len() {
        match conn.write(&bytes[sent..]).await {
            Ok(0) => break,
            Ok(wcount) => sent += wcount,
            Err(err) => {
                tracing::debug!("write failed after {} bytes: {}", sent, err);
                break;
            }
        }
    }

    // a write may sit in a userspace buffer, it only counts once it was flushed
    if sent == bytes.len() && conn.flush().await.is_ok() {
        return Ok(());
    }

    Err(TransportError::ShortWrite {
        expected: bytes.len(),
        sent,
    })
}

/// Splits a message into contiguous chunks of at most `max_size` bytes
///
/// the returned iterator is lazy and can be cloned to restart it.
pub fn split_into_chunks(bytes: &[u8], max_size: NonZeroUsize) -> Chunks<'_, u8> {
    bytes.chunks(max_size.get())
}

/// Sends a message chunk by chunk, none of them bigger than `max_size`
pub async fn send_chunked<W>(
    bytes: &[u8],
    max_size: NonZeroUsize,
    conn: &mut W,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut sent = 0;
    for chunk in split_into_chunks(bytes, max_size) {
        if let Err(TransportError::ShortWrite {
            sent: chunk_sent, ..
        }) = send_all(chunk, conn).await
        {
            return Err(TransportError::ShortWrite {
                expected: bytes.len(),
                sent: sent + chunk_sent,
            });
        }
        sent += chunk.len();
    }

    Ok(())
}
