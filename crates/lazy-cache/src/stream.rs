//! Chunked stream copy with progress reporting.

use crate::types::ProgressCallback;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of each chunk read by [`copy_with_progress`].
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Read until `buf` is full or the reader is exhausted.
///
/// Returns the number of bytes read; 0 means end of stream.
pub async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Copy `reader` into `writer` in [`CHUNK_SIZE`] chunks.
///
/// `progress` sees each chunk's length before the chunk is written. The
/// final empty read ends the copy without a callback. Returns the total
/// number of bytes copied.
pub async fn copy_with_progress<R, W>(
    reader: &mut R,
    writer: &mut W,
    progress: &ProgressCallback<'_>,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = read_chunk(reader, &mut buf).await?;
        if n == 0 {
            break;
        }
        progress(n as u64);
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    writer.flush().await?;
    Ok(total)
}
