//! Length-prefixed packet framing.
//!
//! ```text
//! [length:4 big-endian][session_tag:16][packet:length-16]
//! ```
//!
//! `length` covers the session tag and the packet. Valid lengths span one
//! payload byte up to a full packet plus a small margin; anything outside
//! that range is rejected before allocation, so a hostile length prefix
//! cannot drive memory use.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use anemochory_types::{SessionTag, PACKET_SIZE, SESSION_TAG_SIZE};

use crate::{Result, TransportError};

/// Smallest valid frame length: a session tag plus one payload byte.
pub const MIN_FRAME_LEN: usize = SESSION_TAG_SIZE + 1;

/// Largest valid frame length: a session tag, a full packet, and margin.
pub const MAX_FRAME_LEN: usize = SESSION_TAG_SIZE + PACKET_SIZE + 64;

/// Serialize a frame.
pub fn frame_packet(packet: &[u8], session_tag: &SessionTag) -> Vec<u8> {
    let length = (SESSION_TAG_SIZE + packet.len()) as u32;
    let mut frame = Vec::with_capacity(4 + SESSION_TAG_SIZE + packet.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(session_tag);
    frame.extend_from_slice(packet);
    frame
}

/// Read one frame from a stream.
///
/// # Errors
///
/// - [`TransportError::ConnectionClosed`] on EOF at a frame boundary
/// - [`TransportError::FramingError`] for out-of-range lengths or EOF
///   mid-frame
pub async fn read_frame<S>(stream: &mut S) -> Result<(SessionTag, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut length_buf = [0u8; 4];
    match stream.read_exact(&mut length_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(TransportError::ConnectionClosed);
        }
        Err(e) => return Err(TransportError::FramingError(e.to_string())),
    }

    let length = u32::from_be_bytes(length_buf) as usize;
    if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&length) {
        return Err(TransportError::FramingError(format!(
            "frame length {length} outside [{MIN_FRAME_LEN}, {MAX_FRAME_LEN}]"
        )));
    }

    let mut body = vec![0u8; length];
    stream
        .read_exact(&mut body)
        .await
        .map_err(|e| TransportError::FramingError(e.to_string()))?;

    let mut session_tag = [0u8; SESSION_TAG_SIZE];
    session_tag.copy_from_slice(&body[..SESSION_TAG_SIZE]);
    let packet = body.split_off(SESSION_TAG_SIZE);

    Ok((session_tag, packet))
}

/// Write one frame to a stream.
///
/// # Errors
///
/// Returns [`TransportError::WriteFailed`] on any I/O failure.
pub async fn write_frame<S>(stream: &mut S, packet: &[u8], session_tag: &SessionTag) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let frame = frame_packet(packet, session_tag);
    stream
        .write_all(&frame)
        .await
        .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
    stream
        .flush()
        .await
        .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
    Ok(())
}
