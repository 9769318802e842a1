/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Wire framing shared by both messaging patterns.
//!
//! # Wire Format
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ Frame Length (4 bytes, big-endian u32, excludes header)       │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Protocol Version (1 byte, currently 0x01)                     │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Frame Kind (1 byte)                                           │
//! │   0x01 = Push     (producer → pull endpoint)                  │
//! │   0x02 = Request  (caller → reply endpoint)                   │
//! │   0x03 = Response (reply endpoint → caller)                   │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Payload (MessagePack)                                         │
//! └───────────────────────────────────────────────────────────────┘
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

/// Protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Frame kind: fire-and-forget command pushed to a pull endpoint.
pub const FRAME_PUSH: u8 = 0x01;

/// Frame kind: call request.
pub const FRAME_REQUEST: u8 = 0x02;

/// Frame kind: call response.
pub const FRAME_RESPONSE: u8 = 0x03;

/// Frame header size: 4 bytes length + 1 byte version + 1 byte kind.
pub const HEADER_SIZE: usize = 6;

/// Maximum frame size (16 MiB hard limit).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Read a frame header, returning `(payload_length, kind)`.
async fn read_header<R>(reader: &mut R) -> Result<(u32, u8), TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let version = header[4];
    let kind = header[5];

    if version != PROTOCOL_VERSION {
        return Err(TransportError::Protocol(format!(
            "Unsupported protocol version: {version}, expected {PROTOCOL_VERSION}"
        )));
    }

    if !matches!(kind, FRAME_PUSH | FRAME_REQUEST | FRAME_RESPONSE) {
        return Err(TransportError::Protocol(format!(
            "Unknown frame kind: {kind:#04x}"
        )));
    }

    Ok((length, kind))
}

/// Read a complete frame, returning its kind and payload.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<(u8, Vec<u8>), TransportError>
where
    R: AsyncRead + Unpin,
{
    let (length, kind) = read_header(reader).await?;
    let length = length as usize;

    if length > max_size.min(MAX_FRAME_SIZE) {
        return Err(TransportError::Protocol(format!(
            "Frame size {length} exceeds maximum {}",
            max_size.min(MAX_FRAME_SIZE)
        )));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    Ok((kind, payload))
}

/// Read a frame and check that it is of the `expected` kind.
pub async fn read_frame_of<R>(
    reader: &mut R,
    expected: u8,
    max_size: usize,
) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let (kind, payload) = read_frame(reader, max_size).await?;
    if kind != expected {
        return Err(TransportError::Protocol(format!(
            "Expected frame kind {expected:#04x}, got {kind:#04x}"
        )));
    }
    Ok(payload)
}

/// Write a frame and flush it.
pub async fn write_frame<W>(writer: &mut W, kind: u8, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(TransportError::Protocol(format!(
            "Frame size {} exceeds hard limit {MAX_FRAME_SIZE}",
            payload.len()
        )));
    }
    let length: u32 = payload
        .len()
        .try_into()
        .map_err(|_| TransportError::Protocol("Payload too large for u32".to_string()))?;

    let mut header = [0u8; HEADER_SIZE];
    header[..4].copy_from_slice(&length.to_be_bytes());
    header[4] = PROTOCOL_VERSION;
    header[5] = kind;

    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
