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

//! MessagePack encoding for everything that crosses a socket.
//!
//! Packets, call requests and call responses all use the same scheme. Structs
//! are written as maps keyed by field name so that peers in other languages
//! can read them as plain objects. Response payloads may additionally be
//! zlib-compressed; see [`is_compressed`].

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::spawn_blocking;

use crate::error::CodecError;

/// Dynamically typed value carried in argument lists and results.
pub use rmpv::Value;

/// Leading bytes of a zlib stream written with the default compression level.
pub const ZLIB_MAGIC: [u8; 2] = [0x78, 0x9c];

/// Encode a value as MessagePack.
pub fn encode<T>(value: &T) -> Result<Vec<u8>, CodecError>
where
    T: Serialize + ?Sized,
{
    rmp_serde::to_vec_named(value).map_err(CodecError::from)
}

/// Decode a MessagePack value.
pub fn decode<T>(bytes: &[u8]) -> Result<T, CodecError>
where
    T: DeserializeOwned,
{
    rmp_serde::from_slice(bytes).map_err(CodecError::from)
}

/// Returns `true` if `payload` starts with [`ZLIB_MAGIC`].
#[must_use]
pub fn is_compressed(payload: &[u8]) -> bool {
    payload.starts_with(&ZLIB_MAGIC)
}

/// Inflate a zlib stream on the blocking pool.
pub async fn inflate(payload: Vec<u8>) -> io::Result<Vec<u8>> {
    spawn_blocking(move || inflate_sync(&payload)).await?
}

/// Compress bytes into a zlib stream on the blocking pool.
///
/// The output always starts with [`ZLIB_MAGIC`].
pub async fn deflate(payload: Vec<u8>) -> io::Result<Vec<u8>> {
    spawn_blocking(move || deflate_sync(&payload)).await?
}

fn inflate_sync(payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(payload);
    let mut out = Vec::with_capacity(payload.len() * 2);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn deflate_sync(payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(payload.len()), Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()
}
