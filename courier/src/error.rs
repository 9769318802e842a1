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

//! Error types for every layer of the substrate.
//!
//! Each concern gets its own enum so callers can match on what actually went
//! wrong. All of them expose a stable, machine-readable [`code`](CallError::code)
//! alongside their human-readable `Display` output.

use std::fmt;
use std::io;

/// Errors produced by handlers.
///
/// Handlers are written by the embedding application, so any error type that
/// converts into [`anyhow::Error`] is accepted.
pub type HandlerError = anyhow::Error;

/// Errors raised while encoding or decoding envelopes.
#[derive(Debug, Clone)]
pub enum CodecError {
    /// The value could not be encoded.
    Encode(String),
    /// The bytes are not a valid encoding of the expected shape.
    Decode(String),
}

impl CodecError {
    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Encode(_) => "ENCODE_ERROR",
            Self::Decode(_) => "DECODE_ERROR",
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "Encoding failed: {e}"),
            Self::Decode(e) => write!(f, "Decoding failed: {e}"),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<rmp_serde::encode::Error> for CodecError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for CodecError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Errors raised by the socket transports.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// The address is not a supported `tcp://` or `ipc://` endpoint.
    InvalidAddress(String),
    /// The peer closed the connection before a complete frame arrived.
    ConnectionClosed,
    /// The peer sent something that is not a valid frame.
    Protocol(String),
    /// Socket or filesystem failure.
    Io(String),
}

impl TransportError {
    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) => "INVALID_ADDRESS",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress(a) => write!(f, "Invalid address: {a}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Protocol(e) => write!(f, "Protocol error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::ConnectionClosed
        } else {
            Self::Io(err.to_string())
        }
    }
}

/// Errors raised while leasing per-dispatch resources.
#[derive(Debug, Clone)]
pub enum ResourceError {
    /// The database pool could not hand out a connection.
    Database(String),
    /// A cache connection could not be opened.
    Cache(String),
}

impl ResourceError {
    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_UNAVAILABLE",
            Self::Cache(_) => "CACHE_UNAVAILABLE",
        }
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database(e) => write!(f, "Database connection error: {e}"),
            Self::Cache(e) => write!(f, "Cache connection error: {e}"),
        }
    }
}

impl std::error::Error for ResourceError {}

/// Ways a remote call can fail.
#[derive(Debug)]
pub enum CallError {
    /// The request could not be delivered or the response could not be read.
    Transport(TransportError),
    /// The request could not be encoded, or the response could not be decoded.
    Codec(CodecError),
    /// The response carried a correlation token other than the one sent.
    SequenceMismatch {
        /// Token generated for this call.
        expected: String,
        /// Token found in the response.
        received: String,
    },
    /// The payload carried the zlib magic but did not inflate.
    Decompression(io::Error),
}

impl CallError {
    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Transport(e) => e.code(),
            Self::Codec(e) => e.code(),
            Self::SequenceMismatch { .. } => "SEQUENCE_MISMATCH",
            Self::Decompression(_) => "DECOMPRESSION_ERROR",
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{e}"),
            Self::Codec(e) => write!(f, "{e}"),
            Self::SequenceMismatch { .. } => write!(f, "Invalid calling sequence number"),
            Self::Decompression(e) => write!(f, "Decompression failed: {e}"),
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::SequenceMismatch { .. } => None,
            Self::Decompression(e) => Some(e),
        }
    }
}

impl From<TransportError> for CallError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl From<CodecError> for CallError {
    fn from(err: CodecError) -> Self {
        Self::Codec(err)
    }
}

/// Errors raised while reading configuration.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// The file could not be read.
    Io(String),
    /// The file is not valid TOML for [`CourierConfig`](crate::config::CourierConfig).
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Failed to read configuration: {e}"),
            Self::Parse(e) => write!(f, "Failed to parse configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
