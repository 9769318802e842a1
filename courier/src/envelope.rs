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

//! Envelope types exchanged over the push/pull queue and the request/reply pair.

use serde::{Deserialize, Serialize};

use crate::codec::Value;

/// A command pushed onto the dispatcher's queue.
///
/// # Wire Format
///
/// ```text
/// { "cmd": "user.create", "args": ["alice", 42] }
/// ```
///
/// `args` may be missing or `nil`; both mean "no positional arguments".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPacket {
    /// Name of the registered command to run.
    pub cmd: String,

    /// Positional arguments passed to the handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
}

impl CommandPacket {
    /// Creates a packet with no arguments.
    #[must_use]
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            args: None,
        }
    }

    /// Creates a packet carrying positional arguments.
    #[must_use]
    pub fn with_args(cmd: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            cmd: cmd.into(),
            args: Some(args),
        }
    }

    /// Consumes the packet, returning its arguments (empty if absent).
    #[must_use]
    pub fn into_args(self) -> Vec<Value> {
        self.args.unwrap_or_default()
    }
}

/// Caller context attached to every call request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    /// Logical domain the caller belongs to.
    pub domain: String,

    /// Network address of the calling host.
    #[serde(rename = "ip")]
    pub address: String,

    /// Identity of the user on whose behalf the call is made.
    pub uid: String,
}

/// Request half of a call exchange.
///
/// ```text
/// { "sn": "<token>", "ctx": { "domain": .., "ip": .., "uid": .. }, "fun": "getUser", "args": [..] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Correlation token, unique to this call.
    pub sn: String,
    /// Caller context.
    pub ctx: CallContext,
    /// Remote function name.
    pub fun: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Response half of a call exchange.
///
/// `payload` is an encoded [`Value`], optionally zlib-compressed (see
/// [`codec::is_compressed`](crate::codec::is_compressed)).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResponse {
    /// Correlation token copied from the request.
    pub sn: String,
    /// Encoded result.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl CallResponse {
    /// Creates a response for the request identified by `sn`.
    #[must_use]
    pub fn new(sn: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            sn: sn.into(),
            payload,
        }
    }
}
