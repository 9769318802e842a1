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

//! One-shot remote calls.
//!
//! A call opens a fresh request connection, sends a [`CallRequest`] tagged
//! with a random correlation token, waits for exactly one [`CallResponse`],
//! and closes the connection. The response is accepted only if it echoes the
//! token. Its payload is decoded as MessagePack, after inflating it first if
//! it starts with [`ZLIB_MAGIC`](crate::codec::ZLIB_MAGIC).
//!
//! There is no timeout. Wrap the future in [`tokio::time::timeout`] if the
//! peer might never answer.

use rand::distr::{Alphanumeric, SampleString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument, trace, warn};

use crate::codec::{self, Value};
use crate::config::TransportConfig;
use crate::envelope::{CallContext, CallRequest, CallResponse};
use crate::error::CallError;
use crate::transport::{Endpoint, RequestSocket};

/// Length of a correlation token.
pub const TOKEN_LENGTH: usize = 64;

/// Issues calls on behalf of one domain and user.
#[derive(Debug, Clone)]
pub struct Caller {
    domain: String,
    uid: String,
    max_frame_size: usize,
}

impl Caller {
    /// Creates a caller using the default frame limit.
    #[must_use]
    pub fn new(domain: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            uid: uid.into(),
            max_frame_size: TransportConfig::default().max_frame_size,
        }
    }

    /// Sets the largest response frame this caller will accept.
    #[must_use]
    pub const fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// The domain sent in every request context.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The user id sent in every request context.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Calls `fun` on the reply endpoint at `addr`.
    ///
    /// Use [`Value`] as `T` for an untyped result.
    ///
    /// # Errors
    ///
    /// * [`CallError::Transport`] if `addr` is invalid or the exchange fails.
    /// * [`CallError::Codec`] if the request cannot be encoded or the
    ///   response cannot be decoded as `T`.
    /// * [`CallError::SequenceMismatch`] if the response carries another token.
    /// * [`CallError::Decompression`] if a compressed payload does not inflate.
    #[instrument(level = "debug", skip(self, args), fields(domain = %self.domain))]
    pub async fn call<T>(&self, addr: &str, fun: &str, args: Vec<Value>) -> Result<T, CallError>
    where
        T: DeserializeOwned,
    {
        let endpoint: Endpoint = addr.parse()?;
        let sn = correlation_token();

        let socket = RequestSocket::connect(&endpoint, self.max_frame_size).await?;
        let request = CallRequest {
            sn: sn.clone(),
            ctx: CallContext {
                domain: self.domain.clone(),
                address: socket.local_ip().to_string(),
                uid: self.uid.clone(),
            },
            fun: fun.to_string(),
            args,
        };
        let frame = codec::encode(&request)?;

        trace!(args = request.args.len(), "Sending call request");
        let raw = socket.exchange(&frame).await?;
        trace!(bytes = raw.len(), "Call response received");

        let header: ResponseHeader = codec::decode(&raw)?;
        if header.sn.as_ref().and_then(Value::as_str) != Some(sn.as_str()) {
            warn!("Call response carried an unexpected sequence number");
            return Err(CallError::SequenceMismatch {
                expected: sn,
                received: header.received(),
            });
        }

        let response: CallResponse = codec::decode(&raw)?;

        let result = decode_payload(response.payload).await;
        debug!(ok = result.is_ok(), "Call finished");
        result
    }
}

/// Calls `fun` on the reply endpoint at `addr` as `uid` in `domain`.
///
/// Shorthand for [`Caller::new`] followed by [`Caller::call`].
pub async fn call<T>(
    domain: &str,
    addr: &str,
    uid: &str,
    fun: &str,
    args: Vec<Value>,
) -> Result<T, CallError>
where
    T: DeserializeOwned,
{
    Caller::new(domain, uid).call(addr, fun, args).await
}

/// A fresh alphanumeric token from the thread-local CSPRNG.
#[must_use]
pub fn correlation_token() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), TOKEN_LENGTH)
}

/// The token of a response, read before anything else in it is trusted.
#[derive(Deserialize)]
struct ResponseHeader {
    #[serde(default)]
    sn: Option<Value>,
}

impl ResponseHeader {
    fn received(self) -> String {
        match self.sn {
            Some(Value::String(s)) => s.into_str().unwrap_or_default(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

async fn decode_payload<T>(payload: Vec<u8>) -> Result<T, CallError>
where
    T: DeserializeOwned,
{
    let payload = if codec::is_compressed(&payload) {
        trace!(bytes = payload.len(), "Inflating compressed payload");
        codec::inflate(payload).await.map_err(CallError::Decompression)?
    } else {
        payload
    };
    Ok(codec::decode(&payload)?)
}
