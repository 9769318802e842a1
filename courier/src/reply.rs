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

//! The answering side of [`call`](crate::call).
//!
//! A [`ReplyServer`] accepts request connections, decodes one
//! [`CallRequest`] from each, asks a [`ReplyHandler`] for the result, and
//! answers with a [`CallResponse`] echoing the request's token. Encoded
//! results larger than the compression threshold are zlib-compressed; callers
//! detect this from the payload's leading bytes.
//!
//! A request that cannot be read or decoded, or whose handler fails, is logged
//! and its connection dropped without a response.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Instrument};

use crate::codec::{self, Value};
use crate::envelope::{CallContext, CallRequest, CallResponse};
use crate::error::{HandlerError, TransportError};
use crate::transport::{Endpoint, ReplyExchange, ReplySocket};

/// Encoded results above this many bytes are compressed by default.
pub const DEFAULT_COMPRESS_THRESHOLD: usize = 1024;

/// Computes the result of a remote call.
#[async_trait]
pub trait ReplyHandler: Send + Sync + 'static {
    /// Answer `fun` invoked with `args` by the caller described in `ctx`.
    async fn reply(&self, ctx: &CallContext, fun: &str, args: Vec<Value>) -> Result<Value, HandlerError>;
}

/// Serves call requests on a bound reply endpoint.
pub struct ReplyServer {
    socket: ReplySocket,
    compress_threshold: usize,
}

impl std::fmt::Debug for ReplyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyServer")
            .field("endpoint", self.socket.endpoint())
            .field("compress_threshold", &self.compress_threshold)
            .finish()
    }
}

impl ReplyServer {
    /// Binds `endpoint`. Port `0` picks a free TCP port; see
    /// [`endpoint`](Self::endpoint) for the result.
    pub async fn bind(endpoint: &Endpoint, max_frame_size: usize) -> Result<Self, TransportError> {
        Ok(Self {
            socket: ReplySocket::bind(endpoint, max_frame_size).await?,
            compress_threshold: DEFAULT_COMPRESS_THRESHOLD,
        })
    }

    /// Compress encoded results larger than `threshold` bytes.
    #[must_use]
    pub const fn compress_above(mut self, threshold: usize) -> Self {
        self.compress_threshold = threshold;
        self
    }

    /// The endpoint this server is bound to.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        self.socket.endpoint()
    }

    /// Answers requests until `cancel_token` is cancelled.
    ///
    /// Every accepted connection is answered on its own task.
    pub async fn serve<H>(self, handler: Arc<H>, cancel_token: CancellationToken)
    where
        H: ReplyHandler + ?Sized,
    {
        info!("Reply server listening on {}", self.socket.endpoint());

        loop {
            tokio::select! {
                biased;

                () = cancel_token.cancelled() => {
                    info!("Reply server received shutdown signal");
                    break;
                }

                accepted = self.socket.accept() => {
                    match accepted {
                        Ok(exchange) => {
                            let handler = Arc::clone(&handler);
                            let threshold = self.compress_threshold;
                            tokio::spawn(
                                async move {
                                    if let Err(e) = answer(exchange, handler.as_ref(), threshold).await {
                                        error!("Call dropped: {:#}", e);
                                    }
                                }
                                .in_current_span(),
                            );
                        }
                        Err(e) => {
                            warn!("Failed to accept call connection: {}", e);
                        }
                    }
                }
            }
        }

        info!("Reply server shut down");
    }
}

async fn answer<H>(mut exchange: ReplyExchange, handler: &H, threshold: usize) -> anyhow::Result<()>
where
    H: ReplyHandler + ?Sized,
{
    let raw = exchange.request().await.context("Failed to read call request")?;
    let request: CallRequest = codec::decode(&raw).context("Malformed call request")?;
    trace!(fun = %request.fun, domain = %request.ctx.domain, "Call request received");

    let value = handler
        .reply(&request.ctx, &request.fun, request.args)
        .await
        .with_context(|| format!("Handler for '{}' failed", request.fun))?;

    let mut payload = codec::encode(&value).context("Failed to encode call result")?;
    if payload.len() > threshold {
        let original = payload.len();
        payload = codec::deflate(payload).await.context("Failed to compress call result")?;
        debug!(original, compressed = payload.len(), "Compressed call result");
    }

    let response = codec::encode(&CallResponse::new(request.sn, payload))
        .context("Failed to encode call response")?;
    exchange.reply(&response).await.context("Failed to send call response")?;
    Ok(())
}
