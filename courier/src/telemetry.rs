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

//! Global tracing subscriber setup for binaries embedding the dispatcher.

use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Installs the global subscriber described by `config`.
///
/// `RUST_LOG` overrides [`LoggingConfig::level`]. Events always go to stdout
/// and, when [`LoggingConfig::directory`] is set, to a daily-rolling file as
/// well. Keep the returned guard alive for as long as file logging should
/// flush. If a global subscriber is already installed this leaves it in place.
#[must_use]
pub fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut file_error = None;
    let (file_layer, guard) = match &config.directory {
        Some(directory) => match RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(&config.file_prefix)
            .build(directory)
        {
            Ok(appender) => {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer().with_writer(writer).with_ansi(false);
                (Some(layer), Some(guard))
            }
            Err(e) => {
                file_error = Some(format!("{}: {}", directory.display(), e));
                (None, None)
            }
        },
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .with(file_layer)
        .try_init();

    if installed.is_err() {
        debug!("Global tracing subscriber already installed");
    }
    if let Some(e) = file_error {
        warn!("File logging disabled, could not open log directory {}", e);
    }
    guard
}
