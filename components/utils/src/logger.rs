// Copyright 2024 hearth
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Once;

use snafu::{ResultExt, Whatever};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// The environment variable that overrides the default filter directive.
pub const LOG_ENV: &str = "HEARTH_LOG";

/// Configuration for the storage logging.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Whether to print the logs to stdout.
    pub log_to_stdout:  bool,
    /// The default filter directive (in the sense of
    /// [tracing_subscriber::filter::EnvFilter]) to use for logs. Will be
    /// overridden by the `HEARTH_LOG` environment variable if set.
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_to_stdout:  true,
            default_filter: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn init_tracing_subscriber(self) -> Result<(), Whatever> {
        let env_filter = create_env_filter(&self.default_filter);
        // Don't create the subscribers if we'll never emit any logs
        if env_filter.max_level_hint() == Some(LevelFilter::OFF) {
            return Ok(());
        }
        let console_layer = if self.log_to_stdout {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_ansi(supports_color::on(supports_color::Stream::Stdout).is_some())
                .with_filter(create_env_filter(&self.default_filter));
            Some(fmt_layer)
        } else {
            None
        };

        tracing_subscriber::registry()
            .with(console_layer)
            .try_init()
            .whatever_context("failed to install the tracing subscriber")?;
        Ok(())
    }
}

/// Create the filter from the HEARTH_LOG environment variable or the
/// default directive if that variable is unset. [EnvFilter] isn't [Clone],
/// so every [Layer] builds its own.
fn create_env_filter(filter: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(filter))
}

static INSTALL_FMT_LOG: Once = Once::new();

/// Installs a debug level fmt logger once per process, used by tests.
pub fn install_fmt_log() {
    INSTALL_FMT_LOG.call_once(|| {
        let config = LoggingConfig {
            log_to_stdout:  true,
            default_filter: "debug".to_string(),
        };
        // another test harness may already own the global subscriber.
        let _ = config.init_tracing_subscriber();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_twice() {
        install_fmt_log();
        install_fmt_log();
        tracing::debug!("logger installed");
    }

    #[test]
    fn off_filter_installs_nothing() {
        let config = LoggingConfig {
            log_to_stdout:  true,
            default_filter: "off".to_string(),
        };
        if std::env::var(LOG_ENV).is_err() {
            assert!(config.init_tracing_subscriber().is_ok());
        }
    }
}
