// wave-decoder -- Streaming decoder and player for PCM wave files.
// Copyright (c) 2016 Kevin Brothaler and the riff-wave project authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Runtime configuration of the player.

use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Number of samples per channel requested from the sample reader at a time.
pub const DEFAULT_BLOCK_SIZE: usize = 64;

/// Player configuration, usually filled in from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Samples per channel in each block handed to the output line.
    pub block_size: usize,
    /// Log progress at info level.
    pub verbose: bool,
    /// Log every decoded header field.
    pub debug: bool,
    /// Decode without opening an audio device.
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            verbose: false,
            debug: false,
            dry_run: false,
        }
    }
}

impl Config {
    pub fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.verbose {
            "info"
        } else {
            "warn"
        }
    }

    /// Installs the global log subscriber. `RUST_LOG` takes precedence over
    /// the verbosity flags. If a subscriber is already set it is kept, and
    /// the failed install is logged through it at debug level.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_level()));
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        if let Err(err) = installed {
            debug!(error = %err, "keeping the log subscriber already installed");
        }
    }
}
