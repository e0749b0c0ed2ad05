//! Command line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use registre_core::service::PollPolicy;
use registre_provider_trackdechets::DEFAULT_ENDPOINT;

#[derive(Debug, Parser)]
#[command(
    name = "registre",
    version,
    about = "Export Trackdéchets waste registries to XLSX"
)]
pub(crate) struct Config {
    /// API token used as bearer credential
    #[arg(long, env = "TRACKDECHETS_TOKEN", hide_env_values = true)]
    pub token: String,

    /// GraphQL endpoint
    #[arg(long, env = "TRACKDECHETS_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Directory the exported files are written to
    #[arg(long, env = "REGISTRE_OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Log file (the terminal is taken by the UI)
    #[arg(long, env = "REGISTRE_LOG_FILE", default_value = "registre.log")]
    pub log_file: PathBuf,

    /// Seconds between two export status polls
    #[arg(long, default_value_t = 5)]
    pub poll_interval_secs: u64,

    /// Seconds to wait for an export before giving up
    #[arg(long, default_value_t = 180)]
    pub poll_timeout_secs: u64,
}

impl Config {
    pub(crate) fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            timeout: Duration::from_secs(self.poll_timeout_secs),
        }
    }
}
