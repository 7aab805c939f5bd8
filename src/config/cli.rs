use crate::config::toml_config::FetchKitConfig;
use crate::domain::model::HttpMethod;
use crate::utils::error::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "fetchkit")]
#[command(about = "Race-safe HTTP fetching with debounce and throttle helpers")]
pub struct CliConfig {
    #[arg(long, global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Fetch a URL with GET and print the JSON body
    Get { url: String },

    /// Send a request with a JSON body; mutating methods carry an idempotency key
    Send {
        url: String,

        #[arg(long, default_value = "POST")]
        method: HttpMethod,

        #[arg(long, help = "JSON request body")]
        data: Option<String>,

        #[arg(long, help = "Reuse a specific idempotency key")]
        idempotency_key: Option<String>,
    },

    /// Read queries from stdin, debounce them, and fetch the latest one
    Watch {
        url: String,

        #[arg(long, default_value = "q")]
        param: String,

        #[arg(long, help = "Override the debounce delay in milliseconds")]
        debounce_ms: Option<u64>,
    },
}

impl CliConfig {
    /// Loads the file configuration and applies command-line overrides.
    pub fn load_config(&self) -> Result<FetchKitConfig> {
        let mut config = match &self.config {
            Some(path) => FetchKitConfig::from_file(path)?,
            None => FetchKitConfig::default(),
        };

        config.logging.verbose |= self.verbose;
        config.logging.json |= self.json_logs;

        if let Command::Watch {
            debounce_ms: Some(ms),
            ..
        } = &self.command
        {
            config.debounce.delay_ms = *ms;
        }

        Ok(config)
    }
}
