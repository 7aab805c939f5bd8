pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use crate::config::CliConfig;

pub use crate::adapters::ReqwestTransport;
pub use crate::config::FetchKitConfig;
pub use crate::core::{
    Debouncer, FetchOptions, FetchOutcome, FetchRequest, FetchState, Fetcher, HttpMethod,
    HttpResponse, HttpTransport, Scope, Throttler,
};
pub use crate::utils::error::{FetchError, Result};
