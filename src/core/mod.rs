pub mod debounce;
pub mod fetch;
pub mod scope;
pub mod throttle;

pub use crate::domain::model::{
    FetchOutcome, FetchRequest, FetchState, HttpMethod, HttpResponse,
};
pub use crate::domain::ports::HttpTransport;
pub use crate::utils::error::Result;
pub use debounce::Debouncer;
pub use fetch::{FetchOptions, Fetcher};
pub use scope::Scope;
pub use throttle::Throttler;
