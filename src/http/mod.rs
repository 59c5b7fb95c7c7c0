//! Registry downloads over HTTP.

mod client;
mod status;

pub use client::HttpClient;
pub use status::{MAX_ATTEMPTS, PermanentError, RETRY_DELAY, permanent_error};
