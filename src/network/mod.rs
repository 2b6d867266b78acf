pub mod cache;
pub mod client;
#[cfg(test)]
pub mod fake;
pub mod types;

pub use cache::RequestKey;
pub use client::{Fetcher, HttpFetcher};
pub use types::{Destination, Method, Request, RequestMode, Response};
