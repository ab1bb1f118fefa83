//! Shared HTTP plumbing for the recognition service adapters.

pub mod client;

pub use client::{HttpClient, HttpClientBuilder};
