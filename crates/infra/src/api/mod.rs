//! Recognition service transport: multipart upload, event streaming, and
//! server-side cleanup over HTTP.

pub mod client;
pub mod stream;

pub use client::RecognitionClient;
