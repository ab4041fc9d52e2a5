//! Pull client for the Docker registry HTTP API v2.
//!
//! Retrieves image manifests and downloads filesystem layer
//! blobs, negotiating the bearer token dance and following
//! redirects to content backends on the way.

mod error;
pub mod v2;

pub use error::Error;
