//! # Ferrolink
//!
//! Client for the ferrolink remote operations protocol: encrypted,
//! chunked file transfer and remote module loading and execution over
//! a single TCP connection.
//!
//! ```no_run
//! use ferrolink::{Client, ClientConfig};
//!
//! # async fn example() -> Result<(), ferrolink::ClientError> {
//! let mut client = Client::connect(ClientConfig::new("127.0.0.1:4815".parse().unwrap())).await?;
//! client.put("report.bin".as_ref(), "store/report.bin").await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Connection management and protocol operations
pub mod client;

/// Client error types
pub mod error;

pub use client::{Client, ClientConfig};
pub use error::ClientError;
