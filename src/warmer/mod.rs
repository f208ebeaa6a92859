//! Cache warming: local runs and remote warmer dispatch
//!
//! - [`local`] - fetches entry points directly and records successful requests
//! - [`chunks`] - groups recorded requests into chunk jobs per domain
//! - [`executor`] - sends a chunk to every remote server in use and logs results
//! - [`client`] / [`response`] - the remote warmer protocol
//! - [`headers`] - ordered request header lists and their wire form

pub mod chunks;
pub mod client;
pub mod error;
pub mod executor;
pub mod headers;
pub mod local;
pub mod response;

pub use chunks::{create_chunks, record_request_args, Chunk, WarmRequestArgs, CHUNK_SIZE};
pub use client::{server_code, RemoteWarmerClient, ServerResponse};
pub use error::{WarmerError, WarmerResult};
pub use executor::{ChunkExecutor, ChunkSummary, EXTERNAL_BATCH_ID};
pub use headers::HeaderList;
pub use local::{request_stop, LocalRunSummary, LocalWarmer};
pub use response::{WarmResult, WarmStatus};
