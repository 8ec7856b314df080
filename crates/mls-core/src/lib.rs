pub mod chunk;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod state;
pub mod ticket;
pub mod upload;

mod monitor;
mod producer;
mod receiver;
mod sender;

#[cfg(test)]
mod tests;

pub use chunk::{checksum_bytes, Chunk, FileMeta};
pub use client::MlsClient;
pub use config::UploadConfig;
pub use error::{Error, Result};
pub use iroh::EndpointAddr;
pub use state::Phase;
pub use ticket::ServerTicket;
pub use tokio_util::sync::CancellationToken;
pub use upload::{run_upload, upload_stream, UploadProgress, UploadReport};
