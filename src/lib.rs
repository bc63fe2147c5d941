pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
mod framer;
pub mod pipeline;
pub mod pool;
pub mod transaction;

pub use client::Client;
pub use commands::{Commands, SetOptions};
pub use config::Config;
pub use connection::{Connection, Event, State};
pub use error::Error;
pub use frame::Frame;
pub use pipeline::Pipeline;
pub use pool::{Pool, PoolEvent};
pub use transaction::Transaction;

pub type Result<T> = std::result::Result<T, Error>;

/// Connects a single-connection client.
pub async fn create_client(config: Config) -> Result<Client> {
    Client::connect(config).await
}

/// Connects a pool of `size` connections, ready as soon as one is up.
pub async fn create_pool(config: Config, size: usize) -> Result<Pool> {
    Pool::connect(config, size).await
}
