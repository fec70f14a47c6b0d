//! Client-side core of a Placement Driver (PD) access library.
//!
//! Hides leader discovery and connection multiplexing behind [`PdClient`],
//! and batches concurrent timestamp requests onto a single bidirectional
//! streaming RPC through [`PdClient::get_ts`] / [`PdClient::get_ts_async`].
//!
//! ## Usage
//!
//! ```ignore
//! use pd_client::{PdClient, PdClientConfig};
//!
//! # async fn run() -> pd_client::Result<()> {
//! let client = PdClient::new(
//!     vec!["127.0.0.1:2379".to_string()],
//!     PdClientConfig::default(),
//! )
//! .await?;
//!
//! let (physical, logical) = client.get_ts().await?;
//! println!("allocated timestamp ({physical}, {logical})");
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

mod builder;
mod client;
mod config;
mod error;
mod leader;
mod registry;
mod retry;
mod tso;

pub use builder::PdClientBuilder;
pub use client::PdClient;
pub use config::{PdClientConfig, TlsOptions};
pub use error::{Error, Result};
pub use tokio_util::sync::CancellationToken;
pub use tso::TsoRequestFuture;

pub use pd_client_proto::{OperatorStatus, Peer, Region, RegionEpoch, Store, StoreState};
