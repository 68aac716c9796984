//! # OTA Relay
//!
//! Over-the-air update distribution for mobile SDK clients.
//!
//! - **Version store**: append-only, semver-ordered update records with
//!   device targeting and rollback chains
//! - **Pull**: clients poll with their current version and get the latest
//!   applicable record, a rollback target, or nothing
//! - **Push**: SSE and WebSocket subscribers receive every new record as soon
//!   as it is registered
//! - **Change trigger**: modifying a watched source file synthesizes the next
//!   patch version and broadcasts it
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ota_relay::{Config, Relay};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let relay = Relay::start(&Config::default()).await?;
//!     relay.run(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod pull;
pub mod relay;
pub mod server;
pub mod store;
pub mod sync;
pub mod synth;
pub mod telemetry;
pub mod version;
pub mod watcher;

pub use config::Config;
pub use error::{OtaError, OtaResult};
pub use relay::Relay;
pub use store::{Resolution, UpdateRecord, VersionStore};
pub use version::Version;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
