//! Runtime initialization and lifecycle management.
//!
//! One builder assembles every component in dependency order and starts
//! the background tasks; one runtime value owns them and shuts them down
//! together. Embedders that only want the fetch pipeline can build with
//! the background tasks disabled and use [`SpyglassRuntime::service`]
//! directly.
//!
//! # Example
//!
//! ```no_run
//! use spyglass_core::{config::AppConfig, runtime::SpyglassRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     let runtime = SpyglassRuntime::builder().with_config(config).build()?;
//!
//!     let service = runtime.service().clone();
//!     // ... serve requests through `service` ...
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod lifecycle;

pub use builder::{RuntimeError, SpyglassRuntimeBuilder};
pub use lifecycle::SpyglassRuntime;
