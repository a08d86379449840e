//! Aerotile - geographic tile acquisition for moving observers
//!
//! This library keeps a ring of elevation and vector map tiles resident
//! around an observer moving across the Web Mercator plane, loading new
//! tiles as the observer crosses tile boundaries and evicting tiles that
//! fall behind.
//!
//! # High-Level API
//!
//! For most use cases, the [`service`] module provides a facade over the
//! whole pipeline:
//!
//! ```ignore
//! use aerotile::config::AerotileConfig;
//! use aerotile::coord::MercatorPos;
//! use aerotile::ring::TileEvent;
//! use aerotile::service::AerotileService;
//!
//! let mut service = AerotileService::start(AerotileConfig::default())?;
//! let mut elevation = service.elevation_events().unwrap();
//!
//! service.update_position(MercatorPos::new(1_200_000.0, 6_000_000.0)).await;
//! while let Some(event) = elevation.recv().await {
//!     match event {
//!         TileEvent::Added { key, tile } => { /* add terrain patch */ }
//!         TileEvent::Removed { key } => { /* drop terrain patch */ }
//!     }
//! }
//! ```
//!
//! The individual layers (coordinate math, fetchers, retry, store,
//! scheduler, ring manager) are public for callers that need finer
//! control.

pub mod config;
pub mod coord;
pub mod fetch;
pub mod logging;
pub mod oracle;
pub mod provider;
pub mod ring;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod tile;

/// Version of the aerotile library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
