//! Tirex tile server.
//!
//! Serves map tiles over HTTP out of a Tirex metatile cache. On a cache miss
//! the server asks the Tirex master to render the containing bundle, parks
//! the request, and answers it once the render completion arrives. Misses
//! for the same bundle share one render request.
//!
//! # Modules
//!
//! - [`coord`] - tile and bundle addressing, bundle paths
//! - [`metatile`] - bundle file format
//! - [`protocol`] - Tirex control messages
//! - [`waiters`] - registry of requests waiting for a render
//! - [`dispatcher`] - cache lookup and render dispatch
//! - [`render`] - transport to the Tirex master
//! - [`http`] - HTTP routes
//! - [`app`] - bootstrap and lifecycle

pub mod app;
pub mod config;
pub mod coord;
pub mod dispatcher;
pub mod http;
pub mod logging;
pub mod metatile;
pub mod protocol;
pub mod render;
pub mod response;
pub mod stats;
pub mod waiters;

/// Version of the tileserver library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
