//! Application bootstrap and lifecycle management.
//!
//! `TileServerApp` wires the dispatcher to its two sockets and owns the
//! serving loop:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      TileServerApp                        │
//! │                                                           │
//! │  TcpListener ──► axum Router ──► TileDispatcher           │
//! │                                      │        ▲           │
//! │                               enqueue│        │completion │
//! │                                      ▼        │           │
//! │                              UdpRenderChannel ◄── master  │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod bootstrap;
mod error;

pub use bootstrap::TileServerApp;
pub use error::AppError;
