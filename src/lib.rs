//! # Red Giant Protocol - exposure-based data transport
//!
//! Instead of pushing packets at a receiver, a sender publishes a fixed
//! set of immutable, numbered chunks onto an *exposure surface*; any
//! number of receivers pull chunks in any order until the terminal red
//! flag is raised. Visibility is per-chunk and atomic: a reader that
//! observes a chunk as exposed is guaranteed to see its bytes fully
//! written, with no locks on the read path.
//!
//! ## Quick Start
//!
//! ```rust
//! use red_giant::{Manifest, Surface};
//!
//! let payload = b"Red Giant Protocol";
//! let manifest = Manifest::new("demo", payload.len() as u64, 1024)?;
//! let (exposer, surface) = Surface::create(manifest)?;
//!
//! exposer.expose(0, payload)?;
//! exposer.raise_completion();
//!
//! assert!(surface.is_complete());
//! assert_eq!(surface.peek(0)?.bytes(), payload);
//! # Ok::<(), red_giant::RgError>(())
//! ```
//!
//! ## Features
//!
//! - **Lock-free visibility**: per-chunk acquire/release flags; readers
//!   never block writers
//! - **Adaptive orchestration**: a bounded worker pool partitions the
//!   source and re-tunes chunk size, cadence and worker count from live
//!   traffic telemetry
//! - **AIMD rate control**: a TCP-style congestion window turns RTT and
//!   loss samples into an exposure-rate ceiling
//! - **Self-healing receivers**: dropped or duplicated notifications are
//!   benign; a completion sweep recovers anything missed
//! - **Content-aware ingestion**: the HTTP service picks chunking,
//!   compression and worker strategy per payload
//!
//! ## Architecture
//!
//! Data flows source buffer -> orchestrator partitions -> surface chunks
//! -> notification bus -> receiver workers -> assembled output. Control
//! flows backwards: transfer outcomes feed the traffic monitor and the
//! congestion controller, whose recommendations re-tune the orchestrator.

pub mod adaptive;
pub mod arena;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod orchestrator;
pub mod receiver;
pub mod surface;
pub mod timebase;

pub use crate::adaptive::{
    AdaptiveParams, CongestionController, NetworkSample, TrafficMetrics, TrafficMonitor,
};
pub use crate::config::ServerConfig;
pub use crate::error::{Result, RgError};
pub use crate::orchestrator::{ChunkNotice, Orchestrator, OrchestratorOptions};
pub use crate::receiver::Receiver;
pub use crate::surface::{ChunkView, Exposer, Manifest, Surface, SurfaceStats};
