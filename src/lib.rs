//! A weighted request dispatcher.
//!
//! [`WeightedDispatcher`] picks, for every request, the backend that should
//! take it, using smooth weighted round robin so that each backend's share
//! converges to its weight's share of the total while selections stay evenly
//! interleaved. Weights can be changed while traffic is flowing.
//!
//! The crate also ships a small [Hyper] front end: `GET /` dispatches,
//! `GET /metrics` reports per-backend counters, and `/admin/*` routes change
//! weights or run a load test against the live pool.
//!
//! [Hyper]: https://hyper.rs/

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod server;

pub use backend::BackendTarget;
pub use config::{BackendConfig, Config, LoadTestConfig, RuntimeConfig};
pub use dispatcher::{BackendSnapshot, WeightedDispatcher};
pub use error::DispatchError;
pub use handler::{AppState, DispatchResponse, WeightUpdate, handle_request};
pub use load_test::{LoadTestReport, LoadTestRow};
pub use server::{serve, shutdown_signal};

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, DispatchError>;
