//! HTTP adapter for medreason.
//!
//! Exposes the generation service as a single JSON endpoint:
//!
//! ```text
//! POST /          {"message": "..."}  ->  {"response": "..."}
//! POST /generate  (same contract)
//! GET  /health    {"status", "model_loaded", "version"}
//! ```
//!
//! Malformed input yields `{"error": ...}` with status 200; generation
//! failures yield status 500 with a fixed `detail` string.

pub mod error;
pub mod handlers;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::{build_router, serve, spawn_preload};
pub use state::AppState;
