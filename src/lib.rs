//! workshopsync - Steam Workshop mods without the Steam client
//!
//! Downloads workshop items through steamcmd into a local cache and makes
//! them visible to the game, either as directory links or as copies:
//! - Cache scanning and deployed-state probing
//! - Workshop page metadata and staleness checks
//! - Batched downloads with per-item deployment and cancellation

pub mod app;
pub mod config;
pub mod error;
pub mod games;
pub mod mods;
pub mod queue;
pub mod steamcmd;
pub mod workshop;

pub use app::App;
pub use config::Config;
