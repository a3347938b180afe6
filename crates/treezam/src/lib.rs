//! `treezam` - Tree identification backend with challenges and leaderboards
//!
//! This library provides the storage, gamification rules and HTTP API behind
//! the TreeZam mobile app: users upload a tree photo with its coordinates,
//! the server names the species, records the identification, and updates
//! experience, levels, challenge progress and leaderboards.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod auth;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod game;
pub mod geo;
pub mod leaderboard;
pub mod logging;
pub mod model;
pub mod progress;
pub mod server;
pub mod storage;

pub use classifier::{PlaceholderClassifier, Prediction, SpeciesClassifier};
pub use config::Config;
pub use error::{Error, Result};
pub use game::GameRules;
pub use logging::init_logging;
pub use server::{router, AppState};
pub use storage::{Storage, StorageStats};
