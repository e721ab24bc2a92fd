pub mod api;
pub mod db;
pub mod error;
pub mod import_tmdb;
pub mod import_watchmode;
pub mod jobs;
pub mod lines;
pub mod movies;
pub mod paths;
pub mod transfer;

pub use error::{EngineError, Result};
