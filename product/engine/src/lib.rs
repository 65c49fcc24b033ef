pub mod classify;
pub mod cmd;
pub mod config;
pub mod db;
pub mod download;
mod error;
pub mod events;
pub mod ffmpeg;
pub mod history;
pub mod host;
pub mod jobs;
pub mod logging;
pub mod paths;
pub mod runner;
pub mod tools;

pub use error::{EngineError, Result};
