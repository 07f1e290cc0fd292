// KiCad Courier - Library Entry Point
// Background coordinator between UI surfaces and an EasyEDA to KiCad
// conversion backend: library inventory, job tracking and persisted state.

pub mod constants;
pub mod error;
pub mod config;
pub mod logging;
pub mod settings;
pub mod db;
pub mod backend;
pub mod library;
pub mod jobs;
pub mod coordinator;
pub mod commands;

pub use commands::{dispatch, Request, Response};
pub use config::{Args, CoordinatorConfig};
pub use coordinator::{Coordinator, Outbound};
pub use error::{CourierError, Result};
