pub mod autoloop;
pub mod complexity;
pub mod config;
pub mod error;
pub mod graph;
pub mod index;
pub mod io;
pub mod paths;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod taskset;
pub mod types;

pub use error::{Result, TaskError};
