pub mod aggregator;
pub mod comparison;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod results;
pub mod runner;
pub mod symbolic;
pub mod trace;
pub mod value_map;

pub use error::{Error, Result};
