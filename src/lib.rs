pub mod config;
pub mod foresight;
pub mod logging;

pub use foresight::{ForesightConfig, ForesightEngine};
