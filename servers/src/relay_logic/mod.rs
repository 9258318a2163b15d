pub mod config;
pub mod logger;
pub mod signals;
pub mod relay;
pub mod display;
