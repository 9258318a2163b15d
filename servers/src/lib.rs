//! Shared wiring for the relay and display binaries.

pub mod relay_logic;
