//! Pipeline configuration.
//!
//! Parsed from TOML with `REDPIPE_*` environment overrides, then validated.

mod loading;
mod types;
mod validation;

#[cfg(test)]
mod tests;

pub use types::PipelineConfig;
