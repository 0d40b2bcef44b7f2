//! Command implementations: migrate, info, validate, baseline, repair, clean.

pub mod baseline;
pub mod clean;
pub mod info;
pub mod migrate;
pub mod repair;
pub mod validate;
