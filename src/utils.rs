//! Utilities that are used across the `rnadiff` subcommands.

pub mod display;
pub mod formats;
pub mod histogram;
