//! Command Handlers Module
//!
//! This module contains handlers for all CLI subcommands.

pub mod extract;
pub mod status;
pub mod verify;
