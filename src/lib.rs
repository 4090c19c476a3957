// ABOUTME: Library module for neubot-collate
// ABOUTME: Exports all core functionality for use in binary and tests

pub mod commands;
pub mod config;
pub mod error;
pub mod geo;
pub mod merge;
pub mod store;
pub mod utils;
