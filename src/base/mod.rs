//! Core components and types for the ptal-bot.
//!
//! This module contains fundamental building blocks used throughout the application:
//! - Configuration handling and environment variables.
//! - Domain types for guild settings and PTAL message mappings.
//! - Common result handling.

pub mod config;
pub mod types;
