//! Event handling and user interactions for ptal-bot.
//!
//! This module provides functionality for handling inbound events:
//! - Verifying and parsing GitHub webhooks
//! - Reconciling PTAL messages with pull request state
//! - Executing configuration commands against the store

pub mod config_command;
pub mod event;
pub mod reconcile;
pub mod verify;
