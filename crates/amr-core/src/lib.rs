//! Core domain + application logic for the anonymous mail relay bot.
//!
//! This crate is framework-agnostic. Telegram lives behind `MessagingPort`,
//! implemented in the adapter crate; persistence and pseudonyms sit behind the
//! traits in `ports`.

pub mod audit;
pub mod callbacks;
pub mod compose;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod janitor;
pub mod logging;
pub mod messaging;
pub mod moderation;
pub mod ports;
pub mod pseudonym;
pub mod publish;
pub mod relay;
pub mod resilience;
pub mod schedule;
pub mod services;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
