//! Shared types, error model, configuration, and collaborator traits for Backfeed.
//!
//! This crate is the foundation depended on by all other Backfeed crates.
//! It provides:
//! - [`BackfeedError`], the unified error type
//! - Domain types ([`Mention`], [`MentionType`], [`MentionPayload`], [`Post`])
//! - Configuration ([`AppConfig`], [`SiteConfig`], config loading)
//! - Store seams ([`MentionStore`], [`PostResolver`]) consumed by the core

pub mod config;
pub mod error;
pub mod store;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DatabaseConfig, HttpConfig, OutboundConfig, ServerConfig, SiteConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{BackfeedError, Result};
pub use store::{MentionStore, PostResolver};
pub use types::{
    Author, Mention, MentionId, MentionPayload, MentionType, MentionUpdate, NewMention, Post,
    TypeCounts,
};
