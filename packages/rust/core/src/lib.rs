//! Webmention pipeline for Backfeed.
//!
//! Ties together source verification, microformat classification, idempotent
//! storage and outbound delivery. [`Webmentions`] is the entry point used by
//! the HTTP server and the CLI.

pub mod events;
pub mod inbound;
pub mod outbound;
pub mod query;
pub mod service;
pub mod upsert;

mod links;

pub use events::{Event, EventBus};
pub use inbound::RejectReason;
pub use outbound::{DeliveryReport, OutboundDispatcher};
pub use query::MentionStats;
pub use service::{InboundOutcome, Webmentions};
pub use upsert::UpsertAction;
