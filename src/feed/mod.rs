//! The upstream market-data connection (spec.md §4.1).

pub mod client;
pub mod protocol;

pub use client::{FeedClient, FeedState};
pub use protocol::Channel;
