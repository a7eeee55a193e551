//! # sortlink-client
//!
//! Client library for the sorter appliance.
//!
//! This crate provides:
//! - Async TCP connections with incremental frame reading
//! - A control session client that requests directory info, status alerts
//!   and configuration changes, then waits for the appliance's verdict
//! - An event feed client that counts processed and finalized items

pub mod connection;
pub mod control;
pub mod error;
pub mod feed;
pub mod reader;

pub use connection::{Connection, ConnectionConfig};
pub use control::{ControlSession, SessionConfig, SessionHandle, SessionOutcome, SessionState};
pub use error::ClientError;
pub use feed::{EventFeed, FeedCounters, FeedHandle, FeedSnapshot, FeedStop};
pub use reader::FrameReader;
