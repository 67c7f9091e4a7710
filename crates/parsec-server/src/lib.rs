//! # parsec-server
//!
//! The authoritative state machine of a Parsec deployment: organization
//! registry, user and device certificates, realm access control, vlob and
//! block storage, invitations with the SAS greeting conduit, Shamir
//! recovery and sequester services.
//!
//! The transport layer (HTTP framing, authentication headers, SSE) lives
//! outside this crate: requests arrive here already authenticated, as an
//! `(organization, author, now)` tuple plus a decoded command.

pub mod api;
pub mod ballpark;
pub mod blockstore;
pub mod components;
pub mod config;
pub mod datamodel;
pub mod events;
pub mod export;
pub mod webhooks;

pub use api::Server;
pub use config::ServerConfig;
pub use events::{Event, EventBus};
