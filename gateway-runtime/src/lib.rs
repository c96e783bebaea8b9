//! Core runtime for the NYX gateway: deterministic evidence pipeline,
//! multi-asset ledger, order book, identity portal, and the outbound web2
//! guard, all over an embedded relational store.
//!
//! The HTTP surface lives in `gateway-http-api`; this crate is framing-free
//! and fully testable against a temp directory.

pub mod airdrop;
pub mod assets;
pub mod auth;
pub mod chat;
pub mod compliance;
pub mod error;
pub mod evidence;
pub mod exchange;
pub mod fees;
pub mod gateway;
pub mod hashing;
pub mod identifiers;
pub mod ledger;
pub mod marketplace;
pub mod metrics;
pub mod paths;
pub mod portal;
pub mod risk;
pub mod settings;
pub mod store;
pub mod validation;
pub mod web2_guard;

mod time_util;

pub use rusqlite;

pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewayResult};
pub use paths::Paths;
pub use settings::Settings;
pub use time_util::unix_now;
