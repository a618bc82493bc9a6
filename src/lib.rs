//! hikup - peer-addressable encrypted file store.
//!
//! A server accepts TCP connections, negotiates an ephemeral sealed-box
//! encrypted channel with each peer, and serves upload, download, removal,
//! listing, and multi-node synchronization of content-addressed files.
//! Clients and peer servers acting as sync masters speak the same framed
//! wire protocol.
//!
//! Layering, leaves first: [`wire`] turns a socket into a message channel,
//! [`transfer`] moves file bytes over it in adaptively-sized confirmed
//! chunks, [`storage`] names verified content by hash, and [`sync`] runs
//! the transfer protocol against remote peers using hash-set differencing.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod server;
pub mod storage;
pub mod sync;
pub mod tracker;
pub mod transfer;
pub mod util;
pub mod wire;

pub use error::{HikupError, Result};
