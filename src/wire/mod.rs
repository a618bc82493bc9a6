//! Wire connection layer: sentinel framing, sealed-box handshake, and the
//! message channel both the client and server sides speak.

pub mod connection;
pub mod crypto;
pub mod framer;

pub use connection::{
    Channel, ClientConnection, Connection, ServerConnection, DATA, DEFAULT_BUFFER_SIZE,
    DEFAULT_READ_TIMEOUT, INTERNAL,
};
pub use framer::{Framer, SENTINEL};
