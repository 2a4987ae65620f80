//! NetShare core: LAN peer discovery, a framed TCP control protocol,
//! challenge/response auth, and a resumable chunked transfer engine.

pub mod auth;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod framing;
pub mod path_safety;
pub mod peer_directory;
pub mod protocol;
pub mod session;
pub mod share_registry;
pub mod transfer;

pub use error::{NetShareError, Result};
