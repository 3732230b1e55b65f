//! # Dropship Transport
//!
//! Transport-agnostic delivery of single files to a remote endpoint.
//!
//! ## Features
//!
//! - **Transport trait**: `connect` + `send_file`, safe to retry on the
//!   same file
//! - **WebDAV**: `MKCOL` parent collections, then `PUT` the file
//! - **SFTP**: password-authenticated upload over a cached SSH session
//! - **Closed dispatch**: [`AnyTransport`] picks one of the above once at
//!   startup from a [`TransportKind`]
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Delivery Transports                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  DestinationProfile ──► AnyTransport ──► Transport::send_file   │
//! │       │                    │                                    │
//! │       ▼                    ▼                                    │
//! │  Credentials       WebDavTransport / SftpTransport              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod profile;
pub mod sftp;
pub mod transport;
pub mod webdav;

pub use error::{Result, TransportError};
pub use profile::{Credentials, DestinationProfile};
pub use sftp::SftpTransport;
pub use transport::{AnyTransport, SendRequest, Transport, TransportKind};
pub use webdav::WebDavTransport;
