//! Protocol primitives for the weir relay engine.
//!
//! This crate is the transport-free core: the event record and its
//! content-addressed identity (canonical form, SHA-256 id, BIP-340
//! signatures), subscription filters, and the stateless wire-message
//! codec. Everything that touches a socket lives in `weir-client`;
//! everything that touches storage lives in `weir-ingest`.

pub mod error;
pub mod event;
pub mod filter;
pub mod identity;
pub mod keys;
pub mod message;

pub use error::{ProtocolError, Result, ValidationError};
pub use event::{Event, kind, tag_field, tag_name};
pub use filter::{Filter, Subscription};
pub use identity::{canonical_form, compute_id, sign_id, verify_id_signature};
pub use keys::Keys;
pub use message::{ClientMessage, RelayMessage};
