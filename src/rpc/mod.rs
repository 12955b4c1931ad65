//! JSON-RPC 2.0 envelope types and validation
//!
//! - [`envelope`] -- the [`envelope::Envelope`] type and its parse/validate/
//!   serialize operations (§4.2 of the spec).

pub mod envelope;

pub use envelope::{Envelope, Id};
