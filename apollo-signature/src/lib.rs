//! Canonical operation signatures for GraphQL usage reporting.
//!
//! A signature is a stable string form of a query used to group
//! semantically equivalent operations: two queries that differ only in
//! whitespace, aliases, literal values, or the order of fields,
//! arguments and fragments produce the same signature. Signatures are
//! built by composing the transforms in [`transforms`] over an
//! [`apollo_compiler::ast::Document`]; see [`default_signature`] for
//! the composition used for reporting.

#![warn(unreachable_pub)]

mod separate_operations;
mod signature;
pub mod transforms;

pub use separate_operations::separate_operations;
pub use signature::default_signature;
pub use signature::query_hash;
