use apollo_compiler::ast::Document;
use sha2::Digest;
use sha2::Sha256;

use crate::transforms::drop_unused_definitions;
use crate::transforms::hide_literals;
use crate::transforms::print_with_reduced_whitespace;
use crate::transforms::remove_aliases;
use crate::transforms::sort_ast;

/// The default reporting signature for an operation: drop unused
/// definitions, hide literals, remove aliases, sort the AST into a
/// deterministic order, and print with reduced whitespace.
///
/// The result is a pure function of `(document, operation_name)`: the
/// original formatting, argument order, alias names and literal values
/// of the query text do not affect it.
pub fn default_signature(document: &Document, operation_name: &str) -> String {
    let mut document = drop_unused_definitions(document, operation_name);
    hide_literals(&mut document);
    remove_aliases(&mut document);
    sort_ast(&mut document);
    print_with_reduced_whitespace(&document)
}

/// SHA-256 digest of a raw query string, as lowercase hex. Stable
/// operation id for registry and persisted-query use.
pub fn query_hash(query: &str) -> String {
    hex::encode(Sha256::digest(query.as_bytes()))
}
