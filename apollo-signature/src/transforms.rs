//! Composable transforms over a parsed query document.
//!
//! Each transform rewrites one aspect of the AST in place. Documents are
//! cheap to clone (AST nodes are [`Node`]s, which are reference-counted
//! and copy-on-write), so callers that need to keep the original intact
//! clone first and transform the copy.

use std::sync::LazyLock;

use apollo_compiler::Node;
use apollo_compiler::ast::Definition;
use apollo_compiler::ast::DirectiveList;
use apollo_compiler::ast::Document;
use apollo_compiler::ast::Selection;
use apollo_compiler::ast::Value;
use regex::Captures;
use regex::Regex;

use crate::separate_operations::separate_operations;

/// Replace numeric, string, list, and object literals with "empty"
/// values, leaving enums alone (there is no consistent "zero" enum).
///
/// This groups otherwise-identical queries that substitute values
/// directly into the query text instead of using variables, and keeps
/// literal values (say, a hardcoded API key) out of reports.
pub fn hide_literals(document: &mut Document) {
    transform_values(document, &mut |value| hide_value(value, false));
}

/// In the same spirit as [`hide_literals`], but only hide string and
/// numeric literals: list and object structure is kept, with the values
/// inside hidden individually.
pub fn hide_string_and_numeric_literals(document: &mut Document) {
    transform_values(document, &mut |value| hide_value(value, true));
}

/// Get rid of field aliases, so that printing uses only the underlying
/// field names.
pub fn remove_aliases(document: &mut Document) {
    for definition in &mut document.definitions {
        match definition {
            Definition::OperationDefinition(operation) => {
                remove_selection_aliases(&mut operation.make_mut().selection_set);
            }
            Definition::FragmentDefinition(fragment) => {
                remove_selection_aliases(&mut fragment.make_mut().selection_set);
            }
            _ => {}
        }
    }
}

/// Sort every multi-child site of the document into a deterministic
/// order, independent of source order: definitions and selections by
/// (kind, name), variable definitions by variable name, field and
/// directive arguments by argument name, directive lists by directive
/// name. The sort is stable, so nodes with equal keys keep their
/// relative source order.
pub fn sort_ast(document: &mut Document) {
    document.definitions.sort_by_key(definition_sort_key);

    for definition in &mut document.definitions {
        match definition {
            Definition::OperationDefinition(operation) => {
                let operation = operation.make_mut();
                operation.variables.sort_by(|a, b| a.name.cmp(&b.name));
                for variable in &mut operation.variables {
                    sort_directives(&mut variable.make_mut().directives);
                }
                sort_directives(&mut operation.directives);
                sort_selections(&mut operation.selection_set);
            }
            Definition::FragmentDefinition(fragment) => {
                let fragment = fragment.make_mut();
                sort_directives(&mut fragment.directives);
                sort_selections(&mut fragment.selection_set);
            }
            _ => {}
        }
    }
}

/// Reduce a multi-operation document to the operation named
/// `operation_name` (empty string for anonymous) plus the fragment
/// definitions it transitively spreads. A name that matches no
/// operation returns the document unchanged rather than erroring.
pub fn drop_unused_definitions(document: &Document, operation_name: &str) -> Document {
    match separate_operations(document).swap_remove(operation_name) {
        Some(separated) => separated,
        None => document.clone(),
    }
}

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static SPACE_AFTER_NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^_a-zA-Z0-9]) ").expect("valid regex"));
static SPACE_BEFORE_NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" ([^_a-zA-Z0-9])").expect("valid regex"));
static HEX_STRING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([a-f0-9]+)""#).expect("valid regex"));

/// Print the document while deleting whitespace wherever feasible: all
/// whitespace outside of string literals is reduced to at most one
/// space, and even that space is removed everywhere except between two
/// identifier characters.
///
/// String literal values are hex-encoded on a working copy before
/// printing and decoded back in the final output, so contents containing
/// whitespace or quote characters survive the collapsing untouched.
pub fn print_with_reduced_whitespace(document: &Document) -> String {
    let mut hexed = document.clone();
    transform_values(&mut hexed, &mut hex_encode_value);

    let printed = hexed.to_string();
    let collapsed = WHITESPACE.replace_all(&printed, " ");
    let collapsed = SPACE_AFTER_NON_WORD.replace_all(&collapsed, "$1");
    let collapsed = SPACE_BEFORE_NON_WORD.replace_all(&collapsed, "$1");
    let restored = HEX_STRING.replace_all(&collapsed, |caps: &Captures<'_>| {
        let decoded = hex::decode(&caps[1])
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok());
        match decoded {
            Some(text) => format!("\"{text}\""),
            None => caps[0].to_string(),
        }
    });
    restored.trim().to_string()
}

/// Apply `transform` to every literal value position in the document:
/// field and directive arguments, and variable default values.
fn transform_values(document: &mut Document, transform: &mut dyn FnMut(&mut Node<Value>)) {
    for definition in &mut document.definitions {
        match definition {
            Definition::OperationDefinition(operation) => {
                let operation = operation.make_mut();
                for variable in &mut operation.variables {
                    let variable = variable.make_mut();
                    if let Some(default) = &mut variable.default_value {
                        transform(default);
                    }
                    transform_directive_values(&mut variable.directives, transform);
                }
                transform_directive_values(&mut operation.directives, transform);
                transform_selection_values(&mut operation.selection_set, transform);
            }
            Definition::FragmentDefinition(fragment) => {
                let fragment = fragment.make_mut();
                transform_directive_values(&mut fragment.directives, transform);
                transform_selection_values(&mut fragment.selection_set, transform);
            }
            _ => {}
        }
    }
}

fn transform_selection_values(
    selections: &mut [Selection],
    transform: &mut dyn FnMut(&mut Node<Value>),
) {
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                let field = field.make_mut();
                for argument in &mut field.arguments {
                    transform(&mut argument.make_mut().value);
                }
                transform_directive_values(&mut field.directives, transform);
                transform_selection_values(&mut field.selection_set, transform);
            }
            Selection::FragmentSpread(spread) => {
                transform_directive_values(&mut spread.make_mut().directives, transform);
            }
            Selection::InlineFragment(inline) => {
                let inline = inline.make_mut();
                transform_directive_values(&mut inline.directives, transform);
                transform_selection_values(&mut inline.selection_set, transform);
            }
        }
    }
}

fn transform_directive_values(
    directives: &mut DirectiveList,
    transform: &mut dyn FnMut(&mut Node<Value>),
) {
    for directive in directives.iter_mut() {
        for argument in &mut directive.make_mut().arguments {
            transform(&mut argument.make_mut().value);
        }
    }
}

fn hide_value(value: &mut Node<Value>, only_string_and_numeric: bool) {
    let value = value.make_mut();
    match value {
        // Int and float literals both print as `0`.
        Value::Int(_) | Value::Float(_) => *value = Value::Int(0.into()),
        Value::String(text) => text.clear(),
        Value::List(items) => {
            if only_string_and_numeric {
                for item in items.iter_mut() {
                    hide_value(item, true);
                }
            } else {
                items.clear();
            }
        }
        Value::Object(fields) => {
            if only_string_and_numeric {
                for (_, item) in fields.iter_mut() {
                    hide_value(item, true);
                }
            } else {
                fields.clear();
            }
        }
        Value::Null | Value::Enum(_) | Value::Variable(_) | Value::Boolean(_) => {}
    }
}

fn hex_encode_value(value: &mut Node<Value>) {
    let value = value.make_mut();
    match value {
        Value::String(text) => *text = hex::encode(text.as_bytes()),
        Value::List(items) => {
            for item in items.iter_mut() {
                hex_encode_value(item);
            }
        }
        Value::Object(fields) => {
            for (_, item) in fields.iter_mut() {
                hex_encode_value(item);
            }
        }
        _ => {}
    }
}

fn remove_selection_aliases(selections: &mut [Selection]) {
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                let field = field.make_mut();
                field.alias = None;
                remove_selection_aliases(&mut field.selection_set);
            }
            Selection::InlineFragment(inline) => {
                remove_selection_aliases(&mut inline.make_mut().selection_set);
            }
            Selection::FragmentSpread(_) => {}
        }
    }
}

fn definition_sort_key(definition: &Definition) -> (&'static str, String) {
    match definition {
        Definition::FragmentDefinition(fragment) => {
            ("FragmentDefinition", fragment.name.to_string())
        }
        Definition::OperationDefinition(operation) => (
            "OperationDefinition",
            operation
                .name
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
        ),
        // Type system definitions have no business in an executable
        // document; leave them wherever they were, after the rest.
        _ => ("TypeSystemDefinition", String::new()),
    }
}

fn selection_sort_key(selection: &Selection) -> (&'static str, String) {
    match selection {
        Selection::Field(field) => ("Field", field.name.to_string()),
        Selection::FragmentSpread(spread) => ("FragmentSpread", spread.fragment_name.to_string()),
        Selection::InlineFragment(inline) => (
            "InlineFragment",
            inline
                .type_condition
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
        ),
    }
}

fn sort_selections(selections: &mut Vec<Selection>) {
    selections.sort_by_key(selection_sort_key);
    for selection in selections.iter_mut() {
        match selection {
            Selection::Field(field) => {
                let field = field.make_mut();
                field.arguments.sort_by(|a, b| a.name.cmp(&b.name));
                sort_directives(&mut field.directives);
                sort_selections(&mut field.selection_set);
            }
            Selection::FragmentSpread(spread) => {
                sort_directives(&mut spread.make_mut().directives);
            }
            Selection::InlineFragment(inline) => {
                let inline = inline.make_mut();
                sort_directives(&mut inline.directives);
                sort_selections(&mut inline.selection_set);
            }
        }
    }
}

fn sort_directives(directives: &mut DirectiveList) {
    directives.sort_by(|a, b| a.name.cmp(&b.name));
    for directive in directives.iter_mut() {
        directive
            .make_mut()
            .arguments
            .sort_by(|a, b| a.name.cmp(&b.name));
    }
}
