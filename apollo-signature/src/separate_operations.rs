use std::collections::HashMap;
use std::collections::HashSet;

use apollo_compiler::Node;
use apollo_compiler::ast::Definition;
use apollo_compiler::ast::Document;
use apollo_compiler::ast::FragmentDefinition;
use apollo_compiler::ast::OperationDefinition;
use apollo_compiler::ast::Selection;
use indexmap::IndexMap;

/// Separate the operations of a document.
///
/// Accepts a document that may contain many operations and fragments
/// and returns one document per operation, each containing that
/// operation plus the fragment definitions it transitively spreads, in
/// original source order. Operations are keyed by name, with the empty
/// string for an anonymous operation; a document is expected to hold at
/// most one anonymous operation, and several of them collide on the
/// empty key with the last one winning.
pub fn separate_operations(document: &Document) -> IndexMap<String, Document> {
    let mut operations: Vec<(String, Node<OperationDefinition>, usize)> = Vec::new();
    let mut fragments: HashMap<String, (Node<FragmentDefinition>, usize)> = HashMap::new();
    // Dependency edges from operation or fragment name to the fragment
    // names it spreads. Operations and fragments share the namespace.
    let mut dep_graph: HashMap<String, HashSet<String>> = HashMap::new();

    for (position, definition) in document.definitions.iter().enumerate() {
        match definition {
            Definition::OperationDefinition(operation) => {
                let name = operation
                    .name
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                collect_spreads(
                    &operation.selection_set,
                    dep_graph.entry(name.clone()).or_default(),
                );
                operations.push((name, operation.clone(), position));
            }
            Definition::FragmentDefinition(fragment) => {
                let name = fragment.name.to_string();
                collect_spreads(
                    &fragment.selection_set,
                    dep_graph.entry(name.clone()).or_default(),
                );
                fragments.insert(name, (fragment.clone(), position));
            }
            _ => {}
        }
    }

    let mut separated = IndexMap::new();
    for (name, operation, position) in &operations {
        let mut reachable = HashSet::new();
        collect_transitive_dependencies(&mut reachable, &dep_graph, name);

        let mut definitions: Vec<(usize, Definition)> = vec![(*position, operation.clone().into())];
        for fragment_name in &reachable {
            if let Some((fragment, fragment_position)) = fragments.get(fragment_name) {
                definitions.push((*fragment_position, fragment.clone().into()));
            }
        }
        definitions.sort_by_key(|(position, _)| *position);

        let mut subset = Document::new();
        subset
            .definitions
            .extend(definitions.into_iter().map(|(_, definition)| definition));
        separated.insert(name.clone(), subset);
    }

    separated
}

fn collect_spreads(selections: &[Selection], spreads: &mut HashSet<String>) {
    for selection in selections {
        match selection {
            Selection::Field(field) => collect_spreads(&field.selection_set, spreads),
            Selection::FragmentSpread(spread) => {
                spreads.insert(spread.fragment_name.to_string());
            }
            Selection::InlineFragment(inline) => collect_spreads(&inline.selection_set, spreads),
        }
    }
}

/// Walk the dependency graph depth-first, recording every fragment name
/// reachable from `from`. The seen-set doubles as cycle protection: a
/// fragment that spreads itself, or a longer cycle, terminates.
fn collect_transitive_dependencies(
    collected: &mut HashSet<String>,
    dep_graph: &HashMap<String, HashSet<String>>,
    from: &str,
) {
    if let Some(immediate) = dep_graph.get(from) {
        for to in immediate {
            if collected.insert(to.clone()) {
                collect_transitive_dependencies(collected, dep_graph, to);
            }
        }
    }
}
