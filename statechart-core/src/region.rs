//! C5 — parallel-region bookkeeping (§4.4.4). Regions are not separate
//! tasks: one interpreter owns the whole configuration (possibly several
//! active leaves, one per region) and this module supplies the pure
//! helpers the step algorithm needs to treat them correctly — rescoping an
//! escaping ("cross-region") transition to its enclosing parallel state,
//! and rendering the aggregated `"regionA.stateA;regionB.stateB"` snapshot
//! form.

use crate::model::{Chart, StateId, StateKind};

/// Entries of `config` that are `scope` itself or nested under it.
pub fn active_descendants<'a>(config: &'a [StateId], scope: &str) -> Vec<&'a str> {
    config
        .iter()
        .map(String::as_str)
        .filter(|leaf| Chart::is_descendant(leaf, scope))
        .collect()
}

/// A transition matched at `matched_scope` targeting `target` normally only
/// affects `matched_scope`'s own branch. If `matched_scope` sits inside a
/// parallel region and `target` lies outside that region, the transition
/// must tear down every region of the enclosing parallel state instead —
/// this returns the rescoped exit boundary (§4.4.4 "cross-region
/// transitions").
pub fn rescope_for_target(chart: &Chart, matched_scope: &str, target: &str) -> StateId {
    for ancestor in chart.ancestors(matched_scope) {
        if let Some(node) = chart.state(ancestor) {
            if node.kind == StateKind::Parallel {
                let region = node
                    .children
                    .iter()
                    .find(|c| Chart::is_descendant(matched_scope, c));
                if let Some(region) = region {
                    if !Chart::is_descendant(target, region) {
                        return ancestor.to_string();
                    }
                }
                break;
            }
        }
    }
    matched_scope.to_string()
}

/// Renders the active configuration per §4.4.8. A single active leaf
/// (the common case: no parallel anywhere in the path) renders as its
/// plain absolute id, preserving nested compound dots (`"a.b.c"`). Multiple
/// active leaves (parallel regions) render as each leaf's id relative to
/// their deepest common ancestor, `;`-joined and sorted.
pub fn render_configuration(config: &[StateId]) -> String {
    if config.len() <= 1 {
        return config.first().cloned().unwrap_or_default();
    }
    let mut common = config[0].clone();
    for leaf in &config[1..] {
        while !Chart::is_descendant(leaf, &common) {
            common = Chart::parent_path(&common).to_string();
        }
    }
    let mut parts: Vec<String> = config
        .iter()
        .map(|leaf| {
            if common.is_empty() {
                leaf.clone()
            } else {
                leaf[common.len() + 1..].to_string()
            }
        })
        .collect();
    parts.sort();
    parts.join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_single_leaf_with_dots_intact() {
        assert_eq!(render_configuration(&["a.b.c".to_string()]), "a.b.c");
    }

    #[test]
    fn renders_parallel_regions_relative_and_sorted() {
        let config = vec!["p.r2.y".to_string(), "p.r1.b".to_string()];
        assert_eq!(render_configuration(&config), "r1.b;r2.y");
    }
}
