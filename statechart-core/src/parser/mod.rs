//! §6 chart-source grammar → `Chart`: relaxed-JSON normalization, strict
//! decode into the wire DTO, then resolution into the immutable model.

mod dto;
mod relaxed_json;
mod resolve;

use crate::error::DefinitionError;
use crate::model::Chart;

/// Parses a chart source string (relaxed JSON per §6) into a resolved
/// `Chart`. Fails closed: any unresolved reference, missing `initial`, or
/// malformed source is a `DefinitionError` and no `Chart` is produced.
pub fn parse(src: &str) -> Result<Chart, DefinitionError> {
    let normalized = relaxed_json::normalize(src)?;
    let raw: dto::RawChart = serde_json::from_str(&normalized)
        .map_err(|e| DefinitionError::Parse(e.to_string()))?;
    resolve::resolve(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_linear_chart() {
        let chart = parse(
            r#"{
                id: light,
                initial: red,
                states: {
                    red: { on: { NEXT: green } },
                    green: { on: { NEXT: yellow } },
                    yellow: { on: { NEXT: red } }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(chart.root().initial.as_deref(), Some("red"));
        assert_eq!(
            chart.state("red").unwrap().on["NEXT"][0].targets[0],
            "green"
        );
    }

    #[test]
    fn rejects_unresolvable_target() {
        let err = parse(
            r#"{id: m, initial: a, states: {a: {on: {GO: nowhere}}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidReference { .. }));
    }

    #[test]
    fn compound_without_initial_requires_all_final_children() {
        let err = parse(
            r#"{id: m, initial: a, states: {
                a: { states: { x: {}, y: {} } }
            }}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::MissingInitial(_)));
    }

    #[test]
    fn all_final_children_default_initial_to_first() {
        let chart = parse(
            r#"{id: m, initial: a, states: {
                a: { states: {
                    done1: { type: final },
                    done2: { type: final }
                } }
            }}"#,
        )
        .unwrap();
        assert_eq!(chart.state("a").unwrap().initial.as_deref(), Some("a.done1"));
    }

    #[test]
    fn resolves_sibling_and_root_and_hash_targets() {
        let chart = parse(
            r##"{id: m, initial: a, states: {
                a: { initial: x, states: {
                    x: { on: { GO: y } },
                    y: {}
                } },
                b: {}
            }, on: { TOP: "#b" } }"##,
        )
        .unwrap();
        assert_eq!(chart.state("a.x").unwrap().on["GO"][0].targets[0], "a.y");
        assert_eq!(chart.root().on["TOP"][0].targets[0], "b");
    }
}
