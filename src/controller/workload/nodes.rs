use super::reconcile::ReconcileError;
use super::validation::resolve_int_or_percent;
use crate::crd::defaults::DEFAULT_CANARY_REPLICAS;
use crate::crd::workload::{CanaryStatus, CanaryStrategy};
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Separator between label values in an anti-affinity value
const ANTI_AFFINITY_SEPARATOR: &str = "$$";

/// Choose the nodes that run the canary generation
///
/// Candidates are Ready nodes matching `canary.nodeSelector`, ordered by name.
/// Nodes already in `canary_status.nodes` stay selected while they remain
/// candidates. With a node selector every candidate is used; otherwise the
/// selection is filled up to `canary.replicas`, preferring nodes whose
/// anti-affinity value is not yet represented.
///
/// On error `canary_status` is left untouched.
pub fn select_nodes(
    strategy: &CanaryStrategy,
    nodes: &[Node],
    canary_status: &mut CanaryStatus,
) -> Result<(), ReconcileError> {
    let mut candidates: Vec<&Node> = nodes
        .iter()
        .filter(|n| is_node_ready(n))
        .filter(|n| {
            strategy
                .node_selector
                .as_ref()
                .is_none_or(|sel| matches_selector(sel, n.labels()))
        })
        .collect();
    candidates.sort_by_key(|n| n.name_any());

    let replicas = strategy
        .replicas
        .clone()
        .unwrap_or(IntOrString::Int(DEFAULT_CANARY_REPLICAS));
    let required = required_nodes(&replicas, nodes.len());

    if candidates.len() < required {
        return Err(ReconcileError::InsufficientNodes {
            required,
            available: candidates.len(),
        });
    }

    let selected = if strategy.node_selector.is_some() {
        candidates.iter().map(|n| n.name_any()).collect()
    } else {
        fill_with_anti_affinity(
            &candidates,
            &canary_status.nodes,
            &strategy.node_anti_affinity_keys,
            required,
        )
    };

    debug!(
        generation = %canary_status.generation,
        required,
        candidates = candidates.len(),
        selected = ?selected,
        "Selected canary nodes"
    );
    canary_status.nodes = selected;
    Ok(())
}

/// Number of canary nodes `replicas` asks for out of `node_count` nodes
fn required_nodes(replicas: &IntOrString, node_count: usize) -> usize {
    let total = i32::try_from(node_count).unwrap_or(i32::MAX);
    usize::try_from(resolve_int_or_percent(replicas, total)).unwrap_or(0)
}

fn fill_with_anti_affinity(
    candidates: &[&Node],
    existing: &[String],
    keys: &[String],
    required: usize,
) -> Vec<String> {
    let by_name: BTreeMap<String, &Node> =
        candidates.iter().map(|n| (n.name_any(), *n)).collect();

    // Sticky: keep prior picks that are still eligible
    let mut selected: Vec<String> = existing
        .iter()
        .filter(|name| by_name.contains_key(*name))
        .take(required)
        .cloned()
        .collect();

    let mut seen_values: HashSet<String> = selected
        .iter()
        .filter_map(|name| by_name.get(name))
        .map(|n| anti_affinity_value(n, keys))
        .collect();

    for node in candidates {
        if selected.len() >= required {
            break;
        }
        let name = node.name_any();
        if selected.contains(&name) {
            continue;
        }
        if !keys.is_empty() {
            let value = anti_affinity_value(node, keys);
            if !seen_values.insert(value) {
                continue;
            }
        }
        selected.push(name);
    }

    // Distinct values exhausted: allow repeats
    for node in candidates {
        if selected.len() >= required {
            break;
        }
        let name = node.name_any();
        if !selected.contains(&name) {
            selected.push(name);
        }
    }

    selected
}

/// Combined value of the anti-affinity keys present on a node
///
/// Values are joined with `$$` in key order; missing keys are skipped.
pub fn anti_affinity_value(node: &Node, keys: &[String]) -> String {
    let labels = node.labels();
    keys.iter()
        .filter_map(|k| labels.get(k).map(String::as_str))
        .collect::<Vec<_>>()
        .join(ANTI_AFFINITY_SEPARATOR)
}

/// A node is ready when its `Ready` condition is `True`
pub fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

/// Match labels against a LabelSelector (matchLabels and matchExpressions)
///
/// Unknown operators never match.
pub fn matches_selector(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    let labels_match = selector
        .match_labels
        .as_ref()
        .is_none_or(|ml| ml.iter().all(|(k, v)| labels.get(k) == Some(v)));

    let expressions_match = selector.match_expressions.as_ref().is_none_or(|exprs| {
        exprs.iter().all(|expr| {
            let value = labels.get(&expr.key);
            let values = expr.values.as_deref().unwrap_or_default();
            match expr.operator.as_str() {
                "In" => value.is_some_and(|v| values.contains(v)),
                "NotIn" => value.is_none_or(|v| !values.contains(v)),
                "Exists" => value.is_some(),
                "DoesNotExist" => value.is_none(),
                _ => false,
            }
        })
    });

    labels_match && expressions_match
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(name: &str, labels: serde_json::Value, ready: bool) -> Node {
        serde_json::from_value(json!({
            "metadata": { "name": name, "labels": labels },
            "status": {
                "conditions": [
                    { "type": "Ready", "status": if ready { "True" } else { "False" } }
                ]
            }
        }))
        .unwrap()
    }

    fn canary(replicas: IntOrString, keys: &[&str]) -> CanaryStrategy {
        CanaryStrategy {
            replicas: Some(replicas),
            node_anti_affinity_keys: keys.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        }
    }

    fn status() -> CanaryStatus {
        CanaryStatus {
            generation: "agent-new".to_string(),
            nodes: vec![],
            ..Default::default()
        }
    }

    #[test]
    fn test_anti_affinity_skips_duplicate_values() {
        let nodes = vec![
            node("a", json!({"app": "foo", "svc": "bar"}), true),
            node("b", json!({"app": "foo", "svc": "bar"}), true),
            node("c", json!({"app": "x", "svc": "y"}), true),
        ];
        let mut st = status();
        select_nodes(&canary(IntOrString::Int(2), &["app", "svc"]), &nodes, &mut st).unwrap();

        assert_eq!(st.nodes.len(), 2);
        assert!(st.nodes.contains(&"c".to_string()));
        assert_ne!(st.nodes, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_anti_affinity_repeats_when_values_exhausted() {
        let nodes = vec![
            node("a", json!({"zone": "z1"}), true),
            node("b", json!({"zone": "z1"}), true),
            node("c", json!({"zone": "z1"}), true),
        ];
        let mut st = status();
        select_nodes(&canary(IntOrString::Int(2), &["zone"]), &nodes, &mut st).unwrap();
        assert_eq!(st.nodes, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_dedicated_node_selector_uses_every_match() {
        let nodes = vec![
            node("node1", json!({}), true),
            node("node2", json!({"canary": "true"}), true),
        ];
        let mut strategy = canary(IntOrString::Int(1), &[]);
        strategy.node_selector = Some(LabelSelector {
            match_labels: Some(BTreeMap::from([("canary".to_string(), "true".to_string())])),
            ..Default::default()
        });

        let mut st = status();
        select_nodes(&strategy, &nodes, &mut st).unwrap();
        assert_eq!(st.nodes, vec!["node2".to_string()]);
    }

    #[test]
    fn test_insufficient_nodes_leaves_status_unchanged() {
        let nodes = vec![node("n1", json!({}), true), node("n2", json!({}), true)];
        let mut st = CanaryStatus {
            generation: "agent-new".to_string(),
            nodes: vec!["n1".to_string()],
            ..Default::default()
        };

        let err = select_nodes(&canary(IntOrString::Int(3), &[]), &nodes, &mut st).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::InsufficientNodes {
                required: 3,
                available: 2
            }
        ));
        assert_eq!(st.nodes, vec!["n1".to_string()]);
    }

    #[test]
    fn test_not_ready_nodes_are_not_candidates() {
        let nodes = vec![node("n1", json!({}), false), node("n2", json!({}), true)];
        let mut st = status();

        select_nodes(&canary(IntOrString::Int(1), &[]), &nodes, &mut st).unwrap();
        assert_eq!(st.nodes, vec!["n2".to_string()]);

        let mut st = status();
        assert!(select_nodes(&canary(IntOrString::Int(2), &[]), &nodes, &mut st).is_err());
    }

    #[test]
    fn test_existing_selection_is_sticky() {
        let nodes = vec![
            node("n1", json!({}), true),
            node("n2", json!({}), true),
            node("n3", json!({}), true),
        ];
        let mut st = CanaryStatus {
            generation: "agent-new".to_string(),
            nodes: vec!["n3".to_string(), "gone".to_string()],
            ..Default::default()
        };

        select_nodes(&canary(IntOrString::Int(2), &[]), &nodes, &mut st).unwrap();
        assert_eq!(st.nodes, vec!["n3".to_string(), "n1".to_string()]);
    }

    #[test]
    fn test_percentage_replicas_round_up() {
        let nodes: Vec<Node> = (1..=5)
            .map(|i| node(&format!("n{i}"), json!({}), true))
            .collect();
        let mut st = status();
        select_nodes(
            &canary(IntOrString::String("30%".to_string()), &[]),
            &nodes,
            &mut st,
        )
        .unwrap();
        assert_eq!(st.nodes.len(), 2);
    }

    #[test]
    fn test_required_nodes_saturates_node_count() {
        let all = IntOrString::String("100%".to_string());
        assert_eq!(required_nodes(&all, usize::MAX), i32::MAX as usize);
        assert_eq!(required_nodes(&IntOrString::String("50%".to_string()), 5), 3);
        assert_eq!(required_nodes(&IntOrString::Int(-1), 5), 0);
    }

    #[test]
    fn test_anti_affinity_value_skips_missing_keys() {
        let n = node("n1", json!({"app": "foo", "svc": "bar"}), true);
        let keys: Vec<String> = ["app", "missing", "svc"].iter().map(|s| s.to_string()).collect();
        assert_eq!(anti_affinity_value(&n, &keys), "foo$$bar");
    }

    #[test]
    fn test_match_expressions() {
        let selector: LabelSelector = serde_json::from_value(json!({
            "matchExpressions": [
                { "key": "zone", "operator": "In", "values": ["z1", "z2"] },
                { "key": "tier", "operator": "NotIn", "values": ["system"] },
                { "key": "gpu", "operator": "DoesNotExist" },
                { "key": "pool", "operator": "Exists" }
            ]
        }))
        .unwrap();

        let labels = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
        };

        assert!(matches_selector(&selector, &labels(&[("zone", "z1"), ("pool", "a")])));
        assert!(!matches_selector(&selector, &labels(&[("zone", "z3"), ("pool", "a")])));
        assert!(!matches_selector(
            &selector,
            &labels(&[("zone", "z1"), ("pool", "a"), ("tier", "system")])
        ));
        assert!(!matches_selector(
            &selector,
            &labels(&[("zone", "z1"), ("pool", "a"), ("gpu", "yes")])
        ));
        assert!(!matches_selector(&selector, &labels(&[("zone", "z1")])));
    }
}
