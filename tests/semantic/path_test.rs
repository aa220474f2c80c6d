// tests/semantic/path_test.rs
use std::collections::BTreeSet;

use prism::model::loader::{load_models, RawModel};
use prism::model::types::{Cardinality, JoinType};
use prism::semantic::graph::SemanticGraph;
use prism::semantic::path::{plan_joins, PlanError};
use prism::semantic::NullCatalog;

fn build(defs: serde_json::Value) -> SemanticGraph {
    let raw: Vec<RawModel> = serde_json::from_value(defs).unwrap();
    SemanticGraph::build(load_models(raw).unwrap(), &NullCatalog).unwrap()
}

fn requested(models: &[&str]) -> BTreeSet<String> {
    models.iter().map(|m| m.to_string()).collect()
}

/// orders -> customers over a declared one-to-many edge.
fn direct_schema() -> SemanticGraph {
    build(serde_json::json!([
        {
            "name": "orders",
            "dimensions": [{"name": "customer_id", "type": "number"}],
            "measures": [{"name": "amount", "type": "number"}],
            "entities": [
                {"target": "customers", "primary_key": "customer_id",
                 "foreign_key": "id", "cardinality": "one-to-many"}
            ]
        },
        {
            "name": "customers",
            "dimensions": [
                {"name": "id", "type": "number"},
                {"name": "region", "type": "string"}
            ]
        }
    ]))
}

/// Two equal-length routes from orders to regions, neither preferable.
fn diamond_schema(with_cardinality: bool) -> SemanticGraph {
    let cardinality = if with_cardinality {
        serde_json::json!("one-to-many")
    } else {
        serde_json::Value::Null
    };
    build(serde_json::json!([
        {
            "name": "orders",
            "dimensions": [
                {"name": "store_id", "type": "number"},
                {"name": "courier_id", "type": "number"}
            ],
            "measures": [{"name": "amount", "type": "number"}],
            "entities": [
                {"name": "store", "target": "stores", "primary_key": "store_id",
                 "foreign_key": "id", "cardinality": cardinality},
                {"name": "courier", "target": "couriers",
                 "primary_key": "courier_id", "foreign_key": "id"}
            ]
        },
        {
            "name": "stores",
            "dimensions": [
                {"name": "id", "type": "number"},
                {"name": "region_id", "type": "number"}
            ],
            "entities": [
                {"name": "store_region", "target": "regions",
                 "primary_key": "region_id", "foreign_key": "id",
                 "cardinality": if with_cardinality { serde_json::json!("one-to-many") } else { serde_json::Value::Null }}
            ]
        },
        {
            "name": "couriers",
            "dimensions": [
                {"name": "id", "type": "number"},
                {"name": "region_id", "type": "number"}
            ],
            "entities": [
                {"name": "courier_region", "target": "regions",
                 "primary_key": "region_id", "foreign_key": "id"}
            ]
        },
        {
            "name": "regions",
            "dimensions": [
                {"name": "id", "type": "number"},
                {"name": "name", "type": "string"}
            ]
        }
    ]))
}

#[test]
fn direct_edge_is_selected_without_ambiguity() {
    let graph = direct_schema();
    let plan = plan_joins(&graph, "orders", &requested(&["orders", "customers"]), None).unwrap();

    assert_eq!(plan.anchor, "orders");
    assert_eq!(plan.joins.len(), 1);
    let join = &plan.joins[0];
    assert_eq!(join.from_model, "orders");
    assert_eq!(join.to_model, "customers");
    assert_eq!(join.from_column, "customer_id");
    assert_eq!(join.to_column, "id");
    assert_eq!(join.join_type, JoinType::Inner);
    assert_eq!(join.cardinality, Some(Cardinality::OneToMany));
    assert!(!join.dedup);
}

#[test]
fn single_model_request_needs_no_joins() {
    let graph = direct_schema();
    let plan = plan_joins(&graph, "orders", &requested(&["orders"]), None).unwrap();
    assert!(plan.joins.is_empty());
}

#[test]
fn bridge_models_are_pulled_in() {
    let graph = build(serde_json::json!([
        {
            "name": "order_items",
            "dimensions": [{"name": "order_id", "type": "number"}],
            "measures": [{"name": "quantity", "type": "number"}],
            "entities": [
                {"target": "orders", "primary_key": "order_id",
                 "foreign_key": "id", "cardinality": "one-to-many"}
            ]
        },
        {
            "name": "orders",
            "dimensions": [
                {"name": "id", "type": "number"},
                {"name": "customer_id", "type": "number"}
            ],
            "entities": [
                {"target": "customers", "primary_key": "customer_id",
                 "foreign_key": "id", "cardinality": "one-to-many"}
            ]
        },
        {
            "name": "customers",
            "dimensions": [
                {"name": "id", "type": "number"},
                {"name": "region", "type": "string"}
            ]
        }
    ]));

    let plan = plan_joins(
        &graph,
        "order_items",
        &requested(&["order_items", "customers"]),
        None,
    )
    .unwrap();
    let path: Vec<&str> = plan.joins.iter().map(|j| j.to_model.as_str()).collect();
    assert_eq!(path, vec!["orders", "customers"]);
}

#[test]
fn equal_paths_without_tiebreak_are_ambiguous() {
    let graph = diamond_schema(false);
    let err = plan_joins(&graph, "orders", &requested(&["orders", "regions"]), None).unwrap_err();

    match err {
        PlanError::AmbiguousJoinPath {
            from,
            to,
            candidates,
        } => {
            assert_eq!(from, "orders");
            assert_eq!(to, "regions");
            assert_eq!(candidates.len(), 2);
            assert!(candidates.contains(&vec!["store".to_string(), "store_region".to_string()]));
            assert!(candidates.contains(&vec![
                "courier".to_string(),
                "courier_region".to_string()
            ]));
        }
        other => panic!("expected AmbiguousJoinPath, got {:?}", other),
    }
}

#[test]
fn declared_cardinality_breaks_the_tie() {
    let graph = diamond_schema(true);
    let plan = plan_joins(&graph, "orders", &requested(&["orders", "regions"]), None).unwrap();
    let entities: Vec<&str> = plan.joins.iter().map(|j| j.entity.as_str()).collect();
    assert_eq!(entities, vec!["store", "store_region"]);
}

#[test]
fn one_to_many_is_preferred_over_many_to_many() {
    let graph = build(serde_json::json!([
        {
            "name": "orders",
            "dimensions": [
                {"name": "store_id", "type": "number"},
                {"name": "tag_id", "type": "number"}
            ],
            "entities": [
                {"name": "store", "target": "stores", "primary_key": "store_id",
                 "foreign_key": "id", "cardinality": "one-to-many"},
                {"name": "tags", "target": "stores", "primary_key": "tag_id",
                 "foreign_key": "id", "cardinality": "many-to-many"}
            ]
        },
        {
            "name": "stores",
            "dimensions": [{"name": "id", "type": "number"}]
        }
    ]));
    let plan = plan_joins(&graph, "orders", &requested(&["orders", "stores"]), None).unwrap();
    assert_eq!(plan.joins[0].entity, "store");
    assert!(!plan.joins[0].dedup);
}

#[test]
fn hint_resolves_ambiguity_deterministically() {
    let graph = diamond_schema(false);
    let hint = vec!["courier".to_string(), "courier_region".to_string()];
    let plan = plan_joins(
        &graph,
        "orders",
        &requested(&["orders", "regions"]),
        Some(&hint),
    )
    .unwrap();
    let entities: Vec<&str> = plan.joins.iter().map(|j| j.entity.as_str()).collect();
    assert_eq!(entities, vec!["courier", "courier_region"]);
}

#[test]
fn hint_with_unknown_entity_fails() {
    let graph = diamond_schema(false);
    let hint = vec!["warehouse".to_string()];
    let err = plan_joins(
        &graph,
        "orders",
        &requested(&["orders", "regions"]),
        Some(&hint),
    )
    .unwrap_err();
    assert_eq!(
        err,
        PlanError::UnknownHintEntity {
            name: "warehouse".into()
        }
    );
}

#[test]
fn hint_must_reach_all_requested_models() {
    let graph = diamond_schema(false);
    let hint = vec!["courier".to_string()];
    let err = plan_joins(
        &graph,
        "orders",
        &requested(&["orders", "regions"]),
        Some(&hint),
    )
    .unwrap_err();
    assert!(matches!(err, PlanError::NoPath { .. }));
}

#[test]
fn many_to_many_joins_are_marked_deduplicating() {
    let graph = build(serde_json::json!([
        {
            "name": "orders",
            "dimensions": [{"name": "id", "type": "number"}],
            "measures": [{"name": "amount", "type": "number"}],
            "entities": [
                {"name": "order_tags", "target": "tags", "primary_key": "id",
                 "foreign_key": "order_id", "cardinality": "many-to-many"}
            ]
        },
        {
            "name": "tags",
            "dimensions": [
                {"name": "order_id", "type": "number"},
                {"name": "label", "type": "string"}
            ]
        }
    ]));
    let plan = plan_joins(&graph, "orders", &requested(&["orders", "tags"]), None).unwrap();
    assert!(plan.joins[0].dedup);
    assert!(plan.requires_dedup());
}

#[test]
fn no_connection_is_no_path() {
    let graph = build(serde_json::json!([
        {"name": "orders", "measures": [{"name": "amount", "type": "number"}]},
        {"name": "customers", "dimensions": [{"name": "region", "type": "string"}]}
    ]));
    let err = plan_joins(&graph, "orders", &requested(&["orders", "customers"]), None).unwrap_err();
    assert_eq!(
        err,
        PlanError::NoPath {
            from: "orders".into(),
            to: "customers".into(),
        }
    );
}

#[test]
fn empty_request_is_rejected() {
    let graph = direct_schema();
    let err = plan_joins(&graph, "orders", &BTreeSet::new(), None).unwrap_err();
    assert_eq!(err, PlanError::NoModels);
}

#[test]
fn self_referencing_edge_is_traversable_only_by_hint() {
    let graph = build(serde_json::json!([{
        "name": "employees",
        "dimensions": [
            {"name": "id", "type": "number"},
            {"name": "manager_id", "type": "number"}
        ],
        "entities": [
            {"name": "manager", "target": "employees",
             "primary_key": "manager_id", "foreign_key": "id",
             "cardinality": "one-to-one"}
        ]
    }]));

    // A hint may authorize one bounded traversal of the self edge.
    let hint = vec!["manager".to_string()];
    let plan = plan_joins(&graph, "employees", &requested(&["employees"]), Some(&hint)).unwrap();
    assert_eq!(plan.joins.len(), 1);
    assert_eq!(plan.joins[0].from_model, "employees");
    assert_eq!(plan.joins[0].to_model, "employees");

    // Reusing the entity is a cycle.
    let cyclic = vec!["manager".to_string(), "manager".to_string()];
    let err = plan_joins(
        &graph,
        "employees",
        &requested(&["employees"]),
        Some(&cyclic),
    )
    .unwrap_err();
    assert!(matches!(err, PlanError::CycleDetected { .. }));
}

/// The planner's central contract: aggregating across a de-duplicating
/// join never double-counts. Simulated over an in-memory fixture of one
/// parent row joined to two many-to-many child rows.
#[test]
fn dedup_join_prevents_double_counting() {
    let graph = build(serde_json::json!([
        {
            "name": "orders",
            "dimensions": [{"name": "id", "type": "number"}],
            "measures": [{"name": "amount", "type": "number"}],
            "entities": [
                {"name": "order_tags", "target": "tags", "primary_key": "id",
                 "foreign_key": "order_id", "cardinality": "many-to-many"}
            ]
        },
        {
            "name": "tags",
            "dimensions": [{"name": "order_id", "type": "number"}]
        }
    ]));
    let plan = plan_joins(&graph, "orders", &requested(&["orders", "tags"]), None).unwrap();
    let join = &plan.joins[0];

    // One parent order of amount 100, appearing twice on the tag side.
    let orders = vec![(1i64, 100i64)];
    let tags = vec![1i64, 1i64];
    let unjoined_total: i64 = orders.iter().map(|(_, amount)| amount).sum();

    // The join side is deduplicated on the join key exactly when the
    // planner marked the edge; the metric sum must match the un-joined
    // value.
    let join_side: Vec<i64> = if join.dedup {
        let mut keys = tags.clone();
        keys.sort_unstable();
        keys.dedup();
        keys
    } else {
        tags.clone()
    };
    let joined_total: i64 = orders
        .iter()
        .flat_map(|(id, amount)| {
            join_side
                .iter()
                .filter(move |key| *key == id)
                .map(move |_| *amount)
        })
        .sum();

    assert!(join.dedup);
    assert_eq!(joined_total, unjoined_total);

    // Without the dedup step the same fixture double-counts, which is
    // exactly what the marking exists to prevent.
    let naive_total: i64 = orders
        .iter()
        .flat_map(|(id, amount)| tags.iter().filter(move |key| *key == id).map(move |_| *amount))
        .sum();
    assert_eq!(naive_total, 2 * unjoined_total);
}
