// tests/model/loader_test.rs
use prism::model::loader::{load_models, RawModel, SchemaError};

fn raw(defs: serde_json::Value) -> Vec<RawModel> {
    serde_json::from_value(defs).unwrap()
}

#[test]
fn valid_schema_loads() {
    let models = load_models(raw(serde_json::json!([
        {
            "name": "orders",
            "dimensions": [
                {"name": "customer_id", "type": "number"},
                {"name": "status", "type": "string", "searchable": true,
                 "options": ["open", "shipped"]}
            ],
            "measures": [{"name": "amount", "type": "number"}],
            "metrics": [{"name": "total_sales", "expr": "sum(orders.amount)"}],
            "filters": [
                {"name": "big_orders", "expr": "orders.amount >= {min_amount}",
                 "args": [{"name": "min_amount", "type": "number"}]}
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
    ])))
    .unwrap();

    assert_eq!(models.len(), 2);
    let orders = &models[0];
    assert_eq!(orders.name, "orders");
    assert_eq!(orders.dimensions.len(), 2);
    assert!(orders.dimension("status").unwrap().searchable);
    assert_eq!(
        orders.dimension("status").unwrap().options.as_deref(),
        Some(&["open".to_string(), "shipped".to_string()][..])
    );
    assert_eq!(orders.metrics.len(), 1);
    assert_eq!(orders.entities[0].effective_name(), "customers");
}

#[test]
fn missing_model_name_is_reported() {
    let err = load_models(raw(serde_json::json!([{"dimensions": []}]))).unwrap_err();
    assert!(matches!(err.0[0], SchemaError::MissingModelName { index: 0 }));
}

#[test]
fn duplicate_model_names_are_rejected() {
    let err = load_models(raw(serde_json::json!([
        {"name": "orders"},
        {"name": "orders"}
    ])))
    .unwrap_err();
    assert!(err
        .0
        .iter()
        .any(|e| matches!(e, SchemaError::DuplicateModel { name } if name == "orders")));
}

#[test]
fn duplicate_names_within_a_model_are_rejected() {
    let err = load_models(raw(serde_json::json!([{
        "name": "orders",
        "dimensions": [{"name": "amount", "type": "number"}],
        "measures": [{"name": "amount", "type": "number"}]
    }])))
    .unwrap_err();
    assert!(err
        .0
        .iter()
        .any(|e| matches!(e, SchemaError::DuplicateName { name, .. } if name == "amount")));
}

#[test]
fn metric_requires_expr() {
    let err = load_models(raw(serde_json::json!([{
        "name": "orders",
        "metrics": [{"name": "total_sales"}]
    }])))
    .unwrap_err();
    assert!(matches!(
        &err.0[0],
        SchemaError::MissingExpr { name, .. } if name == "total_sales"
    ));
}

#[test]
fn undeclared_placeholder_is_an_argument_mismatch() {
    let err = load_models(raw(serde_json::json!([{
        "name": "orders",
        "measures": [{"name": "amount", "type": "number"}],
        "filters": [{"name": "big", "expr": "orders.amount >= {min_amount}"}]
    }])))
    .unwrap_err();
    match &err.0[0] {
        SchemaError::ArgumentMismatch {
            undeclared, unused, ..
        } => {
            assert_eq!(undeclared, &["min_amount"]);
            assert!(unused.is_empty());
        }
        other => panic!("expected ArgumentMismatch, got {:?}", other),
    }
}

#[test]
fn unused_declared_argument_is_an_argument_mismatch() {
    let err = load_models(raw(serde_json::json!([{
        "name": "orders",
        "measures": [{"name": "amount", "type": "number"}],
        "filters": [{
            "name": "big",
            "expr": "orders.amount >= 100",
            "args": [{"name": "min_amount", "type": "number"}]
        }]
    }])))
    .unwrap_err();
    match &err.0[0] {
        SchemaError::ArgumentMismatch {
            undeclared, unused, ..
        } => {
            assert!(undeclared.is_empty());
            assert_eq!(unused, &["min_amount"]);
        }
        other => panic!("expected ArgumentMismatch, got {:?}", other),
    }
}

#[test]
fn malformed_cardinality_is_invalid_enum() {
    let err = load_models(raw(serde_json::json!([{
        "name": "orders",
        "dimensions": [{"name": "customer_id", "type": "number"}],
        "entities": [{
            "target": "customers", "primary_key": "customer_id",
            "foreign_key": "id", "cardinality": "many2many"
        }]
    }])))
    .unwrap_err();
    assert!(matches!(
        &err.0[0],
        SchemaError::InvalidEnum { field: "cardinality", value, .. } if value == "many2many"
    ));
}

#[test]
fn malformed_join_type_is_invalid_enum() {
    let err = load_models(raw(serde_json::json!([{
        "name": "orders",
        "dimensions": [{"name": "customer_id", "type": "number"}],
        "entities": [{
            "target": "customers", "primary_key": "customer_id",
            "foreign_key": "id", "type": "outer"
        }]
    }])))
    .unwrap_err();
    assert!(matches!(
        &err.0[0],
        SchemaError::InvalidEnum { field: "type", value, .. } if value == "outer"
    ));
}

#[test]
fn absent_enums_stay_none_for_the_planner() {
    let models = load_models(raw(serde_json::json!([{
        "name": "orders",
        "dimensions": [{"name": "customer_id", "type": "number"}],
        "entities": [{
            "target": "customers", "primary_key": "customer_id", "foreign_key": "id"
        }]
    }])))
    .unwrap();
    let entity = &models[0].entities[0];
    assert!(entity.join_type.is_none());
    assert!(entity.cardinality.is_none());
}

#[test]
fn entity_requires_target_and_keys() {
    let err = load_models(raw(serde_json::json!([{
        "name": "orders",
        "entities": [
            {"primary_key": "customer_id", "foreign_key": "id"},
            {"target": "customers", "foreign_key": "id"}
        ]
    }])))
    .unwrap_err();
    assert!(err
        .0
        .iter()
        .any(|e| matches!(e, SchemaError::MissingTarget { .. })));
    assert!(err.0.iter().any(
        |e| matches!(e, SchemaError::MissingKey { field: "primary_key", .. })
    ));
}

#[test]
fn errors_are_collected_across_the_whole_batch() {
    let err = load_models(raw(serde_json::json!([
        {"name": "orders", "metrics": [{"name": "broken"}]},
        {"dimensions": []},
        {"name": "customers", "dimensions": [
            {"name": "id", "type": "number"},
            {"name": "id", "type": "number"}
        ]}
    ])))
    .unwrap_err();
    // One error per problem, none hidden by the others.
    assert_eq!(err.0.len(), 3);
}

#[test]
fn argument_with_invalid_type_is_rejected() {
    let err = load_models(raw(serde_json::json!([{
        "name": "orders",
        "measures": [{"name": "amount", "type": "number"}],
        "filters": [{
            "name": "big",
            "expr": "orders.amount >= {min_amount}",
            "args": [{"name": "min_amount", "type": "integer"}]
        }]
    }])))
    .unwrap_err();
    assert!(err
        .0
        .iter()
        .any(|e| matches!(e, SchemaError::InvalidEnum { value, .. } if value == "integer")));
}
