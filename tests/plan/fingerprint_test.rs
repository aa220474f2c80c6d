// tests/plan/fingerprint_test.rs
use prism::plan::{request_fingerprint, QueryRequest};

fn request(value: serde_json::Value) -> QueryRequest {
    serde_json::from_value(value).unwrap()
}

const VERSION: &str = "abc123";

#[test]
fn fingerprint_is_order_independent() {
    let forward = request(serde_json::json!({
        "metrics": ["total_sales", "order_count"],
        "dimensions": ["region", "status"],
        "filters": [
            {"name": "big_orders", "args": {"min_amount": 100}},
            {"name": "recent", "args": {"since": "2024-01-01"}}
        ]
    }));
    let permuted = request(serde_json::json!({
        "metrics": ["order_count", "total_sales"],
        "dimensions": ["status", "region"],
        "filters": [
            {"name": "recent", "args": {"since": "2024-01-01"}},
            {"name": "big_orders", "args": {"min_amount": 100}}
        ]
    }));

    assert_eq!(
        request_fingerprint(VERSION, &forward).unwrap(),
        request_fingerprint(VERSION, &permuted).unwrap()
    );
}

#[test]
fn argument_values_change_the_fingerprint() {
    let low = request(serde_json::json!({
        "metrics": ["total_sales"],
        "filters": [{"name": "big_orders", "args": {"min_amount": 100}}]
    }));
    let high = request(serde_json::json!({
        "metrics": ["total_sales"],
        "filters": [{"name": "big_orders", "args": {"min_amount": 200}}]
    }));
    assert_ne!(
        request_fingerprint(VERSION, &low).unwrap(),
        request_fingerprint(VERSION, &high).unwrap()
    );
}

#[test]
fn metric_args_change_the_fingerprint() {
    let bare = request(serde_json::json!({"metrics": ["sales_above"]}));
    let with_args = request(serde_json::json!({
        "metrics": ["sales_above"],
        "metric_args": {"sales_above": {"baseline": 500}}
    }));
    assert_ne!(
        request_fingerprint(VERSION, &bare).unwrap(),
        request_fingerprint(VERSION, &with_args).unwrap()
    );
}

#[test]
fn join_hint_changes_the_fingerprint() {
    let without = request(serde_json::json!({
        "metrics": ["total_sales"], "dimensions": ["name"]
    }));
    let with_hint = request(serde_json::json!({
        "metrics": ["total_sales"], "dimensions": ["name"],
        "join_hint": ["store", "store_region"]
    }));
    assert_ne!(
        request_fingerprint(VERSION, &without).unwrap(),
        request_fingerprint(VERSION, &with_hint).unwrap()
    );
}

#[test]
fn schema_version_changes_the_fingerprint() {
    let req = request(serde_json::json!({"metrics": ["total_sales"]}));
    assert_ne!(
        request_fingerprint("v1", &req).unwrap(),
        request_fingerprint("v2", &req).unwrap()
    );
}

#[test]
fn fingerprint_is_a_sha256_hex_string() {
    let req = request(serde_json::json!({"metrics": ["total_sales"]}));
    let fingerprint = request_fingerprint(VERSION, &req).unwrap();
    assert_eq!(fingerprint.len(), 64);
    assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
}
