//! Canonical request fingerprints.
//!
//! A fingerprint identifies a semantically equivalent compilation request:
//! the same schema version, metrics, dimensions, filters, argument values,
//! and join hint always produce the same hash regardless of the order the
//! request listed them in. Fingerprints are safe to log and persist.

use std::collections::BTreeMap;

use serde::Serialize;

use super::compiler::QueryRequest;
use crate::cache::hash::compute_hash;

/// Canonical, order-independent rendition of a request.
#[derive(Serialize)]
struct CanonicalRequest<'a> {
    schema_version: &'a str,
    metrics: Vec<(String, BTreeMap<&'a str, &'a serde_json::Value>)>,
    dimensions: Vec<&'a str>,
    filters: Vec<(&'a str, BTreeMap<&'a str, &'a serde_json::Value>)>,
    join_hint: Option<&'a [String]>,
}

/// Compute the fingerprint of a request against a schema version.
pub fn request_fingerprint(
    schema_version: &str,
    request: &QueryRequest,
) -> Result<String, serde_json::Error> {
    let mut metrics: Vec<(String, BTreeMap<&str, &serde_json::Value>)> = request
        .metrics
        .iter()
        .map(|name| {
            let args = request
                .metric_args
                .get(name)
                .map(|args| {
                    args.iter()
                        .map(|(k, v)| (k.as_str(), v))
                        .collect::<BTreeMap<_, _>>()
                })
                .unwrap_or_default();
            (name.clone(), args)
        })
        .collect();
    metrics.sort_by(|a, b| a.0.cmp(&b.0));

    let mut dimensions: Vec<&str> = request.dimensions.iter().map(String::as_str).collect();
    dimensions.sort_unstable();

    let mut filters: Vec<(&str, BTreeMap<&str, &serde_json::Value>)> = request
        .filters
        .iter()
        .map(|f| {
            (
                f.name.as_str(),
                f.args
                    .iter()
                    .map(|(k, v)| (k.as_str(), v))
                    .collect::<BTreeMap<_, _>>(),
            )
        })
        .collect();
    filters.sort_by(|a, b| a.0.cmp(b.0));

    compute_hash(&CanonicalRequest {
        schema_version,
        metrics,
        dimensions,
        filters,
        join_hint: request.join_hint.as_deref(),
    })
}
