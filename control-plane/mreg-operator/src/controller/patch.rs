//! Three-way change detection between the last-applied snapshot, the freshly
//! rendered object and the live object.
//!
//! Only fields the operator renders are compared. Fields the API server or
//! other controllers add to the live object never count as drift. A field
//! counts as removed when it was in the last-applied snapshot, is gone from
//! the rendered object and is still present live.
//!
//! Lists whose elements all carry a `name` are keyed by it, so elements other
//! writers add (injected sidecars, extra owner references) are left alone.
//! Resource `requests`/`limits` compare by quantity value, since the API
//! server rewrites them into canonical form.

use std::fmt;

use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde_json::{Map, Value};

use super::quantity;

pub const LAST_APPLIED_ANNOTATION: &str =
    "modelregistry.opendatahub.io/last-applied";

const SERVER_METADATA: &[&str] = &[
    "creationTimestamp",
    "deletionGracePeriodSeconds",
    "deletionTimestamp",
    "generation",
    "managedFields",
    "resourceVersion",
    "selfLink",
    "uid",
];

/// Maps whose values are resource quantities.
const QUANTITY_MAPS: &[&str] = &["requests", "limits"];

/// Non-empty when the rendered object differs from the live one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchResult {
    patch: Option<Value>,
}

impl PatchResult {
    pub fn is_empty(&self) -> bool {
        self.patch.is_none()
    }

    pub fn patch(&self) -> Option<&Value> {
        self.patch.as_ref()
    }
}

impl fmt::Display for PatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.patch {
            Some(p) => write!(f, "{p}"),
            None => f.write_str("{}"),
        }
    }
}

/// Project a serialized object onto the fields that take part in diffing.
pub fn diffable(obj: &Value) -> Value {
    let mut obj = obj.clone();
    if let Some(map) = obj.as_object_mut() {
        map.remove("status");
        map.remove("apiVersion");
        map.remove("kind");
        if let Some(meta) = map.get_mut("metadata").and_then(Value::as_object_mut) {
            for field in SERVER_METADATA {
                meta.remove(*field);
            }
            let drop_annotations = match meta
                .get_mut("annotations")
                .and_then(Value::as_object_mut)
            {
                Some(annotations) => {
                    annotations.remove(LAST_APPLIED_ANNOTATION);
                    annotations.is_empty()
                }
                None => false,
            };
            if drop_annotations {
                meta.remove("annotations");
            }
        }
    }
    obj
}

/// Record the diffable form of `obj` on its own last-applied annotation.
pub fn set_last_applied<K>(obj: &mut K) -> Result<(), serde_json::Error>
where
    K: Resource + Serialize,
{
    let snapshot = serde_json::to_string(&diffable(&serde_json::to_value(&*obj)?))?;
    obj.annotations_mut()
        .insert(LAST_APPLIED_ANNOTATION.to_string(), snapshot);
    Ok(())
}

/// Last-applied snapshot of a serialized live object. An unparsable
/// annotation is treated as absent.
pub fn last_applied(live: &Value) -> Option<Value> {
    let raw = live
        .pointer("/metadata/annotations")?
        .get(LAST_APPLIED_ANNOTATION)?
        .as_str()?;
    serde_json::from_str(raw).ok()
}

/// Compare a serialized live object against a serialized rendered one.
pub fn calculate(live: &Value, intended: &Value) -> PatchResult {
    let original = last_applied(live);
    let modified = diffable(intended);
    let current = diffable(live);
    PatchResult {
        patch: diff_value(original.as_ref(), &modified, Some(&current)),
    }
}

fn diff_value(
    original: Option<&Value>,
    modified: &Value,
    current: Option<&Value>,
) -> Option<Value> {
    match (modified, current) {
        (Value::Object(m), Some(Value::Object(c))) => {
            diff_map(original.and_then(Value::as_object), m, c)
        }
        (Value::Array(m), Some(Value::Array(c))) => {
            diff_list(original.and_then(Value::as_array), m, c)
        }
        (Value::Null, None) => None,
        (m, Some(c)) if m == c => None,
        (m, _) => Some(m.clone()),
    }
}

fn diff_map(
    original: Option<&Map<String, Value>>,
    modified: &Map<String, Value>,
    current: &Map<String, Value>,
) -> Option<Value> {
    let mut patch = Map::new();
    for (key, value) in modified {
        let orig = original.and_then(|o| o.get(key));
        let live = current.get(key);
        let d = if QUANTITY_MAPS.contains(&key.as_str()) {
            diff_quantities(orig, value, live)
        } else {
            diff_value(orig, value, live)
        };
        if let Some(d) = d {
            patch.insert(key.clone(), d);
        }
    }
    for key in original.into_iter().flat_map(Map::keys) {
        let still_live = current.get(key).is_some_and(|v| !v.is_null());
        if !modified.contains_key(key) && still_live {
            patch.insert(key.clone(), Value::Null);
        }
    }
    (!patch.is_empty()).then_some(Value::Object(patch))
}

/// Like `diff_value`, but a rendered quantity equal in value to the live one
/// is taken as the live spelling.
fn diff_quantities(
    original: Option<&Value>,
    modified: &Value,
    current: Option<&Value>,
) -> Option<Value> {
    let (Value::Object(m), Some(Value::Object(c))) = (modified, current) else {
        return diff_value(original, modified, current);
    };
    let normalized: Map<String, Value> = m
        .iter()
        .map(|(key, value)| {
            let live = c.get(key).filter(|live| quantity::same(value, live));
            (key.clone(), live.unwrap_or(value).clone())
        })
        .collect();
    diff_map(original.and_then(Value::as_object), &normalized, c)
}

fn element_name(v: &Value) -> Option<&str> {
    v.get("name")?.as_str()
}

fn find_named<'a>(list: &'a [Value], name: &str) -> Option<&'a Value> {
    list.iter().find(|c| element_name(c) == Some(name))
}

/// Lists are replaced wholesale when any element differs.
fn diff_list(
    original: Option<&Vec<Value>>,
    modified: &[Value],
    current: &[Value],
) -> Option<Value> {
    let changed = if is_named_list(modified, current) {
        named_list_changed(original.map(Vec::as_slice), modified, current)
    } else {
        indexed_list_changed(original.map(Vec::as_slice), modified, current)
    };
    changed.then(|| Value::Array(modified.to_vec()))
}

fn is_named_list(modified: &[Value], current: &[Value]) -> bool {
    let mut elems = modified.iter().chain(current).peekable();
    elems.peek().is_some() && elems.all(|e| element_name(e).is_some())
}

/// Elements pair up by name. Live-only elements are ignored unless the
/// snapshot shows the operator rendered them before.
fn named_list_changed(
    original: Option<&[Value]>,
    modified: &[Value],
    current: &[Value],
) -> bool {
    let rendered_changed = modified.iter().any(|elem| {
        let Some(name) = element_name(elem) else {
            return true;
        };
        let orig = original.and_then(|o| find_named(o, name));
        match find_named(current, name) {
            Some(live) => diff_value(orig, elem, Some(live)).is_some(),
            None => true,
        }
    });
    let dropped = original
        .into_iter()
        .flatten()
        .filter_map(element_name)
        .any(|name| {
            find_named(modified, name).is_none() && find_named(current, name).is_some()
        });
    rendered_changed || dropped
}

/// Elements pair up by position, so any length change is drift.
fn indexed_list_changed(
    original: Option<&[Value]>,
    modified: &[Value],
    current: &[Value],
) -> bool {
    if modified.len() != current.len() {
        return true;
    }
    modified.iter().zip(current).enumerate().any(|(idx, (elem, live))| {
        let orig = original.and_then(|o| o.get(idx));
        diff_value(orig, elem, Some(live)).is_some()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use serde_json::json;

    fn live_with(original: &Value, current: Value) -> Value {
        let mut live = current;
        live["metadata"]["annotations"] = json!({
            LAST_APPLIED_ANNOTATION: original.to_string(),
        });
        live
    }

    #[test]
    fn server_defaults_are_not_drift() {
        let intended = json!({
            "metadata": {"name": "demo", "labels": {"app": "demo"}},
            "spec": {"ports": [{"name": "http-api", "port": 8080}]}
        });
        let live = live_with(
            &diffable(&intended),
            json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": {
                    "name": "demo",
                    "labels": {"app": "demo"},
                    "resourceVersion": "42",
                    "uid": "abc"
                },
                "spec": {
                    "clusterIP": "10.0.0.12",
                    "ports": [{"name": "http-api", "port": 8080, "protocol": "TCP"}]
                },
                "status": {"loadBalancer": {}}
            }),
        );
        assert!(calculate(&live, &intended).is_empty());
    }

    #[test]
    fn changed_field_is_reported() {
        let intended = json!({"spec": {"replicas": 2}});
        let live = live_with(&json!({"spec": {"replicas": 1}}), json!({"spec": {"replicas": 1}}));
        let result = calculate(&live, &intended);
        assert_eq!(result.patch(), Some(&json!({"spec": {"replicas": 2}})));
    }

    #[test]
    fn field_dropped_from_render_is_a_deletion() {
        let original = json!({"spec": {"replicas": 1, "paused": true}});
        let live = live_with(&original, json!({"spec": {"replicas": 1, "paused": true}}));
        let intended = json!({"spec": {"replicas": 1}});
        let result = calculate(&live, &intended);
        assert_eq!(result.patch(), Some(&json!({"spec": {"paused": null}})));
    }

    #[test]
    fn field_without_snapshot_is_left_alone() {
        let live = json!({"spec": {"replicas": 1, "paused": true}});
        let intended = json!({"spec": {"replicas": 1}});
        assert!(calculate(&live, &intended).is_empty());
    }

    #[test]
    fn named_list_elements_match_by_name() {
        let intended = json!({"containers": [
            {"name": "a", "image": "a:1"},
            {"name": "b", "image": "b:1"}
        ]});
        let reordered = json!({"containers": [
            {"name": "b", "image": "b:1", "imagePullPolicy": "IfNotPresent"},
            {"name": "a", "image": "a:1", "imagePullPolicy": "IfNotPresent"}
        ]});
        assert!(calculate(&reordered, &intended).is_empty());

        let bumped = json!({"containers": [
            {"name": "a", "image": "a:1"},
            {"name": "b", "image": "b:0"}
        ]});
        assert!(!calculate(&bumped, &intended).is_empty());
    }

    #[test]
    fn live_only_named_elements_are_ignored() {
        let intended = json!({"containers": [{"name": "rest", "image": "rest:1"}]});
        let live = live_with(
            &intended,
            json!({"containers": [
                {"name": "rest", "image": "rest:1"},
                {"name": "injected-sidecar", "image": "proxy:1"}
            ]}),
        );
        assert!(calculate(&live, &intended).is_empty());
    }

    #[test]
    fn named_element_dropped_from_render_is_drift() {
        let original = json!({"containers": [
            {"name": "rest", "image": "rest:1"},
            {"name": "grpc", "image": "grpc:1"}
        ]});
        let live = live_with(&original, original.clone());
        let intended = json!({"containers": [{"name": "rest", "image": "rest:1"}]});
        let result = calculate(&live, &intended);
        assert_eq!(result.patch(), Some(&intended));

        let released = live_with(&original, intended.clone());
        assert!(calculate(&released, &intended).is_empty());
    }

    #[test]
    fn missing_named_element_is_drift() {
        let intended = json!({"containers": [
            {"name": "rest", "image": "rest:1"},
            {"name": "grpc", "image": "grpc:1"}
        ]});
        let live = json!({"containers": [
            {"name": "rest", "image": "rest:1"},
            {"name": "sidecar", "image": "proxy:1"}
        ]});
        assert!(!calculate(&live, &intended).is_empty());
    }

    #[test]
    fn canonicalized_quantities_are_not_drift() {
        let intended = json!({"resources": {
            "limits": {"cpu": "1000m", "memory": "1024Mi"},
            "requests": {"cpu": "0.5"}
        }});
        let live = live_with(
            &intended,
            json!({"resources": {
                "limits": {"cpu": "1", "memory": "1Gi"},
                "requests": {"cpu": "500m"}
            }}),
        );
        assert!(calculate(&live, &intended).is_empty());

        let raised = json!({"resources": {
            "limits": {"cpu": "2", "memory": "1024Mi"},
            "requests": {"cpu": "0.5"}
        }});
        let result = calculate(&live, &raised);
        assert_eq!(
            result.patch(),
            Some(&json!({"resources": {"limits": {"cpu": "2"}}}))
        );
    }

    #[test]
    fn list_length_change_is_drift() {
        let intended = json!({"args": ["--a", "--b"]});
        let live = json!({"args": ["--a"]});
        assert!(!calculate(&live, &intended).is_empty());
    }

    #[test]
    fn annotation_round_trips_through_object() {
        let mut cm = ConfigMap::default();
        cm.metadata.name = Some("demo".into());
        cm.data = Some([("k".to_string(), "v".to_string())].into());
        set_last_applied(&mut cm).unwrap();
        let live = serde_json::to_value(&cm).unwrap();
        let snapshot = last_applied(&live).unwrap();
        assert_eq!(snapshot["data"]["k"], "v");
        assert!(snapshot.pointer("/metadata/annotations").is_none());
        assert!(calculate(&live, &serde_json::to_value(&cm).unwrap()).is_empty());
    }

    #[test]
    fn garbage_annotation_counts_as_missing() {
        let live = json!({"metadata": {"annotations": {LAST_APPLIED_ANNOTATION: "{nope"}}});
        assert!(last_applied(&live).is_none());
    }
}
