//! In-process [`ObjectStore`] with the API-server semantics the reconciler
//! relies on: version tokens with compare-and-swap writes, a status
//! subresource, finalizer-gated deletion and owner-reference garbage
//! collection. Used for tests and local dry runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::trace;

use super::{ObjectKey, ObjectStore, StoreError, StoreResult, StoredObject, kind_of};

type Slot = (String, ObjectKey);

/// Store operation that can be made to fail once via [`MemoryStore::fail_next`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Get,
    Create,
    Update,
    UpdateStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    NotFound,
    Conflict,
    Unavailable,
}

#[derive(Debug)]
struct PendingFault {
    op: Op,
    kind: String,
    fault: Fault,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<Slot, Value>,
    revision: u64,
    uids: u64,
    writes: u64,
    faults: Vec<PendingFault>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `op` on objects of kind `K` fail with `fault`.
    pub async fn fail_next<K: StoredObject>(&self, op: Op, fault: Fault) {
        self.state.write().await.faults.push(PendingFault {
            op,
            kind: kind_of::<K>(),
            fault,
        });
    }

    /// Request deletion. Objects still carrying finalizers only get a
    /// deletion timestamp; the rest are removed together with every object
    /// that names them as owner.
    pub async fn delete<K: StoredObject>(&self, key: &ObjectKey) -> StoreResult<()> {
        let kind = kind_of::<K>();
        let slot = (kind.clone(), key.clone());
        let mut st = self.state.write().await;
        let current = st
            .objects
            .get(&slot)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{kind} {key}")))?;
        st.writes += 1;
        if !has_finalizers(&current) {
            trace!(%kind, %key, "memory: delete");
            st.remove_with_dependents(&slot);
            return Ok(());
        }
        if is_deleting(&current) {
            return Ok(());
        }
        let rv = st.next_revision();
        if let Some(obj) = st.objects.get_mut(&slot) {
            let meta = metadata_mut(obj)?;
            meta.insert(
                "deletionTimestamp".into(),
                Value::String(now_rfc3339()),
            );
            meta.insert("resourceVersion".into(), Value::String(rv));
        }
        trace!(%kind, %key, "memory: deletion timestamp set");
        Ok(())
    }

    pub async fn contains<K: StoredObject>(&self, key: &ObjectKey) -> bool {
        self.state
            .read()
            .await
            .objects
            .contains_key(&(kind_of::<K>(), key.clone()))
    }

    /// Number of successful mutating calls so far.
    pub async fn writes(&self) -> u64 {
        self.state.read().await.writes
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.objects.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.objects.is_empty()
    }
}

impl State {
    fn take_fault(&mut self, op: Op, kind: &str, desc: &str) -> StoreResult<()> {
        let Some(pos) = self
            .faults
            .iter()
            .position(|f| f.op == op && f.kind == kind)
        else {
            return Ok(());
        };
        let pending = self.faults.remove(pos);
        Err(match pending.fault {
            Fault::NotFound => StoreError::NotFound(desc.to_string()),
            Fault::Conflict => StoreError::Conflict(desc.to_string()),
            Fault::Unavailable => {
                StoreError::Backend(format!("{desc}: store unavailable"))
            }
        })
    }

    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn remove_with_dependents(&mut self, slot: &Slot) {
        let Some(removed) = self.objects.remove(slot) else {
            return;
        };
        if let Some(uid) = meta_str(&removed, "uid").map(str::to_string) {
            self.objects.retain(|_, obj| !owned_by(obj, &uid));
        }
    }

    fn current(&self, slot: &Slot, desc: &str) -> StoreResult<Value> {
        self.objects
            .get(slot)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(desc.to_string()))
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn metadata(v: &Value) -> Option<&Map<String, Value>> {
    v.get("metadata")?.as_object()
}

fn metadata_mut(v: &mut Value) -> StoreResult<&mut Map<String, Value>> {
    v.as_object_mut()
        .ok_or_else(|| StoreError::Backend("object is not a JSON map".into()))?
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| StoreError::Backend("metadata is not a JSON map".into()))
}

fn meta_str<'a>(v: &'a Value, field: &str) -> Option<&'a str> {
    metadata(v)?.get(field)?.as_str()
}

fn owned_by(v: &Value, uid: &str) -> bool {
    metadata(v)
        .and_then(|m| m.get("ownerReferences"))
        .and_then(Value::as_array)
        .is_some_and(|refs| {
            refs.iter()
                .any(|r| r.get("uid").and_then(Value::as_str) == Some(uid))
        })
}

fn has_finalizers(v: &Value) -> bool {
    metadata(v)
        .and_then(|m| m.get("finalizers"))
        .and_then(Value::as_array)
        .is_some_and(|f| !f.is_empty())
}

fn is_deleting(v: &Value) -> bool {
    metadata(v)
        .and_then(|m| m.get("deletionTimestamp"))
        .is_some_and(|t| !t.is_null())
}

fn check_version(current: &Value, incoming: &Value, desc: &str) -> StoreResult<()> {
    match meta_str(incoming, "resourceVersion") {
        Some(rv) if Some(rv) != meta_str(current, "resourceVersion") => {
            Err(StoreError::Conflict(desc.to_string()))
        }
        _ => Ok(()),
    }
}

fn set_status(obj: &mut Value, status: Option<Value>) -> StoreResult<()> {
    let map = obj
        .as_object_mut()
        .ok_or_else(|| StoreError::Backend("object is not a JSON map".into()))?;
    match status {
        Some(s) if !s.is_null() => {
            map.insert("status".into(), s);
        }
        _ => {
            map.remove("status");
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: StoredObject>(&self, key: &ObjectKey) -> StoreResult<K> {
        let kind = kind_of::<K>();
        let desc = format!("{kind} {key}");
        let mut st = self.state.write().await;
        st.take_fault(Op::Get, &kind, &desc)?;
        let obj = st.current(&(kind, key.clone()), &desc)?;
        Ok(serde_json::from_value(obj)?)
    }

    async fn create<K: StoredObject>(&self, obj: &K) -> StoreResult<K> {
        let kind = kind_of::<K>();
        let key = ObjectKey::of(obj);
        let desc = format!("{kind} {key}");
        let slot = (kind.clone(), key.clone());
        let mut value = serde_json::to_value(obj)?;

        let mut st = self.state.write().await;
        st.take_fault(Op::Create, &kind, &desc)?;
        if st.objects.contains_key(&slot) {
            return Err(StoreError::AlreadyExists(desc));
        }
        set_status(&mut value, None)?;
        let rv = st.next_revision();
        st.uids += 1;
        let uid = format!("{:08x}-0000-4000-8000-000000000000", st.uids);
        let meta = metadata_mut(&mut value)?;
        meta.insert("namespace".into(), Value::String(key.namespace.clone()));
        meta.insert("uid".into(), Value::String(uid));
        meta.insert("resourceVersion".into(), Value::String(rv));
        meta.insert("generation".into(), Value::from(1));
        meta.insert("creationTimestamp".into(), Value::String(now_rfc3339()));
        meta.remove("deletionTimestamp");

        st.writes += 1;
        st.objects.insert(slot, value.clone());
        trace!(%kind, %key, "memory: created");
        Ok(serde_json::from_value(value)?)
    }

    async fn update<K: StoredObject>(&self, obj: &K) -> StoreResult<K> {
        let kind = kind_of::<K>();
        let key = ObjectKey::of(obj);
        let desc = format!("{kind} {key}");
        let slot = (kind.clone(), key.clone());
        let mut incoming = serde_json::to_value(obj)?;

        let mut st = self.state.write().await;
        st.take_fault(Op::Update, &kind, &desc)?;
        let current = st.current(&slot, &desc)?;
        check_version(&current, &incoming, &desc)?;

        // the main body never touches status or server-owned metadata
        set_status(&mut incoming, current.get("status").cloned())?;
        let spec_changed = current.get("spec") != incoming.get("spec");
        let cur_meta = metadata(&current).cloned().unwrap_or_default();
        let generation = cur_meta
            .get("generation")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let rv = st.next_revision();
        let meta = metadata_mut(&mut incoming)?;
        for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
            match cur_meta.get(field) {
                Some(v) => {
                    meta.insert(field.into(), v.clone());
                }
                None => {
                    meta.remove(field);
                }
            }
        }
        meta.insert("resourceVersion".into(), Value::String(rv));
        meta.insert(
            "generation".into(),
            Value::from(generation + i64::from(spec_changed)),
        );

        st.writes += 1;
        if is_deleting(&incoming) && !has_finalizers(&incoming) {
            trace!(%kind, %key, "memory: last finalizer removed; deleting");
            st.remove_with_dependents(&slot);
        } else {
            st.objects.insert(slot, incoming.clone());
        }
        Ok(serde_json::from_value(incoming)?)
    }

    async fn update_status<K: StoredObject>(&self, obj: &K) -> StoreResult<K> {
        let kind = kind_of::<K>();
        let key = ObjectKey::of(obj);
        let desc = format!("{kind} {key}");
        let slot = (kind.clone(), key.clone());
        let incoming = serde_json::to_value(obj)?;

        let mut st = self.state.write().await;
        st.take_fault(Op::UpdateStatus, &kind, &desc)?;
        let mut next = st.current(&slot, &desc)?;
        check_version(&next, &incoming, &desc)?;
        set_status(&mut next, incoming.get("status").cloned())?;
        let rv = st.next_revision();
        metadata_mut(&mut next)?.insert("resourceVersion".into(), Value::String(rv));

        st.writes += 1;
        st.objects.insert(slot, next.clone());
        Ok(serde_json::from_value(next)?)
    }
}
