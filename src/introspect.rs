//! Debug and introspection surface
//!
//! Everything here reads the registry under the lock and returns owned data;
//! nothing mutates state.

use crate::error::Result;
use crate::handle::NativeHandle;
use crate::invalidation::Lifecycle;
use crate::ownership::Ownership;
use crate::registry::{Wrapper, WrapperId, WrapperRecord};
use crate::runtime::Runtime;
use crate::types::TypeTag;
use crate::value::Value;
use serde::Serialize;
use std::fmt::Write as _;

/// Serializable view of one wrapper's bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrapperSnapshot {
    pub id: WrapperId,
    pub declared_type: String,
    pub handle: Option<NativeHandle>,
    pub last_handle: NativeHandle,
    pub last_known_type: String,
    pub ownership: Ownership,
    pub lifecycle: Lifecycle,
    pub created_by_language: bool,
    pub parent: Option<WrapperId>,
    pub children: Vec<WrapperId>,
    pub referred: Vec<(String, Vec<WrapperId>)>,
    pub sub_objects: Vec<NativeHandle>,
    pub in_flight: u32,
    pub pending_delete: bool,
    pub ref_count: usize,
}

impl WrapperSnapshot {
    fn capture(record: &WrapperRecord) -> Self {
        Self {
            id: record.id,
            declared_type: record.ty.qualified_name(),
            handle: record.handle,
            last_handle: record.last_handle,
            last_known_type: record.last_known_type.clone(),
            ownership: record.ownership,
            lifecycle: record.lifecycle,
            created_by_language: record.created_by_language,
            parent: record.parent,
            children: record.children.iter().copied().collect(),
            referred: record
                .referred
                .iter()
                .map(|(key, objects)| (key.clone(), objects.iter().map(Wrapper::id).collect()))
                .collect(),
            sub_objects: record.addresses.to_vec(),
            in_flight: record.in_flight,
            pending_delete: record.pending_delete,
            ref_count: record.shell.strong_count(),
        }
    }
}

impl Runtime {
    fn with_record<T>(&self, wrapper: &Wrapper, f: impl FnOnce(&WrapperRecord) -> T) -> Result<T> {
        let state = self.inner.state.lock();
        state.record(wrapper.id()).map(f)
    }

    /// False once the native instance is gone (or going)
    pub fn is_valid(&self, wrapper: &Wrapper) -> bool {
        self.with_record(wrapper, WrapperRecord::is_valid).unwrap_or(false)
    }

    /// Ordinary language values are always valid
    pub fn is_valid_value(&self, value: &Value) -> bool {
        match value {
            Value::Object(wrapper) => self.is_valid(wrapper),
            _ => true,
        }
    }

    pub fn is_language_owned(&self, wrapper: &Wrapper) -> bool {
        self.ownership(wrapper)
            .map(|o| o == Ownership::LanguageOwned)
            .unwrap_or(false)
    }

    pub fn ownership(&self, wrapper: &Wrapper) -> Result<Ownership> {
        self.with_record(wrapper, |r| r.ownership)
    }

    pub fn lifecycle(&self, wrapper: &Wrapper) -> Result<Lifecycle> {
        self.with_record(wrapper, |r| r.lifecycle)
    }

    /// True when the native instance was constructed from the language side
    pub fn created_by_language(&self, wrapper: &Wrapper) -> bool {
        self.with_record(wrapper, |r| r.created_by_language).unwrap_or(false)
    }

    pub fn parent_of(&self, wrapper: &Wrapper) -> Option<Wrapper> {
        let state = self.inner.state.lock();
        let parent = state.get(wrapper.id())?.parent?;
        state.get(parent)?.upgrade()
    }

    pub fn children_of(&self, wrapper: &Wrapper) -> Vec<Wrapper> {
        let state = self.inner.state.lock();
        state
            .get(wrapper.id())
            .map(|r| {
                r.children
                    .iter()
                    .filter_map(|id| state.get(*id).and_then(WrapperRecord::upgrade))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn referred_objects(&self, wrapper: &Wrapper, key: &str) -> Vec<Wrapper> {
        self.with_record(wrapper, |r| r.referred.get(key).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// One address per distinct base sub-object
    pub fn sub_object_addresses(&self, wrapper: &Wrapper) -> Result<Vec<NativeHandle>> {
        let state = self.inner.state.lock();
        let record = state.record(wrapper.id())?;
        match record.handle {
            Some(_) => Ok(record.addresses.to_vec()),
            None => Err(record.invalidated_error()),
        }
    }

    /// Ancestor tags of the instance at `handle`, most derived first
    pub fn query_type_identity(&self, handle: NativeHandle) -> Vec<TypeTag> {
        if let Some(wrapper) = self.lookup(handle) {
            return wrapper.declared_type().ancestors().iter().map(|a| a.tag).collect();
        }
        let exact = self
            .inner
            .state
            .lock()
            .native_type(handle)
            .or_else(|| self.backend().query_type(handle).map(|(_, ty)| ty));
        exact
            .and_then(|ty| self.inner.types.get(ty).ok())
            .map(|desc| desc.ancestors().iter().map(|a| a.tag).collect())
            .unwrap_or_default()
    }

    /// One-line diagnostic description
    pub fn dump(&self, wrapper: &Wrapper) -> String {
        let state = self.inner.state.lock();
        let Some(record) = state.get(wrapper.id()) else {
            return format!("<{} object {}> [unknown]", wrapper.type_name(), wrapper.id());
        };

        let mut out = match record.handle {
            Some(handle) => format!("<{} object {} at {}>", record.ty.name(), record.id, handle),
            None => format!("<{} object {}> [deleted]", record.ty.name(), record.id),
        };
        let _ = write!(out, " [{}]", record.ownership);
        if record.lifecycle == Lifecycle::Invalidating {
            out.push_str(" [invalidating]");
        }
        if record.created_by_language {
            out.push_str(" [created by language]");
        }
        if let Some(parent) = record.parent {
            let _ = write!(out, " parent={}", parent);
        }
        if !record.children.is_empty() {
            let children: Vec<String> = record.children.iter().map(ToString::to_string).collect();
            let _ = write!(out, " children=[{}]", children.join(", "));
        }
        out
    }

    pub fn dump_value(&self, value: &Value) -> String {
        match value {
            Value::Object(wrapper) => self.dump(wrapper),
            _ => "Ordinary language value.".to_string(),
        }
    }

    /// Multi-line report
    pub fn info(&self, wrapper: &Wrapper) -> Result<String> {
        let snap = self.snapshot(wrapper)?;
        let mut out = String::new();
        let _ = writeln!(out, "wrapper.............. {}", snap.id);
        let _ = writeln!(out, "declared type........ {}", snap.declared_type);
        let _ = writeln!(out, "last known type...... {}", snap.last_known_type);
        match snap.handle {
            Some(handle) => {
                let _ = writeln!(out, "native address....... {}", handle);
            }
            None => {
                let _ = writeln!(out, "native address....... <deleted> (was {})", snap.last_handle);
            }
        }
        let subs: Vec<String> = snap.sub_objects.iter().map(ToString::to_string).collect();
        let _ = writeln!(out, "sub-objects.......... [{}]", subs.join(", "));
        let _ = writeln!(out, "ownership............ {}", snap.ownership);
        let _ = writeln!(out, "lifecycle............ {:?}", snap.lifecycle);
        let _ = writeln!(out, "created by language.. {}", snap.created_by_language);
        let _ = writeln!(out, "references........... {}", snap.ref_count);
        if let Some(parent) = snap.parent {
            let _ = writeln!(out, "parent............... {}", parent);
        }
        if !snap.children.is_empty() {
            let children: Vec<String> = snap.children.iter().map(ToString::to_string).collect();
            let _ = writeln!(out, "children............. [{}]", children.join(", "));
        }
        for (key, objects) in &snap.referred {
            let ids: Vec<String> = objects.iter().map(ToString::to_string).collect();
            let _ = writeln!(out, "referred[{}]: [{}]", key, ids.join(", "));
        }
        Ok(out)
    }

    pub fn snapshot(&self, wrapper: &Wrapper) -> Result<WrapperSnapshot> {
        self.with_record(wrapper, WrapperSnapshot::capture)
    }

    pub fn snapshot_json(&self, wrapper: &Wrapper) -> Result<String> {
        let snap = self.snapshot(wrapper)?;
        serde_json::to_string_pretty(&snap)
            .map_err(|err| crate::error::BindingError::type_mismatch("serializable snapshot", err.to_string()))
    }

    pub fn live_count(&self) -> usize {
        self.inner.state.lock().all_valid().len()
    }

    /// Lazy iterator over every valid wrapper that is still reachable
    pub fn all_live_wrappers(&self) -> LiveWrappers {
        LiveWrappers {
            runtime: self.clone(),
            ids: self.inner.state.lock().all_valid(),
            cursor: 0,
        }
    }
}

/// Iterator over a snapshot of wrapper ids
///
/// Wrappers are materialized on demand; ids invalidated since the snapshot
/// are skipped. `restart` rewinds without re-taking the snapshot.
pub struct LiveWrappers {
    runtime: Runtime,
    ids: Vec<WrapperId>,
    cursor: usize,
}

impl LiveWrappers {
    pub fn restart(&mut self) {
        self.cursor = 0;
    }

    /// Ids captured when the iterator was created
    pub fn ids(&self) -> &[WrapperId] {
        &self.ids
    }
}

impl Iterator for LiveWrappers {
    type Item = Wrapper;

    fn next(&mut self) -> Option<Wrapper> {
        while self.cursor < self.ids.len() {
            let id = self.ids[self.cursor];
            self.cursor += 1;
            let wrapper = {
                let state = self.runtime.inner.state.lock();
                state.get(id).filter(|r| r.is_valid()).and_then(WrapperRecord::upgrade)
            };
            if wrapper.is_some() {
                return wrapper;
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.ids.len() - self.cursor))
    }
}
