//! Native handle registry - the arena of wrapper records
//!
//! Design:
//! - One record per wrapper shell, keyed by `WrapperId`
//! - Every sub-object address of a bound native instance maps to its record,
//!   so a pointer to any base finds the same wrapper
//! - At most one live record per address; a slot is released synchronously
//!   from the destruction notification, before the address can be reused
//!
//! The registry is plain data. The runtime owns it behind a single coarse
//! lock together with the ownership and lifecycle state stored in each record.

mod wrapper;


pub use wrapper::{WeakWrapper, Wrapper, WrapperId};
pub(crate) use wrapper::Shell;

use crate::error::{BindingError, Result};
use crate::handle::NativeHandle;
use crate::invalidation::Lifecycle;
use crate::ownership::Ownership;
use crate::types::{TypeDescriptor, TypeTag};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Weak};

/// Bookkeeping for one wrapper shell
pub(crate) struct WrapperRecord {
    pub id: WrapperId,
    pub shell: Weak<Shell>,
    pub ty: Arc<TypeDescriptor>,
    /// Primary address; `None` once the native instance is gone
    pub handle: Option<NativeHandle>,
    pub last_handle: NativeHandle,
    /// Native type reported when the wrapper was bound
    pub last_known_type: String,
    pub addresses: SmallVec<[NativeHandle; 4]>,
    /// Whether `addresses` are currently mapped to this record
    pub bound: bool,
    pub ownership: Ownership,
    pub lifecycle: Lifecycle,
    pub created_by_language: bool,
    pub parent: Option<WrapperId>,
    pub children: BTreeSet<WrapperId>,
    /// Strong reference held on behalf of the native side
    pub keep_alive: Option<Wrapper>,
    pub referred: BTreeMap<String, Vec<Wrapper>>,
    pub in_flight: u32,
    pub pending_delete: bool,
}

impl WrapperRecord {
    pub(crate) fn new(
        id: WrapperId,
        shell: &Arc<Shell>,
        handle: NativeHandle,
        ownership: Ownership,
        created_by_language: bool,
        last_known_type: String,
    ) -> Self {
        let ty = Arc::clone(&shell.declared);
        let mut addresses: SmallVec<[NativeHandle; 4]> = SmallVec::new();
        for ancestor in ty.ancestors() {
            let addr = handle.offset(ancestor.offset);
            if !addresses.contains(&addr) {
                addresses.push(addr);
            }
        }

        Self {
            id,
            shell: Arc::downgrade(shell),
            ty,
            handle: Some(handle),
            last_handle: handle,
            last_known_type,
            addresses,
            bound: false,
            ownership,
            lifecycle: Lifecycle::Valid,
            created_by_language,
            parent: None,
            children: BTreeSet::new(),
            keep_alive: None,
            referred: BTreeMap::new(),
            in_flight: 0,
            pending_delete: false,
        }
    }

    /// Still reachable from the language side and not yet invalid
    pub fn is_live(&self) -> bool {
        self.lifecycle != Lifecycle::Invalid && self.shell.strong_count() > 0
    }

    pub fn is_valid(&self) -> bool {
        self.lifecycle == Lifecycle::Valid
    }

    pub fn upgrade(&self) -> Option<Wrapper> {
        self.shell
            .upgrade()
            .map(|shell| Wrapper::from_shell(shell, self.ty.tag()))
    }

    /// Error for use after the native instance is gone
    pub fn invalidated_error(&self) -> BindingError {
        BindingError::invalidated(self.ty.name(), &self.last_known_type, Some(self.last_handle))
    }
}

pub(crate) struct Registry {
    by_handle: HashMap<NativeHandle, WrapperId>,
    records: HashMap<WrapperId, WrapperRecord>,
    /// Exact native types announced by construction notifications
    native_types: HashMap<NativeHandle, TypeTag>,
    next_id: u64,
}

impl Registry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            by_handle: HashMap::with_capacity(capacity),
            records: HashMap::with_capacity(capacity),
            native_types: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn next_id(&mut self) -> WrapperId {
        let id = WrapperId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Insert a record and map all of its addresses
    pub fn register(&mut self, mut record: WrapperRecord) -> Result<WrapperId> {
        for addr in &record.addresses {
            if let Some(existing) = self.by_handle.get(addr).and_then(|id| self.records.get(id)) {
                if existing.is_live() {
                    return Err(BindingError::DuplicateRegistration {
                        handle: *addr,
                        existing_type: existing.ty.name().to_string(),
                        requested_type: record.ty.name().to_string(),
                    });
                }
            }
        }

        // Stale mappings left by shells that are mid-finalization
        for addr in record.addresses.clone() {
            if let Some(stale) = self.by_handle.get(&addr).copied() {
                self.release_slots(stale);
            }
        }

        for addr in &record.addresses {
            self.by_handle.insert(*addr, record.id);
        }
        record.bound = true;
        let id = record.id;
        self.records.insert(id, record);
        Ok(id)
    }

    /// Record bound at `handle` (any sub-object address), if it is still usable
    pub fn lookup(&self, handle: NativeHandle) -> Option<WrapperId> {
        let id = self.by_handle.get(&handle)?;
        let record = self.records.get(id)?;
        record.is_live().then_some(*id)
    }

    /// Record mapped at `handle`, live or not
    pub fn mapped(&self, handle: NativeHandle) -> Option<WrapperId> {
        self.by_handle.get(&handle).copied()
    }

    pub fn live_wrapper(&self, handle: NativeHandle) -> Option<Wrapper> {
        let id = self.lookup(handle)?;
        self.records.get(&id)?.upgrade()
    }

    /// Drop the mapping for `handle` and the other addresses of its record;
    /// absent handles are ignored
    pub fn unregister(&mut self, handle: NativeHandle) -> Option<WrapperId> {
        let id = self.by_handle.get(&handle).copied()?;
        self.release_slots(id);
        Some(id)
    }

    /// Unmap every address of `id` that still points at it
    pub fn release_slots(&mut self, id: WrapperId) {
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        if !record.bound {
            return;
        }
        record.bound = false;
        for addr in &record.addresses {
            if self.by_handle.get(addr) == Some(&id) {
                self.by_handle.remove(addr);
            }
        }
        // The address may already carry a newer instance of another type
        let primary = record.last_handle;
        let ty = &record.ty;
        if matches!(self.native_types.get(&primary), Some(noted) if *noted == ty.tag() || *noted == ty.native_type()) {
            self.native_types.remove(&primary);
        }
    }

    pub fn get(&self, id: WrapperId) -> Option<&WrapperRecord> {
        self.records.get(&id)
    }

    pub fn get_mut(&mut self, id: WrapperId) -> Option<&mut WrapperRecord> {
        self.records.get_mut(&id)
    }

    pub fn record(&self, id: WrapperId) -> Result<&WrapperRecord> {
        self.records.get(&id).ok_or(BindingError::UnknownWrapper { id: id.raw() })
    }

    pub fn record_mut(&mut self, id: WrapperId) -> Result<&mut WrapperRecord> {
        self.records
            .get_mut(&id)
            .ok_or(BindingError::UnknownWrapper { id: id.raw() })
    }

    pub fn remove(&mut self, id: WrapperId) -> Option<WrapperRecord> {
        self.release_slots(id);
        self.records.remove(&id)
    }

    /// Ids of all valid records, oldest first
    pub fn all_valid(&self) -> Vec<WrapperId> {
        let mut ids: Vec<WrapperId> = self
            .records
            .values()
            .filter(|r| r.is_valid() && r.shell.strong_count() > 0)
            .map(|r| r.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn ids(&self) -> Vec<WrapperId> {
        let mut ids: Vec<WrapperId> = self.records.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn mapped_addresses(&self) -> usize {
        self.by_handle.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn note_native_type(&mut self, handle: NativeHandle, ty: TypeTag) {
        self.native_types.insert(handle, ty);
    }

    pub fn native_type(&self, handle: NativeHandle) -> Option<TypeTag> {
        self.native_types.get(&handle).copied()
    }

    pub fn forget_native_type(&mut self, handle: NativeHandle) {
        self.native_types.remove(&handle);
    }
}
