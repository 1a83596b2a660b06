//! Wrapper creation, destruction and finalization

use super::Runtime;
use crate::dispatch::LanguageFrame;
use crate::error::{BindingError, Result};
use crate::handle::NativeHandle;
use crate::invalidation::{ensure_valid, invalidate_tree, Lifecycle};
use crate::logging::{log_ownership_transfer, log_runtime_shutdown, log_wrapper_bound, perf};
use crate::ownership::{attach, unlink_parent, Graveyard, Ownership};
use crate::registry::{Shell, Wrapper, WrapperId, WrapperRecord};
use crate::types::{DestructorAccess, TypeDescriptor, TypeTag};
use crate::value::Value;
use std::sync::Arc;
use tracing::{debug, trace};

enum Finalize {
    /// Language side owned the native instance; destroy it
    DeleteNative(NativeHandle),
    Forget,
}

impl Runtime {
    /// Instantiate a wrapped type from the language side
    pub fn construct(&self, ty: TypeTag, args: Vec<Value>) -> Result<Wrapper> {
        let desc = self.inner.types.get(ty)?;
        if desc.destructor() == DestructorAccess::Private {
            return Err(BindingError::forbidden(desc.name(), "instantiated", "its destructor is private"));
        }
        if !desc.is_constructible() {
            return Err(BindingError::forbidden(desc.name(), "instantiated", "it has no accessible constructor"));
        }

        let _gil = self.inner.gil.acquire();
        let native_args = self.to_native_args(&args)?;
        let frame = LanguageFrame::enter();
        let constructed = self.backend().construct(&desc, &native_args);
        let handle = match frame.finish(Ok(())) {
            Ok(()) => constructed?,
            // An override run by the native constructor failed
            Err(err) => {
                if let Ok(handle) = constructed {
                    self.backend().delete_native(handle);
                }
                return Err(err);
            }
        };
        self.bind(handle, desc, Ownership::LanguageOwned, true)
    }

    /// Wrapper for a native instance that crossed the boundary, creating one
    /// if the address is not bound yet
    pub fn wrap_handle(&self, addr: NativeHandle, static_type: TypeTag, ownership: Ownership) -> Result<Wrapper> {
        if addr.is_null() {
            return Err(BindingError::type_mismatch(
                self.inner.types.name_of(static_type),
                "null handle",
            ));
        }
        if let Some(existing) = self.existing_view(addr, static_type) {
            return Ok(existing);
        }

        let static_desc = self.inner.types.get(static_type)?;
        let known = self.inner.state.lock().native_type(addr);
        let (primary, exact) = match known {
            Some(ty) => (addr, ty),
            None => self.backend().query_type(addr).unwrap_or((addr, static_type)),
        };
        let desc = match self.inner.types.get(exact) {
            Ok(desc) if desc.is_subtype_of(static_type) => desc,
            _ => static_desc,
        };
        let primary = if desc.tag() == exact { primary } else { addr };

        match self.bind(primary, desc, ownership, false) {
            Ok(wrapper) => Ok(view_as(wrapper, static_type)),
            // Another thread bound it first
            Err(err @ BindingError::DuplicateRegistration { .. }) => self.existing_view(addr, static_type).ok_or(err),
            Err(err) => Err(err),
        }
    }

    /// Explicit form of `wrap_handle` for instances allocated outside the runtime
    pub fn wrap_existing_handle(&self, addr: NativeHandle, ty: TypeTag) -> Result<Wrapper> {
        self.wrap_handle(addr, ty, Ownership::NativeOwned)
    }

    /// Live wrapper bound at `addr`, if any
    pub fn lookup(&self, addr: NativeHandle) -> Option<Wrapper> {
        self.inner.state.lock().live_wrapper(addr)
    }

    fn existing_view(&self, addr: NativeHandle, static_type: TypeTag) -> Option<Wrapper> {
        let wrapper = self.inner.state.lock().live_wrapper(addr)?;
        Some(view_as(wrapper, static_type))
    }

    fn bind(
        &self,
        primary: NativeHandle,
        desc: Arc<TypeDescriptor>,
        ownership: Ownership,
        created_by_language: bool,
    ) -> Result<Wrapper> {
        let id = self.inner.state.lock().next_id();
        let last_known = self.inner.types.name_of(desc.native_type());
        let shell = Arc::new(Shell::new(id, Arc::clone(&desc), Arc::downgrade(&self.inner)));
        let record = WrapperRecord::new(id, &shell, primary, ownership, created_by_language, last_known);
        let registered = {
            let mut state = self.inner.state.lock();
            state.register(record)
        };
        registered?;
        log_wrapper_bound(id.raw(), primary, desc.name(), ownership);

        let wrapper = Wrapper::from_shell(shell, desc.tag());
        if let Some(parent) = self.backend().native_parent(primary) {
            let parent = self.wrap_handle(parent.handle, parent.static_type, Ownership::NativeOwned)?;
            let mut state = self.inner.state.lock();
            attach(&mut state, &wrapper, parent.id())?;
        }
        Ok(wrapper)
    }

    /// Native side announces a freshly constructed instance
    pub fn on_construct(&self, handle: NativeHandle, ty: TypeTag) {
        trace!(event = "native_construct", handle = %handle, ty = ty.raw(), "Native instance constructed");
        self.inner.state.lock().note_native_type(handle, ty);
    }

    /// Native side announces destruction; invalidates the wrapper tree and
    /// releases the registry slots before returning
    pub fn on_destruct(&self, handle: NativeHandle) {
        let mut grave = Graveyard::new();
        {
            let mut state = self.inner.state.lock();
            state.forget_native_type(handle);
            if let Some(id) = state.mapped(handle) {
                invalidate_tree(&mut state, id, &self.inner.casts, &mut grave);
            }
        }
        drop(grave);
    }

    /// Destroy the native instance behind a language-owned wrapper
    pub fn delete_wrapper(&self, wrapper: &Wrapper) -> Result<()> {
        let handle = {
            let state = self.inner.state.lock();
            let record = state.record(wrapper.id())?;
            ensure_valid(record)?;
            if record.ownership == Ownership::NativeOwned {
                return Err(BindingError::OwnershipConflict {
                    declared_type: record.ty.name().to_string(),
                    ownership: record.ownership,
                    reason: "the native side owns it; transfer ownership to the language first".into(),
                });
            }
            record.handle.unwrap_or(record.last_handle)
        };
        debug!(event = "delete_wrapper", wrapper = wrapper.id().raw(), handle = %handle, "Deleting native instance");
        self.backend().delete_native(handle);
        self.finish_destruction(wrapper.id());
        Ok(())
    }

    /// Invalidate without destroying the native instance
    pub fn invalidate(&self, wrapper: &Wrapper) -> Result<()> {
        let mut grave = Graveyard::new();
        {
            let mut state = self.inner.state.lock();
            state.record(wrapper.id())?;
            invalidate_tree(&mut state, wrapper.id(), &self.inner.casts, &mut grave);
        }
        drop(grave);
        Ok(())
    }

    /// Queue native deletion; the wrapper stays native-owned until
    /// `process_deferred_deletes` runs
    pub fn delete_later(&self, wrapper: &Wrapper) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            let record = state.record_mut(wrapper.id())?;
            ensure_valid(record)?;
            if record.pending_delete {
                return Ok(());
            }
            record.pending_delete = true;
            if record.keep_alive.is_none() {
                record.keep_alive = Some(wrapper.clone());
            }
            if record.ownership != Ownership::NativeOwned {
                log_ownership_transfer(wrapper.id().raw(), record.ownership, Ownership::NativeOwned, "deferred delete");
                record.ownership = Ownership::NativeOwned;
            }
        }
        // Receiver lives as long as the runtime
        let _ = self.inner.deferred_tx.send(wrapper.id());
        Ok(())
    }

    /// Execute queued deferred deletions; returns how many ran
    pub fn process_deferred_deletes(&self) -> usize {
        let _perf = perf::track("process_deferred_deletes");
        let mut executed = 0;
        for id in self.inner.deferred_rx.try_iter() {
            let handle = {
                let state = self.inner.state.lock();
                match state.get(id) {
                    Some(record) if record.pending_delete && record.lifecycle == Lifecycle::Valid => {
                        record.handle
                    }
                    _ => None,
                }
            };
            if let Some(handle) = handle {
                self.backend().delete_native(handle);
                self.finish_destruction(id);
                executed += 1;
            }
        }
        executed
    }

    /// Complete invalidation after the backend destroyed an instance; needed
    /// for types whose destruction the native side does not report
    fn finish_destruction(&self, id: WrapperId) {
        let mut grave = Graveyard::new();
        {
            let mut state = self.inner.state.lock();
            if state.get(id).is_some() {
                invalidate_tree(&mut state, id, &self.inner.casts, &mut grave);
            }
        }
        drop(grave);
    }

    /// Shell reclaimed by the language side
    pub(crate) fn finalize(&self, id: WrapperId) {
        let mut grave = Graveyard::new();
        let action = {
            let mut state = self.inner.state.lock();
            let Some(record) = state.get(id) else {
                return;
            };
            match (record.lifecycle, record.ownership, record.handle) {
                (Lifecycle::Valid, Ownership::LanguageOwned, Some(handle)) => Finalize::DeleteNative(handle),
                _ => {
                    unlink_parent(&mut state, id);
                    if let Some(mut record) = state.remove(id) {
                        for child in std::mem::take(&mut record.children) {
                            if let Some(child_record) = state.get_mut(child) {
                                child_record.parent = None;
                            }
                        }
                        for (_, objects) in std::mem::take(&mut record.referred) {
                            grave.extend(objects);
                        }
                        grave.extend(record.keep_alive.take());
                    }
                    Finalize::Forget
                }
            }
        };

        if let Finalize::DeleteNative(handle) = action {
            trace!(event = "finalize_delete", wrapper = id.raw(), handle = %handle, "Finalizing language-owned instance");
            self.backend().delete_native(handle);
            let removed = {
                let mut state = self.inner.state.lock();
                if state.get(id).is_some() {
                    invalidate_tree(&mut state, id, &self.inner.casts, &mut grave);
                }
                state.remove(id)
            };
            drop(removed);
        }
        drop(grave);
    }

    /// Tear down every wrapper: language-owned roots are destroyed natively,
    /// everything else is invalidated
    pub fn shutdown(&self) {
        let _perf = perf::track("shutdown");
        let (roots, all) = {
            let state = self.inner.state.lock();
            let all = state.all_valid();
            let roots: Vec<(WrapperId, NativeHandle)> = all
                .iter()
                .filter_map(|id| state.get(*id))
                .filter(|r| r.ownership == Ownership::LanguageOwned && r.parent.is_none())
                .filter_map(|r| r.handle.map(|h| (r.id, h)))
                .collect();
            (roots, all)
        };
        log_runtime_shutdown(all.len());

        for (id, handle) in roots {
            self.backend().delete_native(handle);
            self.finish_destruction(id);
        }
        for id in all {
            self.finish_destruction(id);
        }
        for _ in self.inner.deferred_rx.try_iter() {}
    }
}

fn view_as(wrapper: Wrapper, static_type: TypeTag) -> Wrapper {
    if wrapper.declared_type().is_subtype_of(static_type) {
        Wrapper::from_shell(wrapper.shell, static_type)
    } else {
        wrapper
    }
}
