//! Ownership entry points

use super::Runtime;
use crate::error::{BindingError, Result};
use crate::handle::NativeHandle;
use crate::invalidation::{ensure_valid, invalidate_tree};
use crate::ownership::{self, AttachOutcome, Graveyard, Ownership, TransferOutcome};
use crate::registry::Wrapper;
use tracing::trace;

impl Runtime {
    /// Record a parent change made on the language side
    ///
    /// Attaching to the current parent again changes nothing.
    pub fn set_parent(&self, child: &Wrapper, parent: Option<&Wrapper>) -> Result<()> {
        let mut grave = Graveyard::new();
        let result = {
            let mut state = self.inner.state.lock();
            ensure_valid(state.record(child.id())?)?;
            match parent {
                Some(parent) => {
                    ensure_valid(state.record(parent.id())?)?;
                    ownership::attach(&mut state, child, parent.id()).map(|outcome| {
                        if outcome == AttachOutcome::AlreadyAttached {
                            trace!(event = "reattach", wrapper = child.id().raw(), "Already attached to this parent");
                        }
                    })
                }
                None => ownership::detach(&mut state, child.id(), &mut grave).map(|_| ()),
            }
        };
        drop(grave);
        result
    }

    /// Native side moved `handle` under `new_parent` (or made it a root)
    ///
    /// Instances nobody wrapped yet are left alone; they are attached when
    /// they first cross the boundary.
    pub fn on_reparent(&self, handle: NativeHandle, new_parent: Option<NativeHandle>) -> Result<()> {
        let Some(child) = self.lookup(handle) else {
            return Ok(());
        };
        let parent = match new_parent {
            Some(addr) => match self.lookup(addr) {
                Some(parent) => Some(parent),
                None => {
                    let (primary, ty) = self
                        .backend()
                        .query_type(addr)
                        .ok_or_else(|| BindingError::type_mismatch("wrapped native parent", "unknown address"))?;
                    Some(self.wrap_handle(primary, ty, Ownership::NativeOwned)?)
                }
            },
            None => None,
        };
        self.set_parent(&child, parent.as_ref())
    }

    /// Hand the native resource to the native side
    pub fn transfer_to_native(&self, wrapper: &Wrapper) -> Result<()> {
        let mut grave = Graveyard::new();
        let result = {
            let mut state = self.inner.state.lock();
            ensure_valid(state.record(wrapper.id())?)?;
            let outcome = ownership::transfer_to_native(&mut state, wrapper);
            if let Ok(TransferOutcome::MustInvalidate) = outcome {
                invalidate_tree(&mut state, wrapper.id(), &self.inner.casts, &mut grave);
            }
            outcome.map(|_| ())
        };
        drop(grave);
        result
    }

    /// Give the native resource back to the language GC
    pub fn transfer_to_language(&self, wrapper: &Wrapper) -> Result<()> {
        let mut grave = Graveyard::new();
        let result = {
            let mut state = self.inner.state.lock();
            ensure_valid(state.record(wrapper.id())?)?;
            ownership::transfer_to_language(&mut state, wrapper.id(), &mut grave).map(|_| ())
        };
        drop(grave);
        result
    }

    pub fn set_ownership(&self, wrapper: &Wrapper, mode: Ownership) -> Result<()> {
        match mode {
            Ownership::LanguageOwned => self.transfer_to_language(wrapper),
            Ownership::NativeOwned => self.transfer_to_native(wrapper),
            Ownership::Shared => {
                let mut state = self.inner.state.lock();
                ensure_valid(state.record(wrapper.id())?)?;
                ownership::share(&mut state, wrapper.id()).map(|_| ())
            }
        }
    }

    /// Keep `object` alive for as long as `owner` (e.g. a model set on a view)
    pub fn keep_reference(&self, owner: &Wrapper, key: &str, object: &Wrapper, append: bool) -> Result<()> {
        let mut grave = Graveyard::new();
        let result = {
            let mut state = self.inner.state.lock();
            ensure_valid(state.record(owner.id())?)?;
            ownership::keep_reference(&mut state, owner.id(), key, object, append, &mut grave)
        };
        drop(grave);
        result
    }

    /// Drop one kept reference, or the whole `key` slot when `object` is `None`
    pub fn remove_reference(&self, owner: &Wrapper, key: &str, object: Option<&Wrapper>) -> Result<()> {
        let mut grave = Graveyard::new();
        let result = {
            let mut state = self.inner.state.lock();
            ownership::remove_reference(&mut state, owner.id(), key, object, &mut grave)
        };
        drop(grave);
        result
    }

    pub fn clear_references(&self, owner: &Wrapper) -> Result<()> {
        let mut grave = Graveyard::new();
        let result = {
            let mut state = self.inner.state.lock();
            ownership::clear_references(&mut state, owner.id(), &mut grave)
        };
        drop(grave);
        result
    }
}
