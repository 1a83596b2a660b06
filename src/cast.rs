//! Multiple-inheritance cast resolver
//!
//! Casting never creates a wrapper: the result shares the source shell and
//! only the view changes. The resolver's job is the address arithmetic
//! (primary address + base adjustor), answered from the ancestor table and
//! memoized in an LRU keyed by primary address, exact type and target type.

use crate::config::CastConfig;
use crate::error::{BindingError, CastFailure, Result};
use crate::handle::NativeHandle;
use crate::invalidation::ensure_valid;
use crate::logging::{log_cast, log_runtime_error};
use crate::registry::Wrapper;
use crate::runtime::Runtime;
use crate::types::{TypeDescriptor, TypeTag};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// (primary address, exact type, target type)
type CacheKey = (NativeHandle, TypeTag, TypeTag);

pub(crate) struct CastResolver {
    cache: Option<Mutex<LruCache<CacheKey, NativeHandle>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Cache effectiveness counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CastStats {
    pub hits: u64,
    pub misses: u64,
    pub cached: usize,
}

impl CastResolver {
    pub fn new(config: &CastConfig) -> Self {
        let cache = if config.cache_enabled {
            NonZeroUsize::new(config.cache_capacity).map(|cap| Mutex::new(LruCache::new(cap)))
        } else {
            None
        };
        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Address of the `target` sub-object of an instance of `ty` at `primary`
    ///
    /// The boolean is true when the answer came from the cache.
    pub fn resolve(
        &self,
        ty: &TypeDescriptor,
        primary: NativeHandle,
        target: TypeTag,
    ) -> std::result::Result<(NativeHandle, bool), CastFailure> {
        if let Some(cache) = &self.cache {
            if let Some(addr) = cache.lock().get(&(primary, ty.tag(), target)) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok((*addr, true));
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let ancestor = ty.ancestor(target).ok_or(CastFailure::Unreachable)?;
        if ancestor.ambiguous {
            return Err(CastFailure::Ambiguous);
        }
        let addr = primary.offset(ancestor.offset);

        if let Some(cache) = &self.cache {
            cache.lock().put((primary, ty.tag(), target), addr);
        }
        Ok((addr, false))
    }

    /// Forget every cached answer for the instance at `primary`
    pub fn purge(&self, primary: NativeHandle, ty: &TypeDescriptor) {
        if let Some(cache) = &self.cache {
            let mut cache = cache.lock();
            for ancestor in ty.ancestors() {
                cache.pop(&(primary, ty.tag(), ancestor.tag));
            }
        }
    }

    pub fn stats(&self) -> CastStats {
        CastStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            cached: self.cache.as_ref().map(|c| c.lock().len()).unwrap_or(0),
        }
    }
}

impl Runtime {
    /// Re-type `wrapper` as `target`; the result is the same object
    pub fn cast_to(&self, wrapper: &Wrapper, target: TypeTag) -> Result<Wrapper> {
        let primary = {
            let state = self.inner.state.lock();
            let record = state.record(wrapper.id())?;
            ensure_valid(record)?;
            record.handle.unwrap_or(record.last_handle)
        };
        let (_, cached) = self
            .inner
            .casts
            .resolve(wrapper.declared_type(), primary, target)
            .map_err(|reason| self.cast_error(wrapper, target, reason))?;
        log_cast(wrapper.id().raw(), &self.inner.types.name_of(target), cached);
        Ok(Wrapper::from_shell(Arc::clone(&wrapper.shell), target))
    }

    /// Native address of the sub-object for the wrapper's current view
    pub fn address_of(&self, wrapper: &Wrapper) -> Result<NativeHandle> {
        self.native_ref(wrapper).map(|r| r.handle)
    }

    pub(crate) fn cast_error(&self, wrapper: &Wrapper, target: TypeTag, reason: CastFailure) -> BindingError {
        let err = BindingError::CastResolution {
            declared_type: wrapper.type_name().to_string(),
            target_type: self.inner.types.name_of(target),
            reason,
        };
        log_runtime_error(&err);
        err
    }
}
