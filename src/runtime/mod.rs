//! Binding runtime - the service object tying registry, ownership,
//! invalidation, dispatch and casts together
//!
//! Design:
//! 1. One coarse lock (`state`) guards every record mutation
//! 2. The backend and language overrides are never called with that lock held
//! 3. References released under the lock are dropped after it (see `Graveyard`)
//! 4. Language-side entry points run under the `LanguageLock`
//!
//! Entry points are grouped by caller:
//! - native -> runtime: `on_construct`, `on_destruct`, `on_reparent`, `invoke_virtual`
//! - language -> runtime: `construct`, `call_method`, `set_parent`, `delete_wrapper`, ...
//! - runtime -> native: the `NativeBackend` trait

mod lifecycle;
mod marshal;
mod tracking;


use crate::cast::{CastResolver, CastStats};
use crate::config::{OverrideErrorPolicy, RuntimeConfig};
use crate::dispatch::park;
use crate::error::{BindingError, Result};
use crate::gil::{GilGuard, LanguageLock};
use crate::handle::NativeHandle;
use crate::logging::{log_runtime_error, log_runtime_init};
use crate::registry::{Registry, WrapperId};
use crate::types::{EnumMeta, TypeDescriptor, TypeRegistry, TypeSpec, TypeTag};
use crate::value::{NativeRef, Value};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Calls from the runtime into the native framework
///
/// Implementations must report destruction of instances of tracked types
/// through `Runtime::on_destruct` before the address can be reused.
pub trait NativeBackend: Send + Sync {
    /// Called once when the runtime is created
    fn bind_runtime(&self, _runtime: WeakRuntime) {}

    /// Create a native instance for a wrapper constructed from the language side
    fn construct(&self, ty: &TypeDescriptor, args: &[Value]) -> Result<NativeHandle>;

    /// Run the native implementation of `method`, bypassing language overrides
    fn call_default(&self, handle: NativeHandle, method: &str, args: &[Value]) -> Result<Value>;

    /// Destroy the native instance (and whatever it owns natively)
    fn delete_native(&self, handle: NativeHandle);

    /// Primary address and exact type of the instance containing `addr`
    fn query_type(&self, addr: NativeHandle) -> Option<(NativeHandle, TypeTag)>;

    /// Native parent of the instance, if the framework has one
    fn native_parent(&self, _handle: NativeHandle) -> Option<NativeRef> {
        None
    }
}

pub(crate) struct RuntimeInner {
    pub(crate) config: RuntimeConfig,
    pub(crate) types: TypeRegistry,
    pub(crate) state: Mutex<Registry>,
    pub(crate) casts: CastResolver,
    pub(crate) gil: LanguageLock,
    pub(crate) backend: Arc<dyn NativeBackend>,
    pub(crate) deferred_tx: flume::Sender<WrapperId>,
    pub(crate) deferred_rx: flume::Receiver<WrapperId>,
}

impl RuntimeInner {
    /// Last language reference to a shell went away
    pub(crate) fn finalize_shell(self: &Arc<Self>, id: WrapperId) {
        Runtime {
            inner: Arc::clone(self),
        }
        .finalize(id);
    }
}

/// Handle to a binding runtime; cheap to clone
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

/// Non-owning runtime handle, for backends
#[derive(Clone, Default)]
pub struct WeakRuntime(Weak<RuntimeInner>);

impl WeakRuntime {
    pub fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(|inner| Runtime { inner })
    }
}

impl fmt::Debug for WeakRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRuntime")
            .field("alive", &(self.0.strong_count() > 0))
            .finish()
    }
}

impl Runtime {
    pub fn new(backend: Arc<dyn NativeBackend>) -> Self {
        Self::with_config(RuntimeConfig::default(), backend)
    }

    pub fn with_config(config: RuntimeConfig, backend: Arc<dyn NativeBackend>) -> Self {
        let (deferred_tx, deferred_rx) = flume::unbounded();
        let capacity = config.registry.initial_capacity;
        let inner = Arc::new(RuntimeInner {
            types: TypeRegistry::new(config.naming.enum_scope),
            state: Mutex::new(Registry::with_capacity(capacity)),
            casts: CastResolver::new(&config.cast),
            gil: LanguageLock::new(),
            backend,
            deferred_tx,
            deferred_rx,
            config,
        });
        let runtime = Self { inner };
        runtime.inner.backend.bind_runtime(runtime.downgrade());
        log_runtime_init(capacity);
        runtime
    }

    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Arc::downgrade(&self.inner))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.inner.types
    }

    pub fn register_type(&self, spec: TypeSpec) -> Result<TypeTag> {
        self.inner.types.register(spec)
    }

    pub fn type_descriptor(&self, tag: TypeTag) -> Result<Arc<TypeDescriptor>> {
        self.inner.types.get(tag)
    }

    pub fn register_enum(&self, owner: TypeTag, name: &str, values: &[(&str, i64)]) -> Result<EnumMeta> {
        self.inner.types.register_enum(owner, name, values)
    }

    /// Enter language code on this thread
    pub fn gil(&self) -> GilGuard<'_> {
        self.inner.gil.acquire()
    }

    /// Run a blocking native operation with the language lock released
    pub fn allow_threads<T, F: FnOnce() -> T>(&self, f: F) -> T {
        self.inner.gil.allow_threads(f)
    }

    pub fn cast_stats(&self) -> CastStats {
        self.inner.casts.stats()
    }

    pub(crate) fn backend(&self) -> &dyn NativeBackend {
        self.inner.backend.as_ref()
    }

    /// Error from a language override reached the native caller
    pub(crate) fn override_failed(&self, err: BindingError) -> Result<Value> {
        log_runtime_error(&err);
        match self.inner.config.dispatch.error_policy {
            OverrideErrorPolicy::Propagate => Err(err),
            OverrideErrorPolicy::NativeSignal => match park(err) {
                Ok(()) => {
                    debug!(event = "override_error_parked", "Override error parked for the calling language frame");
                    Ok(Value::None)
                }
                // No language frame waiting on this thread, or it already holds one
                Err(err) => Err(err),
            },
        }
    }

    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Runtime")
            .field("types", &self.inner.types.len())
            .field("records", &state.len())
            .field("mapped_addresses", &state.mapped_addresses())
            .finish()
    }
}
