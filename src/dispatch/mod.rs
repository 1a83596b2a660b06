//! Virtual dispatch trampoline
//!
//! Design:
//! - Overrides are found in the per-type table built at registration, never
//!   by reflection at call time
//! - A base call goes straight to the backend and marks (address, method) as
//!   "in base call" on the current thread; a virtual call that re-enters for
//!   the same pair while the mark is set runs the native default instead of
//!   the override again
//! - Errors raised by overrides follow `OverrideErrorPolicy` when the call
//!   came from native code; language-initiated calls always propagate
//! - Under the native-signal policy an error is parked on the innermost
//!   language frame of the current thread and raised when the native call
//!   that frame made returns; no override runs while it is parked
//! - An invalidating wrapper accepts no new calls, only the frames already
//!   running on it finish
//!
//! Performance: one registry lookup and one table lookup per native-initiated
//! call; the recursion guard is a thread-local stack scan.


use crate::config::OverrideErrorPolicy;
use crate::error::{BindingError, Result};
use crate::handle::NativeHandle;
use crate::invalidation::{ensure_valid, settle};
use crate::logging::log_dispatch;
use crate::registry::{Wrapper, WrapperId};
use crate::runtime::Runtime;
use crate::types::{OverrideChain, TypeTag};
use crate::value::Value;
use std::cell::RefCell;
use std::sync::Arc;

/// Language implementation of a virtual method
pub type Override = Arc<dyn Fn(&mut CallFrame<'_>, Vec<Value>) -> Result<Value> + Send + Sync>;

thread_local! {
    static BASE_CALLS: RefCell<Vec<(NativeHandle, String)>> = const { RefCell::new(Vec::new()) };
}

struct BaseCallGuard;

impl BaseCallGuard {
    fn enter(handle: NativeHandle, method: &str) -> Self {
        BASE_CALLS.with(|calls| calls.borrow_mut().push((handle, method.to_string())));
        BaseCallGuard
    }
}

impl Drop for BaseCallGuard {
    fn drop(&mut self) {
        BASE_CALLS.with(|calls| {
            calls.borrow_mut().pop();
        });
    }
}

fn in_base_call(handle: NativeHandle, method: &str) -> bool {
    BASE_CALLS.with(|calls| calls.borrow().iter().any(|(h, m)| *h == handle && m == method))
}

thread_local! {
    /// One slot per language frame currently waiting on a native call
    static PARKED: RefCell<Vec<Option<BindingError>>> = const { RefCell::new(Vec::new()) };
}

/// Language frame that entered native code; collects the override error
/// parked while the native call runs
pub(crate) struct LanguageFrame;

impl LanguageFrame {
    pub(crate) fn enter() -> Self {
        PARKED.with(|parked| parked.borrow_mut().push(None));
        LanguageFrame
    }

    /// Native call returned: hand back `result`, or the parked error
    pub(crate) fn finish<T>(self, result: Result<T>) -> Result<T> {
        let parked = PARKED.with(|parked| parked.borrow_mut().last_mut().and_then(Option::take));
        match parked {
            Some(err) => Err(err),
            None => result,
        }
    }
}

impl Drop for LanguageFrame {
    fn drop(&mut self) {
        PARKED.with(|parked| {
            parked.borrow_mut().pop();
        });
    }
}

/// Whether the innermost language frame already holds an error
fn error_parked() -> bool {
    PARKED.with(|parked| matches!(parked.borrow().last(), Some(Some(_))))
}

/// Park `err` on the innermost language frame; gives it back when this
/// thread has none or the slot is taken
pub(crate) fn park(err: BindingError) -> std::result::Result<(), BindingError> {
    PARKED.with(|parked| {
        let mut parked = parked.borrow_mut();
        match parked.last_mut() {
            Some(slot) if slot.is_none() => {
                *slot = Some(err);
                Ok(())
            }
            _ => Err(err),
        }
    })
}

/// Counts a call that uses the native instance; completes a pending
/// invalidation when the last one leaves
struct InFlight<'a> {
    runtime: &'a Runtime,
    id: WrapperId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.runtime.inner.state.lock();
        if let Some(record) = state.get_mut(self.id) {
            record.in_flight = record.in_flight.saturating_sub(1);
            settle(record);
        }
    }
}

/// Context handed to a running override
pub struct CallFrame<'a> {
    runtime: &'a Runtime,
    this: Wrapper,
    method: &'a str,
    chain: OverrideChain,
    depth: usize,
}

impl<'a> CallFrame<'a> {
    pub fn this(&self) -> &Wrapper {
        &self.this
    }

    pub fn runtime(&self) -> &'a Runtime {
        self.runtime
    }

    pub fn method(&self) -> &str {
        self.method
    }

    /// Type whose override is executing
    pub fn owner(&self) -> TypeTag {
        self.chain[self.depth].owner
    }

    /// Next implementation up the hierarchy: the parent type's override if
    /// there is one, otherwise the native default
    pub fn call_super(&mut self, args: Vec<Value>) -> Result<Value> {
        if self.depth + 1 < self.chain.len() {
            let next = Arc::clone(&self.chain[self.depth + 1].func);
            self.depth += 1;
            let result = next(self, args);
            self.depth -= 1;
            result
        } else {
            self.runtime.native_call(&self.this, self.method, args)
        }
    }

    /// Native default, skipping every remaining language override
    pub fn call_native_base(&self, args: Vec<Value>) -> Result<Value> {
        self.runtime.native_call(&self.this, self.method, args)
    }

    /// Call another method (dispatching to overrides) on any wrapper
    pub fn call(&self, target: &Wrapper, method: &str, args: Vec<Value>) -> Result<Value> {
        self.runtime.call_method(target, method, args)
    }

    /// Exception raised by this override
    pub fn raise(&self, message: impl Into<String>) -> BindingError {
        BindingError::raised(self.this.type_name(), self.method, message)
    }
}

impl Runtime {
    /// Native code invoked a virtual method on `handle`
    pub fn invoke_virtual(&self, handle: NativeHandle, method: &str, args: Vec<Value>) -> Result<Value> {
        let target = {
            let state = self.inner.state.lock();
            state
                .lookup(handle)
                .and_then(|id| state.get(id))
                .and_then(|record| Some((record.upgrade()?, record.handle.unwrap_or(record.last_handle))))
        };

        let Some((this, primary)) = target else {
            log_dispatch(handle, method, false);
            return self.backend().call_default(handle, method, &args);
        };
        let chain = match this.declared_type().override_chain(method) {
            Some(chain) if !in_base_call(primary, method) => chain,
            _ => {
                log_dispatch(primary, method, false);
                return self.backend().call_default(primary, method, &args);
            }
        };
        if self.inner.config.dispatch.error_policy == OverrideErrorPolicy::NativeSignal && error_parked() {
            log_dispatch(primary, method, false);
            return Ok(Value::None);
        }
        log_dispatch(primary, method, true);

        let _gil = self.inner.gil.acquire();
        let _flight = self.enter_call(this.id())?;

        let mut after_use = Vec::new();
        let converted = args
            .into_iter()
            .map(|arg| self.to_language(arg, &mut after_use))
            .collect::<Result<Vec<_>>>();
        let result = converted.and_then(|args| self.run_chain(this, chain, 0, method, args));

        for wrapper in &after_use {
            // Already gone when the override deleted it itself
            let _ = self.invalidate(wrapper);
        }
        drop(after_use);

        match result {
            Ok(value) => self.to_native(&value),
            Err(err) => self.override_failed(err),
        }
    }

    /// Language-side method call: overrides first, then the native implementation
    pub fn call_method(&self, target: &Wrapper, method: &str, args: Vec<Value>) -> Result<Value> {
        let _gil = self.inner.gil.acquire();
        match target.declared_type().override_chain(method) {
            Some(chain) => {
                let _flight = self.enter_call(target.id())?;
                self.run_chain(target.clone(), chain, 0, method, args)
            }
            None => self.native_call(target, method, args),
        }
    }

    /// Explicit call of the native base implementation (`Base.method(obj)`)
    pub fn call_base(&self, target: &Wrapper, method: &str, args: Vec<Value>) -> Result<Value> {
        let _gil = self.inner.gil.acquire();
        self.native_call(target, method, args)
    }

    /// Call the implementation `owner` sees (`Owner.method(obj)`): the nearest
    /// override at or above `owner`, else the native default
    pub fn call_method_as(&self, target: &Wrapper, owner: TypeTag, method: &str, args: Vec<Value>) -> Result<Value> {
        let owner_desc = self.inner.types.get(owner)?;
        if !target.declared_type().is_subtype_of(owner) {
            return Err(BindingError::type_mismatch(owner_desc.name(), target.type_name()));
        }
        let _gil = self.inner.gil.acquire();
        let chain = target.declared_type().override_chain(method);
        let start = chain
            .as_ref()
            .and_then(|chain| chain.iter().position(|entry| owner_desc.is_subtype_of(entry.owner)));
        match (chain, start) {
            (Some(chain), Some(start)) => {
                let _flight = self.enter_call(target.id())?;
                self.run_chain(target.clone(), chain, start, method, args)
            }
            _ => self.native_call(target, method, args),
        }
    }

    fn run_chain(
        &self,
        this: Wrapper,
        chain: OverrideChain,
        start: usize,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let func = Arc::clone(&chain[start].func);
        let mut frame = CallFrame {
            runtime: self,
            this,
            method,
            chain,
            depth: start,
        };
        func(&mut frame, args)
    }

    /// Backend call with the recursion guard set
    pub(crate) fn native_call(&self, target: &Wrapper, method: &str, args: Vec<Value>) -> Result<Value> {
        let primary = {
            let state = self.inner.state.lock();
            let record = state.record(target.id())?;
            ensure_valid(record)?;
            record.handle.ok_or_else(|| record.invalidated_error())?
        };
        let _flight = self.enter_call(target.id())?;
        let native_args = self.to_native_args(&args)?;

        let result = {
            let _guard = BaseCallGuard::enter(primary, method);
            let frame = LanguageFrame::enter();
            let result = self.backend().call_default(primary, method, &native_args);
            frame.finish(result)?
        };

        let mut after_use = Vec::new();
        let value = self.to_language(result, &mut after_use)?;
        for wrapper in &after_use {
            let _ = self.invalidate(wrapper);
        }
        Ok(value)
    }

    fn enter_call(&self, id: WrapperId) -> Result<InFlight<'_>> {
        let mut state = self.inner.state.lock();
        let record = state.record_mut(id)?;
        ensure_valid(record)?;
        record.in_flight += 1;
        Ok(InFlight { runtime: self, id })
    }
}
