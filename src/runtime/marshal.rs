//! Value conversion at the boundary
//!
//! Design: identity preserving in both directions
//! - Object -> Native: address of the sub-object for the wrapper's current view
//! - Native -> Object: registry lookup first, a new wrapper only for unknown addresses
//! - Ref cells pass through untouched, so mutations are shared

use super::Runtime;
use crate::error::Result;
use crate::invalidation::ensure_valid;
use crate::ownership::Ownership;
use crate::registry::Wrapper;
use crate::value::{ArgPolicy, NativeRef, Value};

impl Runtime {
    pub(crate) fn to_native(&self, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::Object(wrapper) => Value::Native(self.native_ref(wrapper)?),
            Value::List(items) => Value::List(self.to_native_args(items)?),
            other => other.clone(),
        })
    }

    pub(crate) fn to_native_args(&self, args: &[Value]) -> Result<Vec<Value>> {
        args.iter().map(|arg| self.to_native(arg)).collect()
    }

    /// Address and static type native code sees for `wrapper`
    pub(crate) fn native_ref(&self, wrapper: &Wrapper) -> Result<NativeRef> {
        let primary = {
            let state = self.inner.state.lock();
            let record = state.record(wrapper.id())?;
            ensure_valid(record)?;
            record.handle.ok_or_else(|| record.invalidated_error())?
        };
        let (addr, _) = self
            .inner
            .casts
            .resolve(wrapper.declared_type(), primary, wrapper.view())
            .map_err(|reason| self.cast_error(wrapper, wrapper.view(), reason))?;
        Ok(NativeRef::new(addr, wrapper.view()))
    }

    /// Convert a native value; wrappers that must die after the call are
    /// collected into `after_use`
    pub(crate) fn to_language(&self, value: Value, after_use: &mut Vec<Wrapper>) -> Result<Value> {
        Ok(match value {
            Value::Native(native) if native.handle.is_null() => Value::None,
            Value::Native(native) => {
                let wrapper = self.wrap_handle(native.handle, native.static_type, Ownership::NativeOwned)?;
                if native.policy == ArgPolicy::InvalidateAfterUse {
                    after_use.push(wrapper.clone());
                }
                Value::Object(wrapper)
            }
            Value::List(items) => Value::List(
                items
                    .into_iter()
                    .map(|item| self.to_language(item, after_use))
                    .collect::<Result<Vec<_>>>()?,
            ),
            other => other,
        })
    }
}
