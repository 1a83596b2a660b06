//! Language-visible proxies
//!
//! A `Wrapper` is a cheap clonable reference to a shell; the shell is the one
//! proxy object bound to a native instance. Clones and casts share the shell,
//! so identity is shell identity and the language-side reference count is the
//! shell's strong count.

use crate::runtime::RuntimeInner;
use crate::types::{TypeDescriptor, TypeTag};
use crate::value::Value;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

/// Stable identity of a wrapper shell, never reused within a runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WrapperId(pub(crate) u64);

impl WrapperId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WrapperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) struct Shell {
    pub(crate) id: WrapperId,
    pub(crate) declared: Arc<TypeDescriptor>,
    pub(crate) runtime: Weak<RuntimeInner>,
    attributes: Mutex<HashMap<String, Value>>,
}

impl Shell {
    pub(crate) fn new(id: WrapperId, declared: Arc<TypeDescriptor>, runtime: Weak<RuntimeInner>) -> Self {
        Self {
            id,
            declared,
            runtime,
            attributes: Mutex::new(HashMap::new()),
        }
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        // The language side released its last reference
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.finalize_shell(self.id);
        }
    }
}

/// Strong reference to a wrapper, viewed as one of its types
#[derive(Clone)]
pub struct Wrapper {
    pub(crate) shell: Arc<Shell>,
    pub(crate) view: TypeTag,
}

impl Wrapper {
    pub(crate) fn from_shell(shell: Arc<Shell>, view: TypeTag) -> Self {
        Self { shell, view }
    }

    #[inline]
    pub fn id(&self) -> WrapperId {
        self.shell.id
    }

    /// Most-derived type known when the wrapper was created
    pub fn declared_type(&self) -> &Arc<TypeDescriptor> {
        &self.shell.declared
    }

    /// Type this reference is currently viewed as
    pub fn view(&self) -> TypeTag {
        self.view
    }

    pub fn type_name(&self) -> &str {
        self.shell.declared.name()
    }

    /// Language-side references to the shell (including this one)
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.shell)
    }

    /// Same shell, regardless of view
    pub fn is(&self, other: &Wrapper) -> bool {
        Arc::ptr_eq(&self.shell, &other.shell)
    }

    pub fn downgrade(&self) -> WeakWrapper {
        WeakWrapper {
            shell: Arc::downgrade(&self.shell),
            view: self.view,
        }
    }

    pub fn set_attr(&self, name: impl Into<String>, value: Value) {
        self.shell.attributes.lock().insert(name.into(), value);
    }

    pub fn attr(&self, name: &str) -> Option<Value> {
        self.shell.attributes.lock().get(name).cloned()
    }
}

impl PartialEq for Wrapper {
    fn eq(&self, other: &Self) -> bool {
        self.is(other)
    }
}

impl Eq for Wrapper {}

impl Hash for Wrapper {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shell.id.hash(state);
    }
}

impl fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} object {} as {}>", self.type_name(), self.id(), self.view)
    }
}

/// Non-owning reference; does not keep the shell alive
#[derive(Clone)]
pub struct WeakWrapper {
    shell: Weak<Shell>,
    view: TypeTag,
}

impl WeakWrapper {
    pub fn upgrade(&self) -> Option<Wrapper> {
        self.shell.upgrade().map(|shell| Wrapper { shell, view: self.view })
    }

    pub fn is_alive(&self) -> bool {
        self.shell.strong_count() > 0
    }
}

impl fmt::Debug for WeakWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakWrapper").field("alive", &self.is_alive()).finish()
    }
}
