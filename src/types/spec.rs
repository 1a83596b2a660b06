//! Declarative type descriptions handed to the registry

use super::{DestructorAccess, TypeTag};
use crate::dispatch::{CallFrame, Override};
use crate::error::Result;
use crate::value::Value;
use std::sync::Arc;

/// A direct native base of a native type
#[derive(Debug, Clone, Copy)]
pub struct BaseSpec {
    pub tag: TypeTag,
    pub offset: isize,
    /// Shared (virtual) base: repeated occurrences collapse into one sub-object
    pub shared: bool,
}

pub(crate) enum SpecKind {
    Native { bases: Vec<BaseSpec> },
    Language { parent: TypeTag },
}

pub struct TypeSpec {
    pub(crate) name: String,
    pub(crate) scope: Vec<String>,
    pub(crate) kind: SpecKind,
    pub(crate) destructor: DestructorAccess,
    pub(crate) constructible: bool,
    pub(crate) value_type: bool,
    pub(crate) tracks_destruction: bool,
    pub(crate) overrides: Vec<(String, Override)>,
}

impl TypeSpec {
    /// Type provided by the native framework
    pub fn native(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: Vec::new(),
            kind: SpecKind::Native { bases: Vec::new() },
            destructor: DestructorAccess::Public,
            constructible: true,
            value_type: false,
            tracks_destruction: true,
            overrides: Vec::new(),
        }
    }

    /// Language-defined subtype of `parent`
    pub fn subtype(name: impl Into<String>, parent: TypeTag) -> Self {
        Self {
            kind: SpecKind::Language { parent },
            ..Self::native(name)
        }
    }

    pub fn base(mut self, tag: TypeTag, offset: isize) -> Self {
        if let SpecKind::Native { bases } = &mut self.kind {
            bases.push(BaseSpec { tag, offset, shared: false });
        }
        self
    }

    pub fn shared_base(mut self, tag: TypeTag, offset: isize) -> Self {
        if let SpecKind::Native { bases } = &mut self.kind {
            bases.push(BaseSpec { tag, offset, shared: true });
        }
        self
    }

    /// Declare enclosing types, outermost first
    pub fn nested_in<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scope.into_iter().map(Into::into).collect();
        self
    }

    pub fn private_destructor(mut self) -> Self {
        self.destructor = DestructorAccess::Private;
        self
    }

    /// No accessible constructor (abstract or factory-only)
    pub fn abstract_type(mut self) -> Self {
        self.constructible = false;
        self
    }

    pub fn value_type(mut self) -> Self {
        self.value_type = true;
        self
    }

    /// The native side never reports destruction of these instances
    pub fn untracked(mut self) -> Self {
        self.tracks_destruction = false;
        self
    }

    pub fn override_method<F>(mut self, method: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut CallFrame<'_>, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.overrides.push((method.into(), Arc::new(func)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
