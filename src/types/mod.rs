//! Wrapped type metadata
//!
//! Design: every wrapped type is described once, at registration time:
//! 1. Ancestor set linearized into (tag, sub-object offset) pairs
//! 2. Override table (method -> chain of language overrides, most derived first)
//! 3. Construction rules (destructor access, abstractness, value semantics)
//!
//! Nothing here is consulted reflectively at call time; casts and dispatch are
//! table lookups against the descriptor.

mod enums;
mod registry;
mod spec;


pub use enums::EnumMeta;
pub use registry::TypeRegistry;
pub use spec::{BaseSpec, TypeSpec};

use crate::dispatch::Override;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Registry-assigned identity of a wrapped type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeTag(u32);

impl TypeTag {
    #[inline]
    pub(crate) const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestructorAccess {
    Public,
    /// Instances come only from native factories; no language construction or subtyping
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Type defined by the native framework
    Native,
    /// Type defined by the language program on top of a native type
    Language { native_base: TypeTag },
}

/// One entry of a type's linearized ancestor set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ancestor {
    pub tag: TypeTag,
    /// Adjustor from the object's primary address to this base sub-object
    pub offset: isize,
    /// Reached through a shared (virtual) base somewhere on the path
    pub shared: bool,
    /// Reachable through several non-shared paths with different offsets
    pub ambiguous: bool,
}

/// A language override plus the type that declared it
#[derive(Clone)]
pub struct OverrideEntry {
    pub owner: TypeTag,
    pub func: Override,
}

impl fmt::Debug for OverrideEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverrideEntry").field("owner", &self.owner).finish_non_exhaustive()
    }
}

pub type OverrideChain = Arc<[OverrideEntry]>;

pub struct TypeDescriptor {
    tag: TypeTag,
    name: String,
    scope: Vec<String>,
    kind: TypeKind,
    destructor: DestructorAccess,
    constructible: bool,
    value_type: bool,
    tracks_destruction: bool,
    ancestors: SmallVec<[Ancestor; 8]>,
    overrides: HashMap<String, OverrideChain>,
}

impl TypeDescriptor {
    #[inline]
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enclosing type names, outermost first
    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    /// Dotted path including enclosing types
    pub fn qualified_name(&self) -> String {
        if self.scope.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.scope.join("."), self.name)
        }
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// True for types defined by the language program
    pub fn is_language_type(&self) -> bool {
        matches!(self.kind, TypeKind::Language { .. })
    }

    /// Most-derived native type underlying this type
    pub fn native_type(&self) -> TypeTag {
        match self.kind {
            TypeKind::Native => self.tag,
            TypeKind::Language { native_base } => native_base,
        }
    }

    pub fn destructor(&self) -> DestructorAccess {
        self.destructor
    }

    pub fn is_constructible(&self) -> bool {
        self.constructible && self.destructor == DestructorAccess::Public
    }

    pub fn is_value_type(&self) -> bool {
        self.value_type
    }

    /// Whether the native side reports destruction of instances of this type
    pub fn tracks_destruction(&self) -> bool {
        self.tracks_destruction
    }

    /// Linearized ancestor set, the type itself first
    pub fn ancestors(&self) -> &[Ancestor] {
        &self.ancestors
    }

    pub fn ancestor(&self, tag: TypeTag) -> Option<&Ancestor> {
        self.ancestors.iter().find(|a| a.tag == tag)
    }

    pub fn is_subtype_of(&self, tag: TypeTag) -> bool {
        self.ancestor(tag).is_some()
    }

    pub fn override_chain(&self, method: &str) -> Option<OverrideChain> {
        self.overrides.get(method).cloned()
    }

    pub fn overrides(&self, method: &str) -> bool {
        self.overrides.contains_key(method)
    }

    pub fn overridden_methods(&self) -> impl Iterator<Item = &str> {
        self.overrides.keys().map(String::as_str)
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("tag", &self.tag)
            .field("name", &self.qualified_name())
            .field("kind", &self.kind)
            .field("ancestors", &self.ancestors)
            .field("overrides", &self.overrides.keys().collect::<Vec<_>>())
            .finish()
    }
}
