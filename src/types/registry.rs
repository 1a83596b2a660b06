//! Type registration and ancestor linearization

use super::spec::SpecKind;
use super::{
    Ancestor, DestructorAccess, EnumMeta, OverrideChain, OverrideEntry, TypeDescriptor, TypeKind,
    TypeSpec, TypeTag,
};
use crate::config::EnumScopePolicy;
use crate::error::{BindingError, Result};
use dashmap::DashMap;
use smallvec::{smallvec, SmallVec};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Concurrent table of every type known to a runtime
pub struct TypeRegistry {
    by_tag: DashMap<TypeTag, Arc<TypeDescriptor>>,
    by_name: DashMap<String, TypeTag>,
    enums: DashMap<TypeTag, Vec<EnumMeta>>,
    next_tag: AtomicU32,
    enum_scope: EnumScopePolicy,
}

impl TypeRegistry {
    pub fn new(enum_scope: EnumScopePolicy) -> Self {
        Self {
            by_tag: DashMap::new(),
            by_name: DashMap::new(),
            enums: DashMap::new(),
            next_tag: AtomicU32::new(1),
            enum_scope,
        }
    }

    /// Register a type; later registrations under the same name shadow earlier ones
    pub fn register(&self, spec: TypeSpec) -> Result<TypeTag> {
        let tag = TypeTag::new(self.next_tag.fetch_add(1, Ordering::Relaxed));
        let descriptor = match spec.kind {
            SpecKind::Native { ref bases } => {
                let mut ancestors: SmallVec<[Ancestor; 8]> = smallvec![Ancestor {
                    tag,
                    offset: 0,
                    shared: false,
                    ambiguous: false,
                }];
                for base in bases {
                    let base_desc = self.get(base.tag)?;
                    for inherited in base_desc.ancestors() {
                        merge_ancestor(
                            &mut ancestors,
                            Ancestor {
                                tag: inherited.tag,
                                offset: base.offset + inherited.offset,
                                shared: base.shared || inherited.shared,
                                ambiguous: inherited.ambiguous,
                            },
                        );
                    }
                }

                let mut overrides: HashMap<String, OverrideChain> = HashMap::new();
                for (method, func) in spec.overrides {
                    overrides.insert(method, Arc::from(vec![OverrideEntry { owner: tag, func }]));
                }

                TypeDescriptor {
                    tag,
                    name: spec.name,
                    scope: spec.scope,
                    kind: TypeKind::Native,
                    destructor: spec.destructor,
                    constructible: spec.constructible,
                    value_type: spec.value_type,
                    tracks_destruction: spec.tracks_destruction,
                    ancestors,
                    overrides,
                }
            }
            SpecKind::Language { parent } => {
                let parent = self.get(parent)?;
                if parent.destructor() == DestructorAccess::Private {
                    return Err(BindingError::forbidden(
                        &spec.name,
                        "derived from",
                        format!("{} has a private destructor", parent.name()),
                    ));
                }

                let mut ancestors: SmallVec<[Ancestor; 8]> = smallvec![Ancestor {
                    tag,
                    offset: 0,
                    shared: false,
                    ambiguous: false,
                }];
                ancestors.extend(parent.ancestors().iter().copied());

                let mut overrides = parent.overrides.clone();
                for (method, func) in spec.overrides {
                    let mut chain = vec![OverrideEntry { owner: tag, func }];
                    if let Some(inherited) = overrides.get(&method) {
                        chain.extend(inherited.iter().cloned());
                    }
                    overrides.insert(method, Arc::from(chain));
                }

                TypeDescriptor {
                    tag,
                    name: spec.name,
                    scope: spec.scope,
                    kind: TypeKind::Language {
                        native_base: parent.native_type(),
                    },
                    destructor: parent.destructor(),
                    constructible: parent.constructible,
                    value_type: parent.is_value_type(),
                    // The native shell of a language subtype always reports destruction
                    tracks_destruction: true,
                    ancestors,
                    overrides,
                }
            }
        };

        debug!(
            event = "type_registered",
            tag = tag.raw(),
            name = %descriptor.qualified_name(),
            ancestors = descriptor.ancestors().len(),
            "Type registered"
        );

        self.by_name.insert(descriptor.name.clone(), tag);
        self.by_tag.insert(tag, Arc::new(descriptor));
        Ok(tag)
    }

    pub fn get(&self, tag: TypeTag) -> Result<Arc<TypeDescriptor>> {
        self.by_tag
            .get(&tag)
            .map(|d| Arc::clone(d.value()))
            .ok_or_else(|| BindingError::UnknownType {
                name: tag.to_string(),
            })
    }

    pub fn lookup(&self, name: &str) -> Option<TypeTag> {
        self.by_name.get(name).map(|t| *t.value())
    }

    pub fn name_of(&self, tag: TypeTag) -> String {
        self.by_tag
            .get(&tag)
            .map(|d| d.name().to_string())
            .unwrap_or_else(|| tag.to_string())
    }

    pub fn is_subtype(&self, derived: TypeTag, base: TypeTag) -> bool {
        self.by_tag
            .get(&derived)
            .map(|d| d.is_subtype_of(base))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }

    /// Attach enum metadata to a registered type
    pub fn register_enum(
        &self,
        owner: TypeTag,
        name: impl Into<String>,
        values: &[(&str, i64)],
    ) -> Result<EnumMeta> {
        let owner_desc = self.get(owner)?;
        let mut owner_path = owner_desc.scope().to_vec();
        owner_path.push(owner_desc.name().to_string());

        let meta = EnumMeta {
            name: name.into(),
            owner_path,
            values: values.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
        };
        self.enums.entry(owner).or_default().push(meta.clone());
        Ok(meta)
    }

    pub fn enums_of(&self, owner: TypeTag) -> Vec<EnumMeta> {
        self.enums.get(&owner).map(|e| e.value().clone()).unwrap_or_default()
    }

    /// Scope reported for `meta` under this registry's naming policy
    pub fn enum_scope(&self, meta: &EnumMeta) -> String {
        meta.scope(self.enum_scope)
    }

    pub fn enum_scope_policy(&self) -> EnumScopePolicy {
        self.enum_scope
    }
}

/// Shared bases collapse into one sub-object; anything else reached twice at
/// different offsets cannot be cast to unambiguously
fn merge_ancestor(ancestors: &mut SmallVec<[Ancestor; 8]>, candidate: Ancestor) {
    match ancestors.iter_mut().find(|a| a.tag == candidate.tag) {
        Some(existing) => {
            let collapses = existing.shared && candidate.shared;
            if !collapses && existing.offset != candidate.offset {
                existing.ambiguous = true;
            }
            existing.ambiguous |= candidate.ambiguous;
        }
        None => ancestors.push(candidate),
    }
}
