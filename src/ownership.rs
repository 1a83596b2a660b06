//! Ownership tracker - which side destroys the native resource
//!
//! Design:
//! - Ownership lives in the wrapper record, guarded by the registry lock
//! - A native parent edge implies a keep-alive reference held for the native
//!   side; attach takes it once, detach and destruction drop it
//! - References that must be released are moved into a graveyard and dropped
//!   by the caller after the lock is released, since dropping the last
//!   reference of a shell re-enters the runtime

use crate::error::{BindingError, Result};
use crate::logging::log_ownership_transfer;
use crate::registry::{Registry, Wrapper, WrapperId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side is responsible for destroying the native resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ownership {
    /// Language GC destroys the native object when the wrapper is finalized
    #[default]
    LanguageOwned,
    /// Native side destroys it; the wrapper shell alone may be reclaimed
    NativeOwned,
    /// Neither side destroys it implicitly
    Shared,
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LanguageOwned => "language-owned",
            Self::NativeOwned => "native-owned",
            Self::Shared => "shared",
        };
        f.write_str(name)
    }
}

/// References to drop once the registry lock is released
pub(crate) type Graveyard = Vec<Wrapper>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttachOutcome {
    Attached,
    /// Same parent as before; nothing changed
    AlreadyAttached,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferOutcome {
    Transferred,
    Unchanged,
    /// Native side took ownership of something it never reports destroying;
    /// the caller must invalidate the wrapper
    MustInvalidate,
}

fn conflict(registry: &Registry, id: WrapperId, reason: &str) -> BindingError {
    match registry.get(id) {
        Some(record) => BindingError::OwnershipConflict {
            declared_type: record.ty.name().to_string(),
            ownership: record.ownership,
            reason: reason.to_string(),
        },
        None => BindingError::UnknownWrapper { id: id.raw() },
    }
}

fn set_ownership_logged(registry: &mut Registry, id: WrapperId, to: Ownership, reason: &str) -> Result<()> {
    let record = registry.record_mut(id)?;
    if record.ownership != to {
        log_ownership_transfer(id.raw(), record.ownership, to, reason);
        record.ownership = to;
    }
    Ok(())
}

fn is_ancestor(registry: &Registry, candidate: WrapperId, of: WrapperId) -> bool {
    let mut current = registry.get(of).and_then(|r| r.parent);
    while let Some(id) = current {
        if id == candidate {
            return true;
        }
        current = registry.get(id).and_then(|r| r.parent);
    }
    false
}

/// Attach `child` under the native parent `parent`
pub(crate) fn attach(registry: &mut Registry, child: &Wrapper, parent: WrapperId) -> Result<AttachOutcome> {
    let child_id = child.id();
    if child_id == parent {
        return Ok(AttachOutcome::Ignored);
    }
    if registry.record(child_id)?.parent == Some(parent) {
        return Ok(AttachOutcome::AlreadyAttached);
    }
    if is_ancestor(registry, child_id, parent) {
        return Err(conflict(registry, child_id, "attaching would create an ownership cycle"));
    }
    registry.record(parent)?;

    unlink_parent(registry, child_id);

    registry.record_mut(parent)?.children.insert(child_id);
    let record = registry.record_mut(child_id)?;
    record.parent = Some(parent);
    if record.keep_alive.is_none() {
        record.keep_alive = Some(child.clone());
    }
    set_ownership_logged(registry, child_id, Ownership::NativeOwned, "attach")?;
    Ok(AttachOutcome::Attached)
}

/// Detach `child` from its native parent, returning it to the language GC
pub(crate) fn detach(registry: &mut Registry, child: WrapperId, grave: &mut Graveyard) -> Result<bool> {
    if registry.record(child)?.parent.is_none() {
        return Ok(false);
    }
    unlink_parent(registry, child);
    let record = registry.record_mut(child)?;
    if let Some(keep) = record.keep_alive.take() {
        grave.push(keep);
    }
    set_ownership_logged(registry, child, Ownership::LanguageOwned, "detach")?;
    Ok(true)
}

/// Remove the parent edge on both sides without touching ownership
pub(crate) fn unlink_parent(registry: &mut Registry, child: WrapperId) {
    let Some(parent) = registry.get_mut(child).and_then(|r| r.parent.take()) else {
        return;
    };
    if let Some(parent_record) = registry.get_mut(parent) {
        parent_record.children.remove(&child);
    }
}

/// Explicit transfer of the native resource to the native side
pub(crate) fn transfer_to_native(registry: &mut Registry, wrapper: &Wrapper) -> Result<TransferOutcome> {
    let id = wrapper.id();
    let record = registry.record_mut(id)?;
    if record.ownership == Ownership::NativeOwned || record.ty.is_value_type() {
        return Ok(TransferOutcome::Unchanged);
    }

    let language_type = record.ty.is_language_type();
    let tracked = record.ty.tracks_destruction();
    if language_type && record.keep_alive.is_none() {
        record.keep_alive = Some(wrapper.clone());
    }
    set_ownership_logged(registry, id, Ownership::NativeOwned, "explicit transfer")?;

    if !language_type && !tracked {
        Ok(TransferOutcome::MustInvalidate)
    } else {
        Ok(TransferOutcome::Transferred)
    }
}

/// Explicit transfer back to the language side
pub(crate) fn transfer_to_language(
    registry: &mut Registry,
    id: WrapperId,
    grave: &mut Graveyard,
) -> Result<TransferOutcome> {
    let record = registry.record(id)?;
    if record.ownership == Ownership::LanguageOwned {
        return Ok(TransferOutcome::Unchanged);
    }
    if record.parent.is_some() {
        return Err(conflict(registry, id, "still attached to a native parent; detach it first"));
    }

    let record = registry.record_mut(id)?;
    if let Some(keep) = record.keep_alive.take() {
        grave.push(keep);
    }
    set_ownership_logged(registry, id, Ownership::LanguageOwned, "explicit transfer")?;
    Ok(TransferOutcome::Transferred)
}

pub(crate) fn share(registry: &mut Registry, id: WrapperId) -> Result<TransferOutcome> {
    if registry.record(id)?.ownership == Ownership::Shared {
        return Ok(TransferOutcome::Unchanged);
    }
    set_ownership_logged(registry, id, Ownership::Shared, "shared")?;
    Ok(TransferOutcome::Transferred)
}

/// Hold `object` on behalf of `owner` under `key`
pub(crate) fn keep_reference(
    registry: &mut Registry,
    owner: WrapperId,
    key: &str,
    object: &Wrapper,
    append: bool,
    grave: &mut Graveyard,
) -> Result<()> {
    let record = registry.record_mut(owner)?;
    let slot = record.referred.entry(key.to_string()).or_default();
    if append {
        if !slot.iter().any(|w| w.is(object)) {
            slot.push(object.clone());
        }
    } else {
        grave.extend(slot.drain(..));
        slot.push(object.clone());
    }
    Ok(())
}

pub(crate) fn remove_reference(
    registry: &mut Registry,
    owner: WrapperId,
    key: &str,
    object: Option<&Wrapper>,
    grave: &mut Graveyard,
) -> Result<()> {
    let record = registry.record_mut(owner)?;
    match object {
        Some(object) => {
            if let Some(slot) = record.referred.get_mut(key) {
                if let Some(pos) = slot.iter().position(|w| w.is(object)) {
                    grave.push(slot.remove(pos));
                }
                if slot.is_empty() {
                    record.referred.remove(key);
                }
            }
        }
        None => {
            if let Some(slot) = record.referred.remove(key) {
                grave.extend(slot);
            }
        }
    }
    Ok(())
}

pub(crate) fn clear_references(registry: &mut Registry, owner: WrapperId, grave: &mut Graveyard) -> Result<()> {
    let record = registry.record_mut(owner)?;
    for (_, slot) in std::mem::take(&mut record.referred) {
        grave.extend(slot);
    }
    Ok(())
}
