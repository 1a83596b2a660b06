//! Invalidation - the irreversible end of a wrapper's native half
//!
//! State machine per record: `Valid -> Invalidating -> Invalid`.
//! `Invalidating` is entered instead of `Invalid` while virtual calls on the
//! object are still executing; the last of them completes the transition.
//! The native handle is dropped on entry to either state, so frames still
//! running can no longer reach native code through this record.
//!
//! Ordering: the lifecycle flips first, then the registry slots are released,
//! and only then may the caller let the allocator reuse the address.

use crate::cast::CastResolver;
use crate::logging::{log_invalidation, log_wrapper_released};
use crate::ownership::{unlink_parent, Graveyard};
use crate::error::Result;
use crate::registry::{Registry, WrapperId, WrapperRecord};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lifecycle {
    Valid,
    /// Native instance destroyed while calls on it are still in flight
    Invalidating,
    Invalid,
}

/// Fail unless the record may be used by a new language-side call
pub(crate) fn ensure_valid(record: &WrapperRecord) -> Result<()> {
    match record.lifecycle {
        Lifecycle::Valid => Ok(()),
        Lifecycle::Invalidating | Lifecycle::Invalid => Err(record.invalidated_error()),
    }
}

/// Invalidate `root` and everything it transitively owns
///
/// Returns the ids whose lifecycle changed. References the native side held
/// for the invalidated wrappers are moved into `grave`.
pub(crate) fn invalidate_tree(
    registry: &mut Registry,
    root: WrapperId,
    casts: &CastResolver,
    grave: &mut Graveyard,
) -> Vec<WrapperId> {
    let mut changed = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![(root, false)];

    while let Some((id, cascaded)) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        let Some(record) = registry.get_mut(id) else {
            continue;
        };

        if record.lifecycle == Lifecycle::Valid {
            record.lifecycle = if record.in_flight > 0 {
                Lifecycle::Invalidating
            } else {
                Lifecycle::Invalid
            };
            log_invalidation(id.raw(), record.ty.name(), cascaded);
            changed.push(id);
        }
        record.pending_delete = false;

        if let Some(handle) = record.handle.take() {
            casts.purge(handle, &record.ty);
            log_wrapper_released(id.raw(), handle);
        }

        let children: Vec<WrapperId> = std::mem::take(&mut record.children).into_iter().collect();
        for (_, objects) in std::mem::take(&mut record.referred) {
            for object in objects {
                let native_made = registry
                    .get(object.id())
                    .map(|r| !r.created_by_language)
                    .unwrap_or(false);
                if native_made {
                    stack.push((object.id(), true));
                }
                grave.push(object);
            }
        }

        registry.release_slots(id);

        for child in children {
            if let Some(child_record) = registry.get_mut(child) {
                child_record.parent = None;
                if let Some(keep) = child_record.keep_alive.take() {
                    grave.push(keep);
                }
            }
            stack.push((child, true));
        }

        if !cascaded {
            unlink_parent(registry, id);
        }
        if let Some(record) = registry.get_mut(id) {
            if let Some(keep) = record.keep_alive.take() {
                grave.push(keep);
            }
        }
    }

    changed
}

/// Finish a deferred transition once the last in-flight call returns
pub(crate) fn settle(record: &mut WrapperRecord) -> bool {
    if record.lifecycle == Lifecycle::Invalidating && record.in_flight == 0 {
        record.lifecycle = Lifecycle::Invalid;
        return true;
    }
    false
}
