//! Address allocator for sample instances
//!
//! Fixed-size slots; freed slots are handed out again last-in first-out so
//! tests hit address reuse immediately.

use crate::handle::NativeHandle;
use crate::types::TypeTag;
use std::collections::{BTreeMap, VecDeque};

pub(crate) const SLOT_SIZE: usize = 0x40;
const HEAP_BASE: usize = 0x10000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Object,
    Event,
    VirtualMethods,
    MultipleDerived,
    Diamond,
    PrivateDtor,
    Bucket,
    Thread,
    Point,
}

#[derive(Debug)]
pub(crate) struct NativeObject {
    /// Exact native type
    pub ty: TypeTag,
    pub kind: Kind,
    /// Destruction is reported to the runtime
    pub notify: bool,
    pub parent: Option<NativeHandle>,
    pub children: Vec<NativeHandle>,
    pub name: String,
    pub ints: VecDeque<i64>,
    pub x: f64,
    pub y: f64,
}

impl NativeObject {
    pub fn new(ty: TypeTag, kind: Kind, notify: bool) -> Self {
        Self {
            ty,
            kind,
            notify,
            parent: None,
            children: Vec::new(),
            name: String::new(),
            ints: VecDeque::new(),
            x: 0.0,
            y: 0.0,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Heap {
    objects: BTreeMap<NativeHandle, NativeObject>,
    free: Vec<NativeHandle>,
    next: usize,
}

impl Heap {
    pub fn alloc(&mut self, object: NativeObject) -> NativeHandle {
        let handle = self.free.pop().unwrap_or_else(|| {
            let addr = HEAP_BASE + self.next * SLOT_SIZE;
            self.next += 1;
            NativeHandle::new(addr)
        });
        self.objects.insert(handle, object);
        handle
    }

    pub fn release(&mut self, handle: NativeHandle) {
        self.free.push(handle);
    }

    /// Primary address of the instance containing `addr`
    pub fn resolve(&self, addr: NativeHandle) -> Option<NativeHandle> {
        let (primary, _) = self.objects.range(..=addr).next_back()?;
        (addr.distance_from(*primary) < SLOT_SIZE as isize).then_some(*primary)
    }

    pub fn get(&self, addr: NativeHandle) -> Option<&NativeObject> {
        self.objects.get(&self.resolve(addr)?)
    }

    pub fn get_mut(&mut self, addr: NativeHandle) -> Option<&mut NativeObject> {
        let primary = self.resolve(addr)?;
        self.objects.get_mut(&primary)
    }

    /// Unlink `root` from its parent and remove it with everything it owns;
    /// children come before their parents in the result
    pub fn take_tree(&mut self, root: NativeHandle) -> Vec<(NativeHandle, NativeObject)> {
        let Some(primary) = self.resolve(root) else {
            return Vec::new();
        };
        if let Some(parent) = self.objects.get(&primary).and_then(|o| o.parent) {
            if let Some(parent) = self.objects.get_mut(&parent) {
                parent.children.retain(|c| *c != primary);
            }
        }

        let mut order = Vec::new();
        let mut stack = vec![(primary, false)];
        while let Some((handle, expanded)) = stack.pop() {
            if expanded {
                order.push(handle);
                continue;
            }
            stack.push((handle, true));
            if let Some(object) = self.objects.get(&handle) {
                for child in object.children.iter().rev() {
                    stack.push((*child, false));
                }
            }
        }

        order
            .into_iter()
            .filter_map(|h| self.objects.remove(&h).map(|o| (h, o)))
            .collect()
    }

    pub fn set_parent(&mut self, child: NativeHandle, parent: Option<NativeHandle>) {
        let old = self.objects.get(&child).and_then(|o| o.parent);
        if let Some(old) = old {
            if let Some(old) = self.objects.get_mut(&old) {
                old.children.retain(|c| *c != child);
            }
        }
        if let Some(parent) = parent {
            if let Some(p) = self.objects.get_mut(&parent) {
                p.children.push(child);
            }
        }
        if let Some(object) = self.objects.get_mut(&child) {
            object.parent = parent;
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn contains(&self, handle: NativeHandle) -> bool {
        self.objects.contains_key(&handle)
    }
}
