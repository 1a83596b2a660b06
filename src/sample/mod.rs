//! Sample native object model
//!
//! A small in-process "framework" with parent/child ownership, virtual
//! methods, multiple and diamond inheritance, a singleton with a private
//! destructor, a blocking container and worker threads. It implements
//! `NativeBackend` and drives the runtime through the native-side entry
//! points exactly like a real framework would.
//!
//! Lock discipline: the heap mutex is never held while calling into the
//! runtime.

mod heap;
mod types;

pub use types::{SampleTypes, MDERIVED1_BASE2_OFFSET};

use self::heap::{Heap, Kind, NativeObject};
use crate::config::RuntimeConfig;
use crate::error::{BindingError, Result};
use crate::handle::NativeHandle;
use crate::ownership::Ownership;
use crate::registry::Wrapper;
use crate::runtime::{NativeBackend, Runtime, WeakRuntime};
use crate::types::{TypeDescriptor, TypeTag};
use crate::value::{NativeRef, Value};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace};

/// Native side of the sample object model
#[derive(Default)]
pub struct SampleFramework {
    heap: Mutex<Heap>,
    runtime: OnceCell<WeakRuntime>,
    types: OnceCell<SampleTypes>,
    kinds: OnceCell<HashMap<TypeTag, Kind>>,
    locked_buckets: Mutex<HashSet<NativeHandle>>,
    bucket_unlocked: Condvar,
    threads: Mutex<HashMap<NativeHandle, JoinHandle<Result<Value>>>>,
    singleton: Mutex<Option<NativeHandle>>,
    instance_calls: AtomicI64,
}

impl SampleFramework {
    fn install_types(&self, types: SampleTypes) {
        let _ = self.kinds.set(types.kinds());
        let _ = self.types.set(types);
    }

    fn runtime(&self) -> Option<Runtime> {
        self.runtime.get().and_then(WeakRuntime::upgrade)
    }

    fn kind_of(&self, ty: &TypeDescriptor) -> Option<Kind> {
        self.kinds.get()?.get(&ty.native_type()).copied()
    }

    fn type_name(&self, ty: TypeTag) -> String {
        match self.runtime() {
            Some(rt) => rt.types().name_of(ty),
            None => ty.to_string(),
        }
    }

    /// Allocate an instance and announce it to the runtime
    fn alloc(&self, object: NativeObject, parent: Option<NativeHandle>) -> NativeHandle {
        let ty = object.ty;
        let handle = {
            let mut heap = self.heap.lock();
            let handle = heap.alloc(object);
            if parent.is_some() {
                heap.set_parent(handle, parent);
            }
            handle
        };
        if let Some(rt) = self.runtime() {
            rt.on_construct(handle, ty);
        }
        trace!(event = "sample_alloc", handle = %handle, "Sample object allocated");
        handle
    }

    /// Native-side delete: the instance and everything it owns, children first
    pub fn destroy(&self, handle: NativeHandle) {
        let taken = self.heap.lock().take_tree(handle);
        if taken.is_empty() {
            return;
        }
        debug!(event = "sample_destroy", handle = %handle, objects = taken.len(), "Destroying sample objects");

        let runtime = self.runtime();
        for (addr, object) in &taken {
            self.locked_buckets.lock().remove(addr);
            self.threads.lock().remove(addr);
            if object.notify {
                if let Some(rt) = &runtime {
                    rt.on_destruct(*addr);
                }
            }
        }
        self.bucket_unlocked.notify_all();

        let mut heap = self.heap.lock();
        for (addr, _) in taken {
            heap.release(addr);
        }
    }

    /// Free the instance without telling the runtime
    pub fn leak(&self, handle: NativeHandle) {
        let mut heap = self.heap.lock();
        for (addr, _) in heap.take_tree(handle) {
            heap.release(addr);
        }
    }

    pub fn object_count(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_alive(&self, handle: NativeHandle) -> bool {
        self.heap.lock().contains(handle)
    }

    /// Factory for plain framework objects
    pub fn create_object(&self, parent: Option<NativeHandle>) -> Result<NativeHandle> {
        let ty = self.sample_types()?.object_type;
        let parent = match parent {
            Some(addr) => Some(self.heap.lock().resolve(addr).ok_or_else(|| {
                BindingError::native("ObjectType", "create", format!("no parent object at {}", addr))
            })?),
            None => None,
        };
        Ok(self.alloc(NativeObject::new(ty, Kind::Object, true), parent))
    }

    /// Singleton accessor of the private-destructor type
    pub fn private_dtor_instance(&self) -> Result<NativeHandle> {
        let ty = self.sample_types()?.private_dtor;
        self.instance_calls.fetch_add(1, Ordering::Relaxed);
        let existing = *self.singleton.lock();
        if let Some(handle) = existing {
            return Ok(handle);
        }
        let handle = self.alloc(NativeObject::new(ty, Kind::PrivateDtor, true), None);
        let mut singleton = self.singleton.lock();
        Ok(*singleton.get_or_insert(handle))
    }

    fn sample_types(&self) -> Result<SampleTypes> {
        self.types.get().copied().ok_or_else(|| BindingError::UnknownType {
            name: "sample types".to_string(),
        })
    }

    fn object_at<T>(&self, handle: NativeHandle, f: impl FnOnce(&mut NativeObject) -> T) -> Result<T> {
        let mut heap = self.heap.lock();
        heap.get_mut(handle)
            .map(f)
            .ok_or_else(|| BindingError::native("<unknown>", "access", format!("no native object at {}", handle)))
    }

    fn virtual_call(&self, this: NativeHandle, method: &str, args: Vec<Value>) -> Result<Value> {
        match self.runtime() {
            Some(rt) => rt.invoke_virtual(this, method, args),
            None => self.call_default(this, method, &args),
        }
    }

    fn object_method(&self, this: NativeHandle, ty: TypeTag, method: &str, args: &[Value]) -> Result<Value> {
        match method {
            "objectName" => self.object_at(this, |o| Value::Str(o.name.clone())),
            "setObjectName" => {
                let name = arg(args, 0)?.as_str()?.to_string();
                self.object_at(this, |o| o.name = name).map(|_| Value::None)
            }
            "setParent" => {
                let parent = match arg(args, 0)? {
                    Value::None => None,
                    other => Some(other.as_native()?.handle),
                };
                let resolved = {
                    let mut heap = self.heap.lock();
                    let resolved = match parent {
                        Some(addr) => heap.resolve(addr).map(Some),
                        None => Some(None),
                    };
                    if let Some(parent) = resolved {
                        heap.set_parent(this, parent);
                    }
                    resolved
                };
                let Some(parent) = resolved else {
                    return Err(BindingError::native(&self.type_name(ty), method, "parent is not a live object"));
                };
                if let Some(rt) = self.runtime() {
                    rt.on_reparent(this, parent)?;
                }
                Ok(Value::None)
            }
            "parent" => {
                let parent = self.object_at(this, |o| o.parent)?;
                Ok(match parent {
                    Some(p) => Value::Native(self.native_ref_of(p)?),
                    None => Value::None,
                })
            }
            "children" => {
                let children = self.object_at(this, |o| o.children.clone())?;
                children
                    .into_iter()
                    .map(|c| self.native_ref_of(c).map(Value::Native))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::List)
            }
            "childCount" => self.object_at(this, |o| Value::Int(o.children.len() as i64)),
            "createChild" => {
                let name = match args.first() {
                    Some(v) => v.as_str()?.to_string(),
                    None => String::new(),
                };
                let child_ty = self.sample_types()?.object_type;
                let mut child = NativeObject::new(child_ty, Kind::Object, true);
                child.name = name;
                let handle = self.alloc(child, Some(this));
                Ok(Value::Native(NativeRef::new(handle, child_ty)))
            }
            "findChild" => {
                let name = arg(args, 0)?.as_str()?.to_string();
                let found = {
                    let heap = self.heap.lock();
                    heap.get(this).and_then(|o| {
                        o.children
                            .iter()
                            .copied()
                            .find(|c| heap.get(*c).map(|child| child.name == name).unwrap_or(false))
                    })
                };
                Ok(match found {
                    Some(child) => Value::Native(self.native_ref_of(child)?),
                    None => Value::Native(NativeRef::new(NativeHandle::NULL, self.sample_types()?.object_type)),
                })
            }
            "deleteChildren" => {
                let children = self.object_at(this, |o| o.children.clone())?;
                for child in children {
                    self.destroy(child);
                }
                Ok(Value::None)
            }
            "event" => Ok(Value::Bool(false)),
            "causeEvent" => {
                let event_type = arg(args, 0)?.as_int()?;
                let event_ty = self.sample_types()?.event;
                let mut event = NativeObject::new(event_ty, Kind::Event, false);
                event.ints.push_back(event_type);
                let event = self.alloc(event, None);

                let arg = Value::Native(NativeRef::new(event, event_ty).invalidate_after_use());
                let result = self.virtual_call(this, "event", vec![arg]);
                self.leak(event);
                result
            }
            _ => Err(no_such_method(&self.type_name(ty), method)),
        }
    }

    fn virtual_methods_method(&self, this: NativeHandle, ty: TypeTag, method: &str, args: &[Value]) -> Result<Value> {
        match method {
            "sum0" => {
                let mut total = 0;
                for value in args {
                    total += value.as_int()?;
                }
                Ok(Value::Int(total))
            }
            "callSum0" => self.virtual_call(this, "sum0", args.to_vec()),
            "name" => self.object_at(this, |o| Value::Str(o.name.clone())),
            "callName" => self.virtual_call(this, "name", Vec::new()),
            // Re-dispatches virtually until the counter reaches zero
            "recursionOnModifiedVirtual" => {
                let n = arg(args, 0)?.as_int()?;
                if n <= 0 {
                    Ok(Value::Int(0))
                } else {
                    self.virtual_call(this, "recursionOnModifiedVirtual", vec![Value::Int(n - 1)])
                }
            }
            "callRecursionOnModifiedVirtual" => {
                self.virtual_call(this, "recursionOnModifiedVirtual", args.to_vec())
            }
            "incRef" => {
                let cell = arg(args, 0)?.as_ref_cell()?;
                let current = cell.get().as_int()?;
                cell.set(Value::Int(current + 1));
                Ok(Value::None)
            }
            "callIncRef" => self.virtual_call(this, "incRef", args.to_vec()),
            "scaleRef" => {
                let cell = arg(args, 0)?.as_ref_cell()?;
                let factor = arg(args, 1)?.as_int()?;
                let current = cell.get().as_int()?;
                cell.set(Value::Int(current * factor));
                Ok(Value::None)
            }
            "callScaleRef" => self.virtual_call(this, "scaleRef", args.to_vec()),
            _ => Err(no_such_method(&self.type_name(ty), method)),
        }
    }

    fn multiple_derived_method(&self, this: NativeHandle, ty: TypeTag, method: &str, args: &[Value]) -> Result<Value> {
        let types = self.sample_types()?;
        match method {
            "base1Method" => Ok(Value::Int(1)),
            "base2Method" => Ok(Value::Int(2)),
            "callBase1Method" => self.virtual_call(this, "base1Method", Vec::new()),
            "callBase2Method" => self.virtual_call(this, "base2Method", Vec::new()),
            "castToBase1" => Ok(Value::Native(NativeRef::new(this, types.base1))),
            "castToBase2" => Ok(Value::Native(NativeRef::new(
                this.offset(MDERIVED1_BASE2_OFFSET),
                types.base2,
            ))),
            // Receives a pointer to the Base2 sub-object and recovers the full object
            "transformFromBase2" => {
                let base2 = arg(args, 0)?.as_native()?;
                Ok(Value::Native(NativeRef::new(
                    base2.handle.offset(-MDERIVED1_BASE2_OFFSET),
                    types.mderived1,
                )))
            }
            "base2Address" => {
                let base2 = arg(args, 0)?.as_native()?;
                Ok(Value::Int(base2.handle.addr() as i64))
            }
            _ => Err(no_such_method(&self.type_name(ty), method)),
        }
    }

    fn diamond_method(&self, this: NativeHandle, ty: TypeTag, method: &str) -> Result<Value> {
        let types = self.sample_types()?;
        let root = self.runtime().and_then(|rt| {
            rt.type_descriptor(types.diamond)
                .ok()
                .and_then(|d| d.ancestor(types.diamond_root).map(|a| a.offset))
        });
        match (method, root) {
            ("castToRoot", Some(offset)) => Ok(Value::Native(NativeRef::new(this.offset(offset), types.diamond_root))),
            _ => Err(no_such_method(&self.type_name(ty), method)),
        }
    }

    fn bucket_method(&self, this: NativeHandle, ty: TypeTag, method: &str, args: &[Value]) -> Result<Value> {
        match method {
            "push" => {
                let value = arg(args, 0)?.as_int()?;
                self.object_at(this, |o| o.ints.push_back(value)).map(|_| Value::None)
            }
            "pop" => self
                .object_at(this, |o| o.ints.pop_front())?
                .map(Value::Int)
                .ok_or_else(|| BindingError::native(&self.type_name(ty), method, "IndexError: pop from empty bucket")),
            "empty" => self.object_at(this, |o| Value::Bool(o.ints.is_empty())),
            "size" => self.object_at(this, |o| Value::Int(o.ints.len() as i64)),
            "lock" => {
                self.lock_bucket(this);
                Ok(Value::None)
            }
            "unlock" => {
                self.locked_buckets.lock().remove(&this);
                self.bucket_unlocked.notify_all();
                Ok(Value::None)
            }
            "locked" => Ok(Value::Bool(self.locked_buckets.lock().contains(&this))),
            "virtualBlockerMethod" => {
                self.lock_bucket(this);
                Ok(Value::Bool(true))
            }
            "callVirtualBlockerMethod" => self.virtual_call(this, "virtualBlockerMethod", Vec::new()),
            _ => Err(no_such_method(&self.type_name(ty), method)),
        }
    }

    /// Blocks until another thread unlocks the bucket
    fn lock_bucket(&self, this: NativeHandle) {
        let wait = || {
            let mut locked = self.locked_buckets.lock();
            locked.insert(this);
            while locked.contains(&this) {
                self.bucket_unlocked.wait(&mut locked);
            }
        };
        match self.runtime() {
            Some(rt) => rt.allow_threads(wait),
            None => wait(),
        }
    }

    fn thread_method(&self, this: NativeHandle, ty: TypeTag, method: &str) -> Result<Value> {
        match method {
            "start" => {
                let runtime = self.runtime.get().cloned().unwrap_or_default();
                let worker = thread::Builder::new()
                    .name(format!("sample-thread-{}", this))
                    .spawn(move || match runtime.upgrade() {
                        Some(rt) => rt.invoke_virtual(this, "run", Vec::new()),
                        None => Ok(Value::None),
                    })
                    .map_err(|err| BindingError::native(&self.type_name(ty), method, err.to_string()))?;
                self.threads.lock().insert(this, worker);
                Ok(Value::None)
            }
            "wait" => {
                let worker = self.threads.lock().remove(&this);
                let Some(worker) = worker else {
                    return Ok(Value::Bool(false));
                };
                let joined = match self.runtime() {
                    Some(rt) => rt.allow_threads(|| worker.join()),
                    None => worker.join(),
                };
                match joined {
                    Ok(result) => result.map(|_| Value::Bool(true)),
                    Err(_) => Err(BindingError::native(&self.type_name(ty), method, "worker thread panicked")),
                }
            }
            "isRunning" => Ok(Value::Bool(
                self.threads.lock().get(&this).map(|w| !w.is_finished()).unwrap_or(false),
            )),
            "run" => Ok(Value::None),
            _ => Err(no_such_method(&self.type_name(ty), method)),
        }
    }

    fn point_method(&self, this: NativeHandle, ty: TypeTag, method: &str, args: &[Value]) -> Result<Value> {
        match method {
            "x" => self.object_at(this, |o| Value::Float(o.x)),
            "y" => self.object_at(this, |o| Value::Float(o.y)),
            "setX" => {
                let x = arg(args, 0)?.as_float()?;
                self.object_at(this, |o| o.x = x).map(|_| Value::None)
            }
            _ => Err(no_such_method(&self.type_name(ty), method)),
        }
    }

    fn native_ref_of(&self, handle: NativeHandle) -> Result<NativeRef> {
        let ty = self.object_at(handle, |o| o.ty)?;
        Ok(NativeRef::new(handle, ty))
    }
}

fn arg(args: &[Value], index: usize) -> Result<&Value> {
    args.get(index)
        .ok_or_else(|| BindingError::type_mismatch(format!("argument {}", index), "missing argument"))
}

fn no_such_method(type_name: &str, method: &str) -> BindingError {
    BindingError::native(type_name, method, "no such method")
}

impl NativeBackend for SampleFramework {
    fn bind_runtime(&self, runtime: WeakRuntime) {
        let _ = self.runtime.set(runtime);
    }

    fn construct(&self, ty: &TypeDescriptor, args: &[Value]) -> Result<NativeHandle> {
        let kind = self
            .kind_of(ty)
            .ok_or_else(|| BindingError::native(ty.name(), "__init__", "no native constructor"))?;
        let mut object = NativeObject::new(ty.tag(), kind, ty.tracks_destruction());
        let mut parent = None;

        match kind {
            Kind::Object => {
                if let Some(value) = args.first() {
                    if !value.is_none() {
                        parent = Some(value.as_native()?.handle);
                    }
                }
            }
            Kind::VirtualMethods => {
                object.name = match args.first() {
                    Some(name) => name.as_str()?.to_string(),
                    None => self.type_name(ty.native_type()),
                };
            }
            Kind::Point => {
                if let Some(x) = args.first() {
                    object.x = x.as_float()?;
                }
                if let Some(y) = args.get(1) {
                    object.y = y.as_float()?;
                }
            }
            Kind::PrivateDtor => {
                return Err(BindingError::forbidden(ty.name(), "instantiated", "use the singleton accessor"));
            }
            Kind::Event | Kind::MultipleDerived | Kind::Diamond | Kind::Bucket | Kind::Thread => {}
        }

        let parent = match parent {
            Some(addr) => Some(
                self.heap
                    .lock()
                    .resolve(addr)
                    .ok_or_else(|| BindingError::native(ty.name(), "__init__", "parent is not a live object"))?,
            ),
            None => None,
        };
        Ok(self.alloc(object, parent))
    }

    fn call_default(&self, handle: NativeHandle, method: &str, args: &[Value]) -> Result<Value> {
        let (this, kind, ty) = {
            let heap = self.heap.lock();
            let this = heap
                .resolve(handle)
                .ok_or_else(|| BindingError::native("<unknown>", method, format!("no native object at {}", handle)))?;
            let object = heap
                .get(this)
                .ok_or_else(|| BindingError::native("<unknown>", method, format!("no native object at {}", handle)))?;
            (this, object.kind, object.ty)
        };
        trace!(event = "sample_call", handle = %this, method, "Native default implementation");

        match (kind, method) {
            (_, "identifier") => Ok(Value::Int(this.addr() as i64)),
            (Kind::Object, _) => self.object_method(this, ty, method, args),
            (Kind::Event, "eventType") => self.object_at(this, |o| Value::Int(o.ints.front().copied().unwrap_or(0))),
            (Kind::VirtualMethods, _) => self.virtual_methods_method(this, ty, method, args),
            (Kind::MultipleDerived, _) => self.multiple_derived_method(this, ty, method, args),
            (Kind::Diamond, _) => self.diamond_method(this, ty, method),
            (Kind::PrivateDtor, "instanceCalls") => Ok(Value::Int(self.instance_calls.load(Ordering::Relaxed))),
            (Kind::Bucket, _) => self.bucket_method(this, ty, method, args),
            (Kind::Thread, _) => self.thread_method(this, ty, method),
            (Kind::Point, _) => self.point_method(this, ty, method, args),
            _ => Err(no_such_method(&self.type_name(ty), method)),
        }
    }

    fn delete_native(&self, handle: NativeHandle) {
        self.destroy(handle);
    }

    fn query_type(&self, addr: NativeHandle) -> Option<(NativeHandle, TypeTag)> {
        let heap = self.heap.lock();
        let primary = heap.resolve(addr)?;
        heap.get(primary).map(|o| (primary, o.ty))
    }

    fn native_parent(&self, handle: NativeHandle) -> Option<NativeRef> {
        let heap = self.heap.lock();
        let parent = heap.get(handle)?.parent?;
        heap.get(parent).map(|p| NativeRef::new(parent, p.ty))
    }
}

/// Runtime wired to a fresh `SampleFramework` with the sample types registered
pub struct Sample {
    pub runtime: Runtime,
    pub framework: Arc<SampleFramework>,
    pub types: SampleTypes,
}

impl Sample {
    pub fn new() -> Result<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Result<Self> {
        let framework = Arc::new(SampleFramework::default());
        let runtime = Runtime::with_config(config, Arc::clone(&framework) as Arc<dyn NativeBackend>);
        let types = SampleTypes::register(&runtime)?;
        framework.install_types(types);
        Ok(Self {
            runtime,
            framework,
            types,
        })
    }

    /// Object created by a native factory; starts native-owned
    pub fn create_object(&self, parent: Option<&Wrapper>) -> Result<Wrapper> {
        let parent = parent.map(|p| self.runtime.address_of(p)).transpose()?;
        let handle = self.framework.create_object(parent)?;
        self.runtime
            .wrap_handle(handle, self.types.object_type, Ownership::NativeOwned)
    }

    pub fn private_dtor_instance(&self) -> Result<Wrapper> {
        let handle = self.framework.private_dtor_instance()?;
        self.runtime
            .wrap_handle(handle, self.types.private_dtor, Ownership::NativeOwned)
    }

    /// Delete from the native side, as the framework itself would
    pub fn destroy(&self, wrapper: &Wrapper) -> Result<()> {
        let handle = self.runtime.address_of(wrapper)?;
        self.framework.destroy(handle);
        Ok(())
    }

    /// Free the native instance behind the runtime's back
    pub fn leak(&self, wrapper: &Wrapper) -> Result<NativeHandle> {
        let handle = self.runtime.address_of(wrapper)?;
        self.framework.leak(handle);
        Ok(handle)
    }
}
