//! Type registrations for the sample object model

use super::heap::{Kind, SLOT_SIZE};
use crate::error::Result;
use crate::runtime::Runtime;
use crate::types::{TypeSpec, TypeTag};
use std::collections::HashMap;

/// Offset of the `Base2` sub-object inside `MDerived1`
pub const MDERIVED1_BASE2_OFFSET: isize = 16;

const _: () = assert!((MDERIVED1_BASE2_OFFSET as usize) < SLOT_SIZE);

#[derive(Debug, Clone, Copy)]
pub struct SampleTypes {
    pub object_type: TypeTag,
    pub event: TypeTag,
    pub virtual_methods: TypeTag,
    pub virtual_daughter: TypeTag,
    pub base1: TypeTag,
    pub base2: TypeTag,
    pub mderived1: TypeTag,
    pub diamond_root: TypeTag,
    pub diamond_left: TypeTag,
    pub diamond_right: TypeTag,
    pub diamond: TypeTag,
    pub private_dtor: TypeTag,
    pub bucket: TypeTag,
    pub thread: TypeTag,
    pub point: TypeTag,
    pub some_class: TypeTag,
    pub inner_class: TypeTag,
}

impl SampleTypes {
    pub fn register(runtime: &Runtime) -> Result<Self> {
        let object_type = runtime.register_type(TypeSpec::native("ObjectType"))?;
        let event = runtime.register_type(TypeSpec::native("Event").untracked())?;
        let virtual_methods = runtime.register_type(TypeSpec::native("VirtualMethods"))?;
        let virtual_daughter =
            runtime.register_type(TypeSpec::native("VirtualDaughter").base(virtual_methods, 0))?;

        let base1 = runtime.register_type(TypeSpec::native("Base1").abstract_type())?;
        let base2 = runtime.register_type(TypeSpec::native("Base2").abstract_type())?;
        let mderived1 = runtime.register_type(
            TypeSpec::native("MDerived1")
                .base(base1, 0)
                .base(base2, MDERIVED1_BASE2_OFFSET),
        )?;

        let diamond_root = runtime.register_type(TypeSpec::native("DiamondRoot").abstract_type())?;
        let diamond_left =
            runtime.register_type(TypeSpec::native("DiamondLeft").shared_base(diamond_root, 8).abstract_type())?;
        let diamond_right =
            runtime.register_type(TypeSpec::native("DiamondRight").shared_base(diamond_root, 8).abstract_type())?;
        let diamond = runtime.register_type(
            TypeSpec::native("Diamond")
                .base(diamond_left, 0)
                .base(diamond_right, 24),
        )?;

        let private_dtor = runtime.register_type(TypeSpec::native("PrivateDtor").private_destructor())?;
        let bucket = runtime.register_type(TypeSpec::native("Bucket"))?;
        let thread = runtime.register_type(TypeSpec::native("Thread"))?;
        let point = runtime.register_type(TypeSpec::native("Point").value_type().untracked())?;

        let some_class = runtime.register_type(TypeSpec::native("SomeClass"))?;
        let inner_class = runtime.register_type(TypeSpec::native("InnerClass").nested_in(["SomeClass"]))?;
        runtime.register_enum(inner_class, "ShapeType", &[("ShapeTypeOne", 0), ("ShapeTypeTwo", 1)])?;

        Ok(Self {
            object_type,
            event,
            virtual_methods,
            virtual_daughter,
            base1,
            base2,
            mderived1,
            diamond_root,
            diamond_left,
            diamond_right,
            diamond,
            private_dtor,
            bucket,
            thread,
            point,
            some_class,
            inner_class,
        })
    }

    pub(crate) fn kinds(&self) -> HashMap<TypeTag, Kind> {
        HashMap::from([
            (self.object_type, Kind::Object),
            (self.some_class, Kind::Object),
            (self.inner_class, Kind::Object),
            (self.event, Kind::Event),
            (self.virtual_methods, Kind::VirtualMethods),
            (self.virtual_daughter, Kind::VirtualMethods),
            (self.mderived1, Kind::MultipleDerived),
            (self.diamond, Kind::Diamond),
            (self.private_dtor, Kind::PrivateDtor),
            (self.bucket, Kind::Bucket),
            (self.thread, Kind::Thread),
            (self.point, Kind::Point),
        ])
    }
}
