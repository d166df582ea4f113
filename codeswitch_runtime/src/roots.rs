//! Process-scoped singletons: primitive types and builtin definitions.
//!
//! Bytecode refers to builtin classes and functions with negative ids;
//! the roots table resolves them. Primitive type values are shared
//! singletons so the map builder never allocates for them.

use crate::class::{ClassBody, ClassId, ClassRegistry};
use crate::defn::DefnId;
use crate::function::Function;
use crate::name::Name;
use crate::types::{PrimitiveType, Type, TypeRef};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Check whether a wire-format definition id names a builtin.
#[inline]
pub const fn is_builtin_id(id: i64) -> bool {
    id < 0
}

/// Identity of a well-known builtin definition.
///
/// Builtin ids are negative on the wire; `-1` maps to table index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuiltinId(i64);

impl BuiltinId {
    /// The root `Object` class.
    pub const OBJECT_CLASS: BuiltinId = BuiltinId(-1);
    /// The `Exception` class pushed on catch entry.
    pub const EXCEPTION_CLASS: BuiltinId = BuiltinId(-2);
    /// The `String` class.
    pub const STRING_CLASS: BuiltinId = BuiltinId(-3);
    /// The reified `Type` class pushed by `tyd`.
    pub const TYPE_CLASS: BuiltinId = BuiltinId(-4);
    /// The `Package` class pushed by `pkg`.
    pub const PACKAGE_CLASS: BuiltinId = BuiltinId(-5);

    /// Number of builtin class slots.
    pub(crate) const CLASS_COUNT: usize = 5;

    /// Interpret a wire id as a builtin id.
    pub const fn from_raw(id: i64) -> Option<BuiltinId> {
        if is_builtin_id(id) {
            Some(BuiltinId(id))
        } else {
            None
        }
    }

    /// The wire value.
    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Table index (`-1` → 0, `-2` → 1, ...).
    #[inline]
    pub const fn index(self) -> usize {
        (-self.0 - 1) as usize
    }
}

/// The roots table.
///
/// Owned by the VM for its whole lifetime; initialized once at
/// construction, before any package loads.
#[derive(Debug)]
pub struct Roots {
    unit_type: TypeRef,
    boolean_type: TypeRef,
    i8_type: TypeRef,
    i16_type: TypeRef,
    i32_type: TypeRef,
    i64_type: TypeRef,
    f32_type: TypeRef,
    f64_type: TypeRef,
    null_type: TypeRef,
    label_type: TypeRef,
    builtin_classes: Vec<ClassId>,
    builtin_types: Vec<TypeRef>,
    builtin_functions: RwLock<FxHashMap<i64, Arc<Function>>>,
}

impl Roots {
    /// Build the roots table, allocating the builtin classes into
    /// `registry`.
    pub fn new(registry: &ClassRegistry) -> Roots {
        let object = registry.allocate(DefnId::next(), Name::simple("Object"));
        registry
            .get(object)
            .expect("freshly allocated class")
            .define(ClassBody::default())
            .expect("builtin classes are defined once");

        let object_type = Type::object(object, []);
        let mut builtin_classes = vec![object];
        let mut builtin_types = vec![object_type.clone()];
        for name in ["Exception", "String", "Type", "Package"] {
            let id = registry.allocate(DefnId::next(), Name::simple(name));
            registry
                .get(id)
                .expect("freshly allocated class")
                .define(ClassBody {
                    supertypes: vec![object_type.clone()],
                    ..ClassBody::default()
                })
                .expect("builtin classes are defined once");
            builtin_classes.push(id);
            builtin_types.push(Type::object(id, []));
        }
        debug_assert_eq!(builtin_classes.len(), BuiltinId::CLASS_COUNT);

        Roots {
            unit_type: Arc::new(Type::Primitive(PrimitiveType::Unit)),
            boolean_type: Arc::new(Type::Primitive(PrimitiveType::Boolean)),
            i8_type: Arc::new(Type::Primitive(PrimitiveType::I8)),
            i16_type: Arc::new(Type::Primitive(PrimitiveType::I16)),
            i32_type: Arc::new(Type::Primitive(PrimitiveType::I32)),
            i64_type: Arc::new(Type::Primitive(PrimitiveType::I64)),
            f32_type: Arc::new(Type::Primitive(PrimitiveType::F32)),
            f64_type: Arc::new(Type::Primitive(PrimitiveType::F64)),
            null_type: Arc::new(Type::Null),
            label_type: Arc::new(Type::Label),
            builtin_classes,
            builtin_types,
            builtin_functions: RwLock::new(FxHashMap::default()),
        }
    }

    /// The unit type singleton.
    pub fn unit_type(&self) -> TypeRef {
        self.unit_type.clone()
    }

    /// The boolean type singleton.
    pub fn boolean_type(&self) -> TypeRef {
        self.boolean_type.clone()
    }

    /// The i8 type singleton.
    pub fn i8_type(&self) -> TypeRef {
        self.i8_type.clone()
    }

    /// The i16 type singleton.
    pub fn i16_type(&self) -> TypeRef {
        self.i16_type.clone()
    }

    /// The i32 type singleton.
    pub fn i32_type(&self) -> TypeRef {
        self.i32_type.clone()
    }

    /// The i64 type singleton.
    pub fn i64_type(&self) -> TypeRef {
        self.i64_type.clone()
    }

    /// The f32 type singleton.
    pub fn f32_type(&self) -> TypeRef {
        self.f32_type.clone()
    }

    /// The f64 type singleton.
    pub fn f64_type(&self) -> TypeRef {
        self.f64_type.clone()
    }

    /// The null type singleton.
    pub fn null_type(&self) -> TypeRef {
        self.null_type.clone()
    }

    /// The label type singleton.
    pub fn label_type(&self) -> TypeRef {
        self.label_type.clone()
    }

    /// Singleton for a primitive type value.
    pub fn primitive_type(&self, primitive: PrimitiveType) -> TypeRef {
        match primitive {
            PrimitiveType::Unit => self.unit_type(),
            PrimitiveType::Boolean => self.boolean_type(),
            PrimitiveType::I8 => self.i8_type(),
            PrimitiveType::I16 => self.i16_type(),
            PrimitiveType::I32 => self.i32_type(),
            PrimitiveType::I64 => self.i64_type(),
            PrimitiveType::F32 => self.f32_type(),
            PrimitiveType::F64 => self.f64_type(),
        }
    }

    /// Look up a builtin class.
    pub fn builtin_class(&self, id: BuiltinId) -> Option<ClassId> {
        self.builtin_classes.get(id.index()).copied()
    }

    /// Look up the instantiated type of a builtin class.
    pub fn builtin_type(&self, id: BuiltinId) -> Option<TypeRef> {
        self.builtin_types.get(id.index()).cloned()
    }

    /// Register a builtin function under its id.
    ///
    /// Called during VM construction, before any bytecode references
    /// the id.
    pub fn define_builtin_function(&self, id: BuiltinId, function: Arc<Function>) {
        self.builtin_functions.write().insert(id.raw(), function);
    }

    /// Look up a builtin function.
    pub fn builtin_function(&self, id: BuiltinId) -> Option<Arc<Function>> {
        self.builtin_functions.read().get(&id.raw()).cloned()
    }
}
