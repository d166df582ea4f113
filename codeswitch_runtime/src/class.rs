//! Classes and the class arena.
//!
//! Classes and types reference each other cyclically (a class's field
//! may have the class's own type). To express that without
//! construction-order cycles, classes live in an append-only arena and
//! are referenced everywhere by index ([`ClassId`]); a class is
//! allocated empty and its [`ClassBody`] filled in exactly once when
//! the loader has resolved it.

use crate::defn::DefnId;
use crate::name::Name;
use crate::types::{TypeParameter, TypeRef};
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Index of a class in the [`ClassRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(u32);

impl ClassId {
    /// Raw arena index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class:{}", self.0)
    }
}

/// A field declared by a class.
#[derive(Debug, Clone)]
pub struct Field {
    /// Field name, used for lookup by the field-access opcodes.
    pub name: Name,
    /// Flags bitfield; opaque to this subsystem.
    pub flags: u32,
    /// Declared type.
    pub ty: TypeRef,
}

/// The resolved contents of a class.
#[derive(Debug, Default)]
pub struct ClassBody {
    /// Declared type parameters, in order.
    pub type_parameters: Vec<Arc<TypeParameter>>,
    /// Instantiated supertypes, transitively flattened, nearest first,
    /// expressed in terms of this class's own type parameters.
    pub supertypes: Vec<TypeRef>,
    /// Declared fields.
    pub fields: Vec<Field>,
    /// Element type for array classes.
    pub element_type: Option<TypeRef>,
}

/// A class definition.
///
/// Allocated empty by [`ClassRegistry::allocate`]; [`Class::define`]
/// completes it at most once.
#[derive(Debug)]
pub struct Class {
    id: ClassId,
    defn_id: DefnId,
    name: Name,
    body: OnceLock<ClassBody>,
}

impl Class {
    /// Arena index of this class.
    #[inline]
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Definition identity.
    #[inline]
    pub fn defn_id(&self) -> DefnId {
        self.defn_id
    }

    /// Internal name.
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Fill in the class body. Fails if the class was already defined.
    pub fn define(&self, body: ClassBody) -> Result<(), ClassBody> {
        self.body.set(body)
    }

    /// Check whether the body has been filled in.
    pub fn is_complete(&self) -> bool {
        self.body.get().is_some()
    }

    fn body(&self) -> Option<&ClassBody> {
        self.body.get()
    }

    /// Declared type parameters; empty until the class is complete.
    pub fn type_parameters(&self) -> &[Arc<TypeParameter>] {
        self.body().map(|b| &b.type_parameters[..]).unwrap_or(&[])
    }

    /// Number of declared type parameters.
    pub fn type_parameter_count(&self) -> usize {
        self.type_parameters().len()
    }

    /// Flattened instantiated supertypes, nearest first.
    pub fn supertypes(&self) -> &[TypeRef] {
        self.body().map(|b| &b.supertypes[..]).unwrap_or(&[])
    }

    /// Look up a declared field by name.
    pub fn find_field(&self, name: &Name) -> Option<&Field> {
        self.body()?.fields.iter().find(|field| &field.name == name)
    }

    /// Element type, for array classes.
    pub fn element_type(&self) -> Option<TypeRef> {
        self.body()?.element_type.clone()
    }
}

/// Append-only arena of classes, shared across roots and packages.
///
/// Lookup by [`ClassId`] is O(1); the arena only grows, so ids handed
/// out stay valid for the life of the VM.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: RwLock<Vec<Arc<Class>>>,
}

impl ClassRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an empty class and return its id.
    pub fn allocate(&self, defn_id: DefnId, name: Name) -> ClassId {
        let mut classes = self.classes.write();
        let id = ClassId(classes.len() as u32);
        classes.push(Arc::new(Class {
            id,
            defn_id,
            name,
            body: OnceLock::new(),
        }));
        id
    }

    /// Look up a class by id.
    #[inline]
    pub fn get(&self, id: ClassId) -> Option<Arc<Class>> {
        self.classes.read().get(id.index()).cloned()
    }

    /// Number of allocated classes.
    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    /// Check if no classes have been allocated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PrimitiveType, Type};

    #[test]
    fn test_allocate_then_define() {
        let registry = ClassRegistry::new();
        let id = registry.allocate(DefnId::next(), Name::simple("Point"));
        let class = registry.get(id).unwrap();
        assert!(!class.is_complete());
        assert_eq!(class.type_parameter_count(), 0);
        assert!(class.find_field(&Name::simple("x")).is_none());

        class
            .define(ClassBody {
                fields: vec![
                    Field {
                        name: Name::simple("x"),
                        flags: 0,
                        ty: Arc::new(Type::Primitive(PrimitiveType::I64)),
                    },
                    Field {
                        name: Name::simple("next"),
                        flags: 0,
                        ty: Type::object(id, []),
                    },
                ],
                ..ClassBody::default()
            })
            .unwrap();

        assert!(class.is_complete());
        let next = class.find_field(&Name::simple("next")).unwrap();
        assert_eq!(next.ty.effective_class(), Some(id));

        // Double definition is rejected.
        assert!(class.define(ClassBody::default()).is_err());
    }

    #[test]
    fn test_ids_are_stable() {
        let registry = ClassRegistry::new();
        let a = registry.allocate(DefnId::next(), Name::simple("A"));
        let b = registry.allocate(DefnId::next(), Name::simple("B"));
        assert_ne!(a, b);
        assert_eq!(registry.get(a).unwrap().name().short(), "A");
        assert_eq!(registry.get(b).unwrap().name().short(), "B");
        assert_eq!(registry.len(), 2);
    }
}
