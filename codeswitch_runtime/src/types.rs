//! The type algebra.
//!
//! Types are immutable and shared through [`TypeRef`]. The pointer map
//! builder only needs a small slice of the full language semantics:
//! whether a value is a reference ([`Type::is_object`]), parameter
//! layout sizes, and substitution of type parameters across generic
//! instantiation and inheritance.

use crate::class::{ClassId, ClassRegistry};
use crate::defn::DefnId;
use crate::name::Name;
use crate::WORD_SIZE;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Shared handle to an immutable type.
pub type TypeRef = Arc<Type>;

/// Bindings from type parameters to concrete types, in declaration
/// order of the bound parameters.
pub type TypeBindings = Vec<(Arc<TypeParameter>, TypeRef)>;

// =============================================================================
// Primitive types
// =============================================================================

/// The primitive (non-reference) value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    /// The unit value.
    Unit,
    /// Boolean.
    Boolean,
    /// 8-bit signed integer.
    I8,
    /// 16-bit signed integer.
    I16,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
}

impl PrimitiveType {
    /// Unaligned value size in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            PrimitiveType::Unit | PrimitiveType::Boolean | PrimitiveType::I8 => 1,
            PrimitiveType::I16 => 2,
            PrimitiveType::I32 | PrimitiveType::F32 => 4,
            PrimitiveType::I64 | PrimitiveType::F64 => 8,
        }
    }
}

// =============================================================================
// Type parameters
// =============================================================================

/// A declared type parameter of a generic class or function.
///
/// Identity is the `DefnId`; substitution matches bindings by id, not
/// by name.
#[derive(Debug)]
pub struct TypeParameter {
    id: DefnId,
    name: Name,
    upper_bound: Option<TypeRef>,
}

impl TypeParameter {
    /// Create a type parameter.
    pub fn new(id: DefnId, name: Name, upper_bound: Option<TypeRef>) -> TypeParameter {
        TypeParameter {
            id,
            name,
            upper_bound,
        }
    }

    /// Definition identity.
    #[inline]
    pub fn id(&self) -> DefnId {
        self.id
    }

    /// Declared name.
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Declared upper bound, if any.
    pub fn upper_bound(&self) -> Option<&TypeRef> {
        self.upper_bound.as_ref()
    }
}

// =============================================================================
// Types
// =============================================================================

/// A type value.
///
/// Object kinds (class instantiations, the null type, the label type,
/// and type variables) are references for GC purposes; primitives are
/// not.
#[derive(Debug, Clone)]
pub enum Type {
    /// A primitive scalar.
    Primitive(PrimitiveType),
    /// The type of `null`; a reference with no class.
    Null,
    /// The type of block labels; tracked as a reference.
    Label,
    /// An instantiated class type.
    Object {
        /// The class.
        class: ClassId,
        /// Type arguments, one per class type parameter.
        type_args: SmallVec<[TypeRef; 2]>,
    },
    /// A reference to a type parameter in scope.
    Variable(Arc<TypeParameter>),
}

impl Type {
    /// Build an instantiated class type.
    pub fn object(class: ClassId, type_args: impl IntoIterator<Item = TypeRef>) -> TypeRef {
        Arc::new(Type::Object {
            class,
            type_args: type_args.into_iter().collect(),
        })
    }

    /// Build a type-variable reference.
    pub fn variable(parameter: Arc<TypeParameter>) -> TypeRef {
        Arc::new(Type::Variable(parameter))
    }

    /// Check whether values of this type are references the collector
    /// must trace. `null` and labels count as references so the
    /// collector's invariants stay uniform.
    #[inline]
    pub fn is_object(&self) -> bool {
        !matches!(self, Type::Primitive(_))
    }

    /// Unaligned value size in bytes; references are word-sized.
    pub fn type_size(&self) -> usize {
        match self {
            Type::Primitive(p) => p.size_in_bytes(),
            _ => WORD_SIZE,
        }
    }

    /// The class backing this type, following variable bounds.
    ///
    /// `null`, labels, and primitives have no class.
    pub fn effective_class(&self) -> Option<ClassId> {
        match self {
            Type::Object { class, .. } => Some(*class),
            Type::Variable(parameter) => parameter
                .upper_bound()
                .and_then(|bound| bound.effective_class()),
            _ => None,
        }
    }

    /// Bindings from this type's class parameters to its type
    /// arguments. Empty for everything but instantiated generic
    /// classes.
    pub fn type_argument_bindings(&self, registry: &ClassRegistry) -> TypeBindings {
        let Type::Object { class, type_args } = self else {
            return TypeBindings::new();
        };
        let Some(class) = registry.get(*class) else {
            return TypeBindings::new();
        };
        class
            .type_parameters()
            .iter()
            .cloned()
            .zip(type_args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Primitive(p) => write!(f, "{:?}", p),
            Type::Null => f.write_str("null"),
            Type::Label => f.write_str("label"),
            Type::Object { class, type_args } => {
                write!(f, "class:{}", class.index())?;
                if !type_args.is_empty() {
                    f.write_str("[")?;
                    for (i, arg) in type_args.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    f.write_str("]")?;
                }
                Ok(())
            }
            Type::Variable(parameter) => write!(f, "{}", parameter.name()),
        }
    }
}

// =============================================================================
// Substitution
// =============================================================================

/// Replace type variables in `ty` according to `bindings`.
///
/// Unbound variables pass through unchanged; the result shares
/// substructure with the input where nothing changed.
pub fn substitute(ty: &TypeRef, bindings: &TypeBindings) -> TypeRef {
    match &**ty {
        Type::Variable(parameter) => bindings
            .iter()
            .find(|(bound, _)| bound.id() == parameter.id())
            .map(|(_, replacement)| replacement.clone())
            .unwrap_or_else(|| ty.clone()),
        Type::Object { class, type_args } => {
            if type_args.is_empty() {
                return ty.clone();
            }
            let substituted: SmallVec<[TypeRef; 2]> = type_args
                .iter()
                .map(|arg| substitute(arg, bindings))
                .collect();
            Arc::new(Type::Object {
                class: *class,
                type_args: substituted,
            })
        }
        _ => ty.clone(),
    }
}

/// Re-express `ty`, declared by `base_class`, in terms of
/// `derived_class`'s type parameters.
///
/// `derived_class` must be `base_class` or list an instantiation of it
/// among its (transitive) supertypes; returns `None` otherwise.
pub fn substitute_for_inheritance(
    ty: &TypeRef,
    derived_class: ClassId,
    base_class: ClassId,
    registry: &ClassRegistry,
) -> Option<TypeRef> {
    if derived_class == base_class {
        return Some(ty.clone());
    }
    let derived = registry.get(derived_class)?;
    let supertype = derived
        .supertypes()
        .iter()
        .find(|st| st.effective_class() == Some(base_class))?
        .clone();
    let bindings = supertype.type_argument_bindings(registry);
    Some(substitute(ty, &bindings))
}
