//! Function definitions.
//!
//! A [`Function`] is the immutable record of a method: identity, types,
//! instruction bytes, and block table. After construction it is mutated
//! in exactly two ways, each at most once: the stack pointer map is
//! attached after the map builder runs, and the native entry point is
//! cached on first use of a native function.

use crate::class::ClassId;
use crate::defn::DefnId;
use crate::name::Name;
use crate::package::Package;
use crate::roots::BuiltinId;
use crate::types::{TypeParameter, TypeRef};
use crate::{align, WORD_SIZE};
use codeswitch_gc::StackPointerMap;
use rustc_hash::FxHashSet;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

bitflags::bitflags! {
    /// Definition flags.
    ///
    /// Only [`FunctionFlags::NATIVE`] is interpreted by this subsystem;
    /// the rest are carried for the loader and dispatcher.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FunctionFlags: u32 {
        /// Implemented by a native symbol, not bytecode.
        const NATIVE = 1 << 0;
        /// Publicly visible.
        const PUBLIC = 1 << 1;
        /// Visible to subclasses.
        const PROTECTED = 1 << 2;
        /// Visible in the defining scope only.
        const PRIVATE = 1 << 3;
        /// Instance method.
        const METHOD = 1 << 4;
        /// Constructor.
        const CONSTRUCTOR = 1 << 5;
        /// Declared abstract.
        const ABSTRACT = 1 << 6;
        /// Cannot be overridden.
        const FINAL = 1 << 7;
        /// Defined in another package.
        const EXTERN = 1 << 8;
    }
}

impl Default for FunctionFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Resolved entry point of a native function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeFunction(*const ());

// Safety: a NativeFunction is a code address resolved from a loaded
// library; the library is owned by the package and outlives the
// function.
unsafe impl Send for NativeFunction {}
unsafe impl Sync for NativeFunction {}

impl NativeFunction {
    /// Wrap a resolved symbol address.
    pub fn new(ptr: *const ()) -> NativeFunction {
        NativeFunction(ptr)
    }

    /// The raw entry address.
    #[inline]
    pub fn as_ptr(self) -> *const () {
        self.0
    }
}

/// Errors from constructing or mutating a [`Function`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionError {
    /// The instruction stream exceeds [`Function::MAX_INSTRUCTIONS`].
    InstructionsTooLong {
        /// Actual length in bytes.
        len: usize,
    },
    /// `locals_size` is not a word multiple.
    MisalignedLocals {
        /// The rejected size.
        locals_size: usize,
    },
    /// The block table is empty, does not start at offset 0, or names
    /// an offset past the end of the instructions.
    InvalidBlockTable,
    /// A stack pointer map was already attached.
    MapAlreadyAttached,
}

impl fmt::Display for FunctionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstructionsTooLong { len } => {
                write!(f, "instruction stream too long: {} bytes", len)
            }
            Self::MisalignedLocals { locals_size } => {
                write!(f, "locals size {} is not a word multiple", locals_size)
            }
            Self::InvalidBlockTable => f.write_str("invalid block offset table"),
            Self::MapAlreadyAttached => f.write_str("stack pointer map already attached"),
        }
    }
}

impl std::error::Error for FunctionError {}

/// Result type for function operations.
pub type FunctionResult<T> = Result<T, FunctionError>;

/// All the attributes a [`Function`] is constructed from.
///
/// The loader fills one of these per function definition; tests build
/// them directly.
#[derive(Debug)]
pub struct FunctionInit {
    /// Definition identity.
    pub id: DefnId,
    /// Internal name.
    pub name: Name,
    /// Optional source-level name.
    pub source_name: Option<Arc<str>>,
    /// Definition flags.
    pub flags: FunctionFlags,
    /// Builtin identity, for well-known functions.
    pub builtin_id: Option<BuiltinId>,
    /// Declared type parameters, in order.
    pub type_parameters: Vec<Arc<TypeParameter>>,
    /// Return type.
    pub return_type: TypeRef,
    /// Positional parameter types, in order.
    pub parameter_types: Vec<TypeRef>,
    /// Class this method is defined on, if any.
    pub defining_class: Option<ClassId>,
    /// Locals size in bytes; must be a word multiple.
    pub locals_size: usize,
    /// Instruction bytes.
    pub instructions: Vec<u8>,
    /// Byte offsets of basic block entries; index 0 is the function
    /// entry and must be offset 0.
    pub block_offsets: Vec<u32>,
    /// Functions this one directly overrides.
    pub overrides: Option<Vec<Arc<Function>>>,
    /// Instantiation type pool referenced by `tys`/`tyd`.
    pub inst_types: Vec<TypeRef>,
}

impl FunctionInit {
    /// Start an init record with empty bytecode and no parameters.
    pub fn new(id: DefnId, name: Name, return_type: TypeRef) -> FunctionInit {
        FunctionInit {
            id,
            name,
            source_name: None,
            flags: FunctionFlags::default(),
            builtin_id: None,
            type_parameters: Vec::new(),
            return_type,
            parameter_types: Vec::new(),
            defining_class: None,
            locals_size: 0,
            instructions: Vec::new(),
            block_offsets: Vec::new(),
            overrides: None,
            inst_types: Vec::new(),
        }
    }
}

/// A function definition.
pub struct Function {
    id: DefnId,
    name: Name,
    source_name: Option<Arc<str>>,
    flags: FunctionFlags,
    builtin_id: Option<BuiltinId>,
    type_parameters: Vec<Arc<TypeParameter>>,
    return_type: TypeRef,
    parameter_types: Vec<TypeRef>,
    defining_class: Option<ClassId>,
    locals_size: usize,
    instructions: Box<[u8]>,
    block_offsets: Box<[u32]>,
    package: OnceLock<Weak<Package>>,
    overrides: Option<Vec<Arc<Function>>>,
    inst_types: Vec<TypeRef>,
    stack_pointer_map: OnceLock<Arc<StackPointerMap>>,
    native_function: OnceLock<NativeFunction>,
}

impl Function {
    /// Upper bound on instruction stream length.
    pub const MAX_INSTRUCTIONS: usize = (u32::MAX - 1) as usize;

    /// Construct a function, validating the structural invariants.
    pub fn new(init: FunctionInit) -> FunctionResult<Function> {
        if init.instructions.len() > Self::MAX_INSTRUCTIONS {
            return Err(FunctionError::InstructionsTooLong {
                len: init.instructions.len(),
            });
        }
        if init.locals_size % WORD_SIZE != 0 {
            return Err(FunctionError::MisalignedLocals {
                locals_size: init.locals_size,
            });
        }
        if !init.instructions.is_empty() {
            let table_ok = init.block_offsets.first() == Some(&0)
                && init
                    .block_offsets
                    .iter()
                    .all(|&offset| (offset as usize) < init.instructions.len());
            if !table_ok {
                return Err(FunctionError::InvalidBlockTable);
            }
        }
        // Normalize an empty override list to "overrides nothing".
        let overrides = init.overrides.filter(|list| !list.is_empty());

        Ok(Function {
            id: init.id,
            name: init.name,
            source_name: init.source_name,
            flags: init.flags,
            builtin_id: init.builtin_id,
            type_parameters: init.type_parameters,
            return_type: init.return_type,
            parameter_types: init.parameter_types,
            defining_class: init.defining_class,
            locals_size: init.locals_size,
            instructions: init.instructions.into_boxed_slice(),
            block_offsets: init.block_offsets.into_boxed_slice(),
            package: OnceLock::new(),
            overrides,
            inst_types: init.inst_types,
            stack_pointer_map: OnceLock::new(),
            native_function: OnceLock::new(),
        })
    }

    /// Construct an empty placeholder the loader can reference before
    /// the definition is linked.
    pub fn placeholder(id: DefnId, name: Name, unit_type: TypeRef) -> Function {
        Function::new(FunctionInit::new(id, name, unit_type))
            .expect("empty function is structurally valid")
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Definition identity.
    #[inline]
    pub fn id(&self) -> DefnId {
        self.id
    }

    /// Internal name.
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Source-level name, if one was recorded.
    pub fn source_name(&self) -> Option<&Arc<str>> {
        self.source_name.as_ref()
    }

    /// Definition flags.
    #[inline]
    pub fn flags(&self) -> FunctionFlags {
        self.flags
    }

    /// Builtin identity, for well-known functions.
    #[inline]
    pub fn builtin_id(&self) -> Option<BuiltinId> {
        self.builtin_id
    }

    /// Declared type parameters.
    pub fn type_parameters(&self) -> &[Arc<TypeParameter>] {
        &self.type_parameters
    }

    /// Return type.
    pub fn return_type(&self) -> &TypeRef {
        &self.return_type
    }

    /// Positional parameter types.
    pub fn parameter_types(&self) -> &[TypeRef] {
        &self.parameter_types
    }

    /// Class this method is defined on, if any.
    #[inline]
    pub fn defining_class(&self) -> Option<ClassId> {
        self.defining_class
    }

    /// Locals size in bytes (a word multiple).
    #[inline]
    pub fn locals_size(&self) -> usize {
        self.locals_size
    }

    /// Instruction bytes.
    #[inline]
    pub fn instructions(&self) -> &[u8] {
        &self.instructions
    }

    /// Length of the instruction stream in bytes.
    #[inline]
    pub fn instructions_size(&self) -> usize {
        self.instructions.len()
    }

    /// Block entry offsets; index 0 is the function entry.
    pub fn block_offsets(&self) -> &[u32] {
        &self.block_offsets
    }

    /// Entry offset of block `index`, if the index is in range.
    #[inline]
    pub fn block_offset(&self, index: i64) -> Option<u32> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.block_offsets.get(i))
            .copied()
    }

    /// Instantiation type pool referenced by `tys`/`tyd`.
    pub fn inst_types(&self) -> &[TypeRef] {
        &self.inst_types
    }

    /// Instantiation type at pool index `index`.
    pub fn inst_type(&self, index: i64) -> Option<TypeRef> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.inst_types.get(i))
            .cloned()
    }

    /// Functions this one directly overrides.
    pub fn overrides(&self) -> Option<&[Arc<Function>]> {
        self.overrides.as_deref()
    }

    /// The owning package, if installed and still loaded.
    pub fn package(&self) -> Option<Arc<Package>> {
        self.package.get()?.upgrade()
    }

    pub(crate) fn set_package(&self, package: Weak<Package>) {
        let _ = self.package.set(package);
    }

    // =========================================================================
    // Parameter layout
    // =========================================================================

    /// Total byte size of the parameter area: each parameter is aligned
    /// up to a word.
    pub fn parameters_size(&self) -> usize {
        self.parameter_types
            .iter()
            .map(|ty| align(ty.type_size(), WORD_SIZE))
            .sum()
    }

    /// Byte offset of parameter `index` from the frame anchor.
    ///
    /// Parameters are laid out right to left, so the offset of a
    /// parameter is the summed aligned size of the parameters after it.
    pub fn parameter_offset(&self, index: usize) -> usize {
        self.parameter_types[index + 1..]
            .iter()
            .map(|ty| align(ty.type_size(), WORD_SIZE))
            .sum()
    }

    // =========================================================================
    // Stack pointer map
    // =========================================================================

    /// The attached stack pointer map, if built.
    pub fn stack_pointer_map(&self) -> Option<&Arc<StackPointerMap>> {
        self.stack_pointer_map.get()
    }

    /// Attach the built map. Fails if one is already attached.
    pub fn attach_stack_pointer_map(&self, map: Arc<StackPointerMap>) -> FunctionResult<()> {
        self.stack_pointer_map
            .set(map)
            .map_err(|_| FunctionError::MapAlreadyAttached)
    }

    /// Check whether `pc_offset` is a recorded safe point.
    pub fn has_pointer_map_at(&self, pc_offset: u32) -> bool {
        self.stack_pointer_map
            .get()
            .is_some_and(|map| map.has_locals_region(pc_offset))
    }

    // =========================================================================
    // Native functions
    // =========================================================================

    /// Check the native flag.
    #[inline]
    pub fn is_native(&self) -> bool {
        self.flags.contains(FunctionFlags::NATIVE)
    }

    /// The cached native entry, if already resolved.
    pub fn native_function(&self) -> Option<NativeFunction> {
        self.native_function.get().copied()
    }

    /// Resolve and cache the native entry point.
    ///
    /// Returns `None` when no package is installed or the symbol is
    /// missing; a failed resolution is not cached, so a later call
    /// retries.
    pub fn ensure_native_function(&self) -> Option<NativeFunction> {
        if let Some(native) = self.native_function.get() {
            return Some(*native);
        }
        let package = self.package()?;
        let native = package.load_native_function(&self.name)?;
        // Racing stores resolve the same symbol.
        let _ = self.native_function.set(native);
        Some(native)
    }

    // =========================================================================
    // Override chains
    // =========================================================================

    /// Walk the primary override chain to the root method's id; the
    /// dispatcher keys virtual calls by this.
    pub fn find_overridden_method_id(&self) -> DefnId {
        let mut current = self;
        while let Some(overrides) = &current.overrides {
            current = &overrides[0];
        }
        current.id
    }

    /// Ids of every root method reachable through the override DAG; the
    /// singleton of this function's id when it overrides nothing.
    pub fn find_overridden_method_ids(&self) -> FxHashSet<DefnId> {
        match &self.overrides {
            None => {
                let mut ids = FxHashSet::default();
                ids.insert(self.id);
                ids
            }
            Some(overrides) => {
                let mut ids = FxHashSet::default();
                for overridden in overrides {
                    ids.extend(overridden.find_overridden_method_ids());
                }
                ids
            }
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("parameter_count", &self.parameter_types.len())
            .field("locals_size", &self.locals_size)
            .field("instructions_size", &self.instructions.len())
            .field("block_count", &self.block_offsets.len())
            .field("has_map", &self.stack_pointer_map.get().is_some())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "function {} {} ({} params, {} locals bytes, {} bytecode bytes)",
            self.name,
            self.id,
            self.parameter_types.len(),
            self.locals_size,
            self.instructions.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PrimitiveType, Type};

    fn unit() -> TypeRef {
        Arc::new(Type::Primitive(PrimitiveType::Unit))
    }

    fn function_with(
        parameter_types: Vec<TypeRef>,
        overrides: Option<Vec<Arc<Function>>>,
    ) -> Arc<Function> {
        let mut init = FunctionInit::new(DefnId::next(), Name::simple("f"), unit());
        init.parameter_types = parameter_types;
        init.overrides = overrides;
        Arc::new(Function::new(init).unwrap())
    }

    #[test]
    fn test_rejects_misaligned_locals() {
        let mut init = FunctionInit::new(DefnId::next(), Name::simple("f"), unit());
        init.locals_size = WORD_SIZE + 1;
        assert!(matches!(
            Function::new(init),
            Err(FunctionError::MisalignedLocals { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_block_table() {
        let mut init = FunctionInit::new(DefnId::next(), Name::simple("f"), unit());
        init.instructions = vec![0, 0];
        init.block_offsets = vec![1];
        assert!(matches!(
            Function::new(init),
            Err(FunctionError::InvalidBlockTable)
        ));

        let mut init = FunctionInit::new(DefnId::next(), Name::simple("f"), unit());
        init.instructions = vec![0, 0];
        init.block_offsets = vec![0, 9];
        assert!(matches!(
            Function::new(init),
            Err(FunctionError::InvalidBlockTable)
        ));
    }

    #[test]
    fn test_parameter_layout() {
        let i64_ty: TypeRef = Arc::new(Type::Primitive(PrimitiveType::I64));
        let i8_ty: TypeRef = Arc::new(Type::Primitive(PrimitiveType::I8));
        let function = function_with(vec![i64_ty, i8_ty.clone(), Arc::new(Type::Null)], None);

        // Every parameter occupies one aligned word.
        assert_eq!(function.parameters_size(), 3 * WORD_SIZE);
        // Right-to-left layout: the last parameter is at offset 0.
        assert_eq!(function.parameter_offset(2), 0);
        assert_eq!(function.parameter_offset(1), WORD_SIZE);
        assert_eq!(function.parameter_offset(0), 2 * WORD_SIZE);
    }

    #[test]
    fn test_override_chain_root() {
        let root = function_with(vec![], None);
        let middle = function_with(vec![], Some(vec![root.clone()]));
        let leaf = function_with(vec![], Some(vec![middle.clone()]));

        assert_eq!(leaf.find_overridden_method_id(), root.id());
        assert_eq!(root.find_overridden_method_id(), root.id());
    }

    #[test]
    fn test_override_dag_roots() {
        // leaf overrides two independent interface methods.
        let iface_a = function_with(vec![], None);
        let iface_b = function_with(vec![], None);
        let leaf = function_with(vec![], Some(vec![iface_a.clone(), iface_b.clone()]));

        let ids = leaf.find_overridden_method_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&iface_a.id()));
        assert!(ids.contains(&iface_b.id()));

        let own = iface_a.find_overridden_method_ids();
        assert_eq!(own.len(), 1);
        assert!(own.contains(&iface_a.id()));
    }

    #[test]
    fn test_empty_override_list_is_normalized() {
        let function = function_with(vec![], Some(vec![]));
        assert!(function.overrides().is_none());
        assert_eq!(function.find_overridden_method_id(), function.id());
    }

    #[test]
    fn test_map_attaches_once() {
        let function = function_with(vec![], None);
        assert!(!function.has_pointer_map_at(0));

        let map = Arc::new(codeswitch_gc::StackPointerMapBuilder::new().finish());
        function.attach_stack_pointer_map(map.clone()).unwrap();
        assert_eq!(
            function.attach_stack_pointer_map(map),
            Err(FunctionError::MapAlreadyAttached)
        );
    }

    #[test]
    fn test_native_flag() {
        let mut init = FunctionInit::new(DefnId::next(), Name::simple("f"), unit());
        init.flags = FunctionFlags::NATIVE | FunctionFlags::PUBLIC;
        let function = Function::new(init).unwrap();
        assert!(function.is_native());
        // No package installed: resolution yields nothing.
        assert!(function.ensure_native_function().is_none());
        assert!(function.native_function().is_none());
    }
}
