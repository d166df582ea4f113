//! Packages: the unit of loading and linking.
//!
//! A package owns its definitions (globals, classes, functions, names)
//! and a dependency list whose entries expose the externally linked
//! definitions that foreign-access opcodes (`ldgf`, `callgf`, ...)
//! index. Tables are filled by the loader; lookups take the signed
//! wire-format indices straight from bytecode.

use crate::class::ClassId;
use crate::function::{Function, NativeFunction};
use crate::global::Global;
use crate::name::Name;
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// One resolved dependency of a package.
#[derive(Debug, Default)]
pub struct PackageDependency {
    name: Option<Name>,
    linked_globals: Vec<Arc<Global>>,
    linked_classes: Vec<ClassId>,
    linked_functions: Vec<Arc<Function>>,
}

impl PackageDependency {
    /// Create a dependency entry from its linked definition tables.
    pub fn new(
        name: Option<Name>,
        linked_globals: Vec<Arc<Global>>,
        linked_classes: Vec<ClassId>,
        linked_functions: Vec<Arc<Function>>,
    ) -> PackageDependency {
        PackageDependency {
            name,
            linked_globals,
            linked_classes,
            linked_functions,
        }
    }

    /// Name of the depended-on package.
    pub fn name(&self) -> Option<&Name> {
        self.name.as_ref()
    }

    /// Externally linked global at `index`.
    pub fn linked_global(&self, index: i64) -> Option<Arc<Global>> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.linked_globals.get(i))
            .cloned()
    }

    /// Externally linked class at `index`.
    pub fn linked_class(&self, index: i64) -> Option<ClassId> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.linked_classes.get(i))
            .copied()
    }

    /// Externally linked function at `index`.
    pub fn linked_function(&self, index: i64) -> Option<Arc<Function>> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.linked_functions.get(i))
            .cloned()
    }
}

/// A loaded package.
///
/// Constructed empty, filled by the loader, then effectively immutable
/// while its functions execute. Destroying the package unloads its
/// definitions and its native library.
#[derive(Debug, Default)]
pub struct Package {
    name: Name,
    globals: RwLock<Vec<Arc<Global>>>,
    classes: RwLock<Vec<ClassId>>,
    functions: RwLock<Vec<Arc<Function>>>,
    names: RwLock<Vec<Name>>,
    dependencies: RwLock<Vec<Arc<PackageDependency>>>,
    native_library: OnceLock<libloading::Library>,
}

impl Package {
    /// Create an empty package.
    pub fn new(name: Name) -> Arc<Package> {
        Arc::new(Package {
            name,
            ..Package::default()
        })
    }

    /// Package name.
    pub fn name(&self) -> &Name {
        &self.name
    }

    // =========================================================================
    // Loader mutation
    // =========================================================================

    /// Append a global definition.
    pub fn add_global(&self, global: Arc<Global>) {
        self.globals.write().push(global);
    }

    /// Append a class.
    pub fn add_class(&self, class: ClassId) {
        self.classes.write().push(class);
    }

    /// Install a function, wiring its package back-reference.
    pub fn add_function(self: &Arc<Self>, function: Function) -> Arc<Function> {
        function.set_package(Arc::downgrade(self));
        let function = Arc::new(function);
        self.functions.write().push(function.clone());
        function
    }

    /// Append a name to the name pool.
    pub fn add_name(&self, name: Name) {
        self.names.write().push(name);
    }

    /// Append a resolved dependency.
    pub fn add_dependency(&self, dependency: PackageDependency) {
        self.dependencies.write().push(Arc::new(dependency));
    }

    /// Install the native library backing this package's native
    /// functions. At most one library per package.
    pub fn set_native_library(&self, library: libloading::Library) {
        let _ = self.native_library.set(library);
    }

    // =========================================================================
    // Lookups (wire-format indices)
    // =========================================================================

    /// Global definition at `index`.
    pub fn global(&self, index: i64) -> Option<Arc<Global>> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.globals.read().get(i).cloned())
    }

    /// Class at `index`.
    pub fn class(&self, index: i64) -> Option<ClassId> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.classes.read().get(i).copied())
    }

    /// Function at `index`.
    pub fn function(&self, index: i64) -> Option<Arc<Function>> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.functions.read().get(i).cloned())
    }

    /// Name-pool entry at `index`.
    pub fn name_at(&self, index: i64) -> Option<Name> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.names.read().get(i).cloned())
    }

    /// Dependency at `index`.
    pub fn dependency(&self, index: i64) -> Option<Arc<PackageDependency>> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.dependencies.read().get(i).cloned())
    }

    /// Number of installed functions.
    pub fn function_count(&self) -> usize {
        self.functions.read().len()
    }

    // =========================================================================
    // Native symbols
    // =========================================================================

    /// Resolve a native symbol for `name`.
    ///
    /// The hierarchical name is mangled with `_` separators. Returns
    /// `None` when the package has no native library or the symbol is
    /// absent; calling such a function raises a link error at execution
    /// time.
    pub fn load_native_function(&self, name: &Name) -> Option<NativeFunction> {
        let library = self.native_library.get()?;
        let symbol_name = name.mangle("_");
        // Safety: the symbol is resolved as an opaque entry address and
        // only invoked through the native-call glue, which carries the
        // signature.
        let symbol = unsafe {
            library
                .get::<unsafe extern "C" fn()>(symbol_name.as_bytes())
                .ok()?
        };
        debug!(package = %self.name, symbol = %symbol_name, "resolved native function");
        Some(NativeFunction::new(*symbol as *const ()))
    }
}
