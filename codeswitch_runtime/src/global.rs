//! Global variable definitions.

use crate::defn::DefnId;
use crate::name::Name;
use crate::types::TypeRef;
use std::sync::Arc;

/// A global variable definition.
///
/// Only the declared type matters to this subsystem; the value slot is
/// interpreter state and lives elsewhere.
#[derive(Debug)]
pub struct Global {
    id: DefnId,
    name: Name,
    source_name: Option<Arc<str>>,
    flags: u32,
    ty: TypeRef,
}

impl Global {
    /// Create a global definition.
    pub fn new(
        id: DefnId,
        name: Name,
        source_name: Option<Arc<str>>,
        flags: u32,
        ty: TypeRef,
    ) -> Global {
        Global {
            id,
            name,
            source_name,
            flags,
            ty,
        }
    }

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

    /// Flags bitfield; opaque to this subsystem.
    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Declared type.
    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }
}
