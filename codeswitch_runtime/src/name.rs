//! Hierarchical identifiers.

use std::fmt;
use std::sync::Arc;

/// A hierarchical identifier, e.g. `collections.list.length`.
///
/// Names identify definitions internally; they are distinct from the
/// optional human-readable source name a definition may carry. Cloning
/// is cheap (the component list is shared).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    components: Arc<[Arc<str>]>,
}

impl Name {
    /// Create a name from its components, outermost first.
    pub fn from_components<I, S>(components: I) -> Name
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        Name {
            components: components.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a single-component name.
    pub fn simple(component: &str) -> Name {
        Name::from_components([component])
    }

    /// The components, outermost first.
    #[inline]
    pub fn components(&self) -> &[Arc<str>] {
        &self.components
    }

    /// The innermost component.
    pub fn short(&self) -> &str {
        self.components.last().map(|c| &**c).unwrap_or("")
    }

    /// Join the components with `separator`; used to mangle native
    /// symbol names.
    pub fn mangle(&self, separator: &str) -> String {
        self.components.join(separator)
    }
}

impl Default for Name {
    /// The empty name.
    fn default() -> Name {
        Name::from_components::<_, Arc<str>>([])
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mangle("."))
    }
}
