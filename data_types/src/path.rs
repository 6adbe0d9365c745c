//! Absolute item paths.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::names::{Name, NamespaceError, NamespaceRegistry};

/// One step of a [`Path`]: a name plus a 1-based same-name-sibling index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathElement {
    name: Name,
    index: u32,
}

impl PathElement {
    /// A step addressing `name` with an explicit index.
    pub fn with_index(name: Name, index: u32) -> Self {
        debug_assert!(index >= 1);
        Self { name, index }
    }

    /// A step addressing `name` with the implied index 1.
    pub fn new(name: Name) -> Self {
        Self { name, index: 1 }
    }

    /// The step's name.
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// The 1-based same-name-sibling index.
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// An absolute path from the repository root.
///
/// The root itself is the empty path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Path {
    elements: Vec<PathElement>,
}

impl Path {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// `true` iff this is the root path.
    pub fn is_root(&self) -> bool {
        self.elements.is_empty()
    }

    /// The steps from the root, in order.
    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    /// The number of steps.
    pub fn depth(&self) -> usize {
        self.elements.len()
    }

    /// The final step, or `None` for the root.
    pub fn last(&self) -> Option<&PathElement> {
        self.elements.last()
    }

    /// This path extended by one step.
    pub fn child(&self, element: PathElement) -> Self {
        let mut elements = self.elements.clone();
        elements.push(element);
        Self { elements }
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            elements: self.elements[..self.elements.len() - 1].to_vec(),
        })
    }

    /// `true` iff `other` is this path or inside the subtree below it.
    pub fn contains(&self, other: &Self) -> bool {
        other.elements.len() >= self.elements.len()
            && other.elements[..self.elements.len()] == self.elements[..]
    }

    /// `true` iff `other` is a strict descendant of this path.
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other.elements.len() > self.elements.len() && self.contains(other)
    }

    /// Parse an absolute path such as `/a/sys:content/b[2]` against the
    /// namespace registry.
    pub fn parse(s: &str, namespaces: &NamespaceRegistry) -> Result<Self, PathParseError> {
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| PathParseError::NotAbsolute(s.to_string()))?;
        if rest.is_empty() {
            return Ok(Self::root());
        }
        let mut elements = Vec::new();
        for step in rest.split('/') {
            if step.is_empty() {
                return Err(PathParseError::EmptyElement(s.to_string()));
            }
            let (name_part, index) = match step.split_once('[') {
                Some((name_part, idx)) => {
                    let idx = idx
                        .strip_suffix(']')
                        .and_then(|v| v.parse::<u32>().ok())
                        .filter(|v| *v >= 1)
                        .ok_or_else(|| PathParseError::BadIndex(step.to_string()))?;
                    (name_part, idx)
                }
                None => (step, 1),
            };
            let name = Name::parse(name_part, namespaces)?;
            elements.push(PathElement::with_index(name, index));
        }
        Ok(Self { elements })
    }

    /// Render with registered prefixes, e.g. `/a/sys:content/b[2]`. Indices
    /// of 1 are omitted.
    pub fn format(&self, namespaces: &NamespaceRegistry) -> Result<String, NamespaceError> {
        if self.is_root() {
            return Ok("/".to_string());
        }
        let mut out = String::new();
        for element in &self.elements {
            out.push('/');
            out.push_str(&element.name().format(namespaces)?);
            if element.index() != 1 {
                out.push_str(&format!("[{}]", element.index()));
            }
        }
        Ok(out)
    }
}

impl fmt::Display for Path {
    /// Expanded-form rendering, independent of any prefix mapping.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "/");
        }
        for element in &self.elements {
            write!(f, "/{}", element.name())?;
            if element.index() != 1 {
                write!(f, "[{}]", element.index())?;
            }
        }
        Ok(())
    }
}

/// Path string parse failures.
#[derive(Debug, Error)]
pub enum PathParseError {
    /// The string does not start with `/`.
    #[error("path is not absolute: {0:?}")]
    NotAbsolute(String),

    /// The string contains an empty step (`//`).
    #[error("path contains an empty element: {0:?}")]
    EmptyElement(String),

    /// A step carries a malformed or zero index.
    #[error("bad same-name-sibling index in path element: {0:?}")]
    BadIndex(String),

    /// A step's prefix is not registered.
    #[error(transparent)]
    Namespace(#[from] NamespaceError),
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn registry() -> NamespaceRegistry {
        NamespaceRegistry::new()
    }

    #[test]
    fn parse_and_format_round_trip() {
        let ns = registry();
        for s in ["/", "/a", "/a/b[2]/sys:content", "/sys:base[3]"] {
            let path = Path::parse(s, &ns).unwrap();
            assert_eq!(path.format(&ns).unwrap(), s);
        }
    }

    #[test]
    fn parse_rejects_malformed() {
        let ns = registry();
        assert_matches!(Path::parse("a/b", &ns), Err(PathParseError::NotAbsolute(_)));
        assert_matches!(Path::parse("/a//b", &ns), Err(PathParseError::EmptyElement(_)));
        assert_matches!(Path::parse("/a[0]", &ns), Err(PathParseError::BadIndex(_)));
        assert_matches!(Path::parse("/a[x]", &ns), Err(PathParseError::BadIndex(_)));
        assert_matches!(Path::parse("/no:pe", &ns), Err(PathParseError::Namespace(_)));
    }

    #[test]
    fn ancestry() {
        let ns = registry();
        let root = Path::root();
        let a = Path::parse("/a", &ns).unwrap();
        let ab = Path::parse("/a/b", &ns).unwrap();
        let a2 = Path::parse("/a[2]", &ns).unwrap();

        assert!(root.is_ancestor_of(&a));
        assert!(a.is_ancestor_of(&ab));
        assert!(a.contains(&a));
        assert!(!a.is_ancestor_of(&a));
        // index is part of the identity of a step
        assert!(!a2.is_ancestor_of(&ab));
        assert_eq!(ab.parent().unwrap(), a);
        assert_eq!(root.parent(), None);
    }
}
