//! Qualified names and the namespace registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// The default (empty) namespace for user content.
pub const NS_DEFAULT_URI: &str = "";

/// Namespace of system items and the base node types.
pub const NS_SYS_URI: &str = "urn:canopy:sys:1.0";
/// Registered prefix of [`NS_SYS_URI`].
pub const NS_SYS_PREFIX: &str = "sys";

/// Namespace of the built-in mixin types.
pub const NS_MIX_URI: &str = "urn:canopy:mix:1.0";
/// Registered prefix of [`NS_MIX_URI`].
pub const NS_MIX_PREFIX: &str = "mix";

const RESIDUAL_LOCAL_NAME: &str = "*";

/// A qualified name: a namespace URI plus a local name.
///
/// Cheap to clone; both components are shared strings. The serialized and
/// [`fmt::Display`] form is the expanded `{uri}local` notation, which needs no
/// prefix mapping to interpret.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name {
    namespace: Arc<str>,
    local: Arc<str>,
}

impl Name {
    /// A name in the namespace `uri`.
    pub fn new(uri: impl AsRef<str>, local: impl AsRef<str>) -> Self {
        Self {
            namespace: Arc::from(uri.as_ref()),
            local: Arc::from(local.as_ref()),
        }
    }

    /// A name in the default (empty) namespace.
    pub fn unqualified(local: impl AsRef<str>) -> Self {
        Self::new(NS_DEFAULT_URI, local)
    }

    /// The residual name `*`, matching any otherwise-undeclared item name in
    /// an item definition.
    pub fn residual() -> Self {
        Self::unqualified(RESIDUAL_LOCAL_NAME)
    }

    /// `true` iff this is the residual name.
    pub fn is_residual(&self) -> bool {
        self.namespace.is_empty() && &*self.local == RESIDUAL_LOCAL_NAME
    }

    /// The namespace URI.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The local name.
    pub fn local_name(&self) -> &str {
        &self.local
    }

    /// Parse the expanded `{uri}local` form. A bare `local` is taken to be in
    /// the default namespace.
    pub fn from_expanded(s: &str) -> Result<Self, NamespaceError> {
        if let Some(rest) = s.strip_prefix('{') {
            let (uri, local) = rest
                .split_once('}')
                .ok_or_else(|| NamespaceError::MalformedName(s.to_string()))?;
            if local.is_empty() {
                return Err(NamespaceError::MalformedName(s.to_string()));
            }
            Ok(Self::new(uri, local))
        } else if s.is_empty() || s.contains(['{', '}']) {
            Err(NamespaceError::MalformedName(s.to_string()))
        } else {
            Ok(Self::unqualified(s))
        }
    }

    /// Render as `prefix:local` using the registered prefix of this name's
    /// namespace.
    pub fn format(&self, namespaces: &NamespaceRegistry) -> Result<String, NamespaceError> {
        let prefix = namespaces.prefix_for(&self.namespace)?;
        if prefix.is_empty() {
            Ok(self.local.to_string())
        } else {
            Ok(format!("{}:{}", prefix, self.local))
        }
    }

    /// Parse `prefix:local` (or a bare `local`) against the registry.
    pub fn parse(s: &str, namespaces: &NamespaceRegistry) -> Result<Self, NamespaceError> {
        match s.split_once(':') {
            Some((prefix, local)) if !local.is_empty() => {
                let uri = namespaces.uri_for(prefix)?;
                Ok(Self::new(uri, local))
            }
            Some(_) => Err(NamespaceError::MalformedName(s.to_string())),
            None if s.is_empty() => Err(NamespaceError::MalformedName(s.to_string())),
            None => Ok(Self::unqualified(s)),
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_expanded(&s).map_err(de::Error::custom)
    }
}

/// Well-known item and type names used by the built-in node types.
pub mod well_known {
    use super::{Name, NS_MIX_URI, NS_SYS_URI};
    use once_cell::sync::Lazy;

    /// `sys:primaryType` - the primary type of every node, computed.
    pub static PRIMARY_TYPE: Lazy<Name> = Lazy::new(|| Name::new(NS_SYS_URI, "primaryType"));
    /// `sys:mixinTypes` - the mixin names of a node, computed.
    pub static MIXIN_TYPES: Lazy<Name> = Lazy::new(|| Name::new(NS_SYS_URI, "mixinTypes"));
    /// `sys:uuid` - the stable identity exposed by referenceable nodes.
    pub static UUID: Lazy<Name> = Lazy::new(|| Name::new(NS_SYS_URI, "uuid"));
    /// `sys:created` - creation instant, computed.
    pub static CREATED: Lazy<Name> = Lazy::new(|| Name::new(NS_SYS_URI, "created"));
    /// `sys:lastModified` - last modification instant, computed.
    pub static LAST_MODIFIED: Lazy<Name> = Lazy::new(|| Name::new(NS_SYS_URI, "lastModified"));
    /// `sys:content` - the content child of a `sys:file`.
    pub static CONTENT: Lazy<Name> = Lazy::new(|| Name::new(NS_SYS_URI, "content"));
    /// `sys:data` - the payload of a `sys:resource`.
    pub static DATA: Lazy<Name> = Lazy::new(|| Name::new(NS_SYS_URI, "data"));
    /// `sys:mimeType` - media type of a `sys:resource`.
    pub static MIME_TYPE: Lazy<Name> = Lazy::new(|| Name::new(NS_SYS_URI, "mimeType"));

    /// `sys:base` - the abstract root of the node-type hierarchy.
    pub static NT_BASE: Lazy<Name> = Lazy::new(|| Name::new(NS_SYS_URI, "base"));
    /// `sys:unstructured` - free-form content.
    pub static NT_UNSTRUCTURED: Lazy<Name> = Lazy::new(|| Name::new(NS_SYS_URI, "unstructured"));
    /// `sys:hierarchyNode` - common supertype of folders and files.
    pub static NT_HIERARCHY_NODE: Lazy<Name> =
        Lazy::new(|| Name::new(NS_SYS_URI, "hierarchyNode"));
    /// `sys:folder`.
    pub static NT_FOLDER: Lazy<Name> = Lazy::new(|| Name::new(NS_SYS_URI, "folder"));
    /// `sys:file`.
    pub static NT_FILE: Lazy<Name> = Lazy::new(|| Name::new(NS_SYS_URI, "file"));
    /// `sys:resource`.
    pub static NT_RESOURCE: Lazy<Name> = Lazy::new(|| Name::new(NS_SYS_URI, "resource"));
    /// `sys:version`.
    pub static NT_VERSION: Lazy<Name> = Lazy::new(|| Name::new(NS_SYS_URI, "version"));
    /// `mix:referenceable` - makes a node a legal REFERENCE target.
    pub static MIX_REFERENCEABLE: Lazy<Name> =
        Lazy::new(|| Name::new(NS_MIX_URI, "referenceable"));
}

/// Errors raised by namespace and name handling.
#[derive(Debug, Error)]
pub enum NamespaceError {
    /// The URI or prefix is not known to the registry.
    #[error("namespace not registered: {0}")]
    NotRegistered(String),

    /// The prefix or URI is already bound to a different partner.
    #[error("namespace mapping conflict: {0}")]
    AlreadyRegistered(String),

    /// A name string could not be parsed.
    #[error("malformed name: {0:?}")]
    MalformedName(String),
}

/// The prefix ↔ URI mapping.
///
/// Pre-seeded with the built-in namespaces; user namespaces are added with
/// [`NamespaceRegistry::register`]. Reads are concurrent, writes serialized.
#[derive(Debug)]
pub struct NamespaceRegistry {
    inner: RwLock<Mappings>,
}

#[derive(Debug, Default)]
struct Mappings {
    prefix_to_uri: HashMap<String, String>,
    uri_to_prefix: HashMap<String, String>,
}

impl NamespaceRegistry {
    /// A registry holding the built-in mappings.
    pub fn new() -> Self {
        let mut m = Mappings::default();
        for (prefix, uri) in [
            ("", NS_DEFAULT_URI),
            (NS_SYS_PREFIX, NS_SYS_URI),
            (NS_MIX_PREFIX, NS_MIX_URI),
        ] {
            m.prefix_to_uri.insert(prefix.to_string(), uri.to_string());
            m.uri_to_prefix.insert(uri.to_string(), prefix.to_string());
        }
        Self {
            inner: RwLock::new(m),
        }
    }

    /// Bind `prefix` to `uri`. Remapping either side fails.
    pub fn register(&self, prefix: &str, uri: &str) -> Result<(), NamespaceError> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.prefix_to_uri.get(prefix) {
            if existing != uri {
                return Err(NamespaceError::AlreadyRegistered(prefix.to_string()));
            }
            return Ok(());
        }
        if inner.uri_to_prefix.contains_key(uri) {
            return Err(NamespaceError::AlreadyRegistered(uri.to_string()));
        }
        inner
            .prefix_to_uri
            .insert(prefix.to_string(), uri.to_string());
        inner
            .uri_to_prefix
            .insert(uri.to_string(), prefix.to_string());
        Ok(())
    }

    /// The prefix bound to `uri`.
    pub fn prefix_for(&self, uri: &str) -> Result<String, NamespaceError> {
        self.inner
            .read()
            .uri_to_prefix
            .get(uri)
            .cloned()
            .ok_or_else(|| NamespaceError::NotRegistered(uri.to_string()))
    }

    /// The URI bound to `prefix`.
    pub fn uri_for(&self, prefix: &str) -> Result<String, NamespaceError> {
        self.inner
            .read()
            .prefix_to_uri
            .get(prefix)
            .cloned()
            .ok_or_else(|| NamespaceError::NotRegistered(prefix.to_string()))
    }

    /// `true` iff `uri` is a registered namespace.
    pub fn is_registered_uri(&self, uri: &str) -> bool {
        self.inner.read().uri_to_prefix.contains_key(uri)
    }
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
