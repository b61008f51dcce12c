//! Name Qualification
//!
//! Every tracked variable is addressed by a [`QualifiedName`]: the context it
//! was defined in plus its local name. Qualification is a pure function of the
//! active context and the name as written in source.
//!
//! # Rules
//!
//! - A name without a `.` belongs to the active context.
//! - A name containing a `.` is already qualified. Everything before the last
//!   `.` is its context; an empty prefix (`.x`) means the root context.
//! - The root context is displayed as the empty string, so a root variable
//!   prints as `.x` and a variable in context `s` prints as `s.x`.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

/// A dot-separated naming context such as `s` or `s.sub`.
///
/// The root context has no segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ContextPath {
    segments: SmallVec<[Arc<str>; 2]>,
}

impl ContextPath {
    /// The root context.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dotted context path. Empty segments are dropped.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('.')
                .filter(|segment| !segment.is_empty())
                .map(Arc::from)
                .collect(),
        }
    }

    /// A nested context below this one.
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Arc::from(segment));
        Self { segments }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|s| &**s)
    }
}

impl fmt::Display for ContextPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

/// Globally unique handle for a tracked variable.
///
/// Immutable once constructed; equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    context: ContextPath,
    name: Arc<str>,
}

impl QualifiedName {
    pub fn new(context: ContextPath, name: &str) -> Self {
        Self {
            context,
            name: Arc::from(name),
        }
    }

    /// The context this name lives in.
    pub fn context(&self) -> &ContextPath {
        &self.context
    }

    /// The local part of the name.
    pub fn local(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.context, self.name)
    }
}

/// Qualify `name` relative to `context`.
///
/// Total and deterministic. Malformed names still produce a value; callers
/// that need to reject them check [`is_valid_name`] first.
pub fn qualify(context: &ContextPath, name: &str) -> QualifiedName {
    match name.rsplit_once('.') {
        Some((prefix, local)) => QualifiedName::new(ContextPath::parse(prefix), local),
        None => QualifiedName::new(context.clone(), name),
    }
}

/// Whether `name` is a well-formed plain or qualified identifier.
pub fn is_valid_name(name: &str) -> bool {
    let body = name.strip_prefix('.').unwrap_or(name);
    !body.is_empty() && body.split('.').all(is_identifier)
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
