//! Compilation Bridge
//!
//! Turns a [`DependencyDef`] into something the registry can hold:
//!
//! 1. A recompute procedure: a closure over an immutable snapshot of the body
//!    and its name resolution, evaluated in a fresh local frame on each call.
//!
//! 2. A read set: every free name the body reads, minus names it assigns
//!    locally (and minus the itemwise indexer), qualified in the defining
//!    context.
//!
//! 3. The registration itself.
//!
//! # Name resolution
//!
//! Names are never rewritten in the AST. Instead compilation produces a
//! [`Resolution`] side table. Inside a body:
//!
//! - the itemwise indexer resolves to the bound slot index;
//! - plainly assigned names are locals of the recompute frame;
//! - everything else, including qualified names, is a global in its context.
//!
//! The defined name itself is always global. If the body assigns it with a
//! plain name, that assignment is promoted to a global assignment of the
//! qualified name, so self-references resolve to the tracked variable rather
//! than to a shadowing local.
//!
//! Such an assignment only writes the stored value. Reading the defined name
//! inside its own body still goes through the dependency and is a
//! `CircularDependency`, even right after the promoted assignment.
//!
//! All validation happens before a procedure is built; a definition that
//! fails to compile never reaches the registry.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use super::ast::{DependencyDef, Expr};
use super::interpreter::Interpreter;
use crate::dependency::{
    Dependency, DependencyItem, ItemwiseDependencyItem, ItemwiseRecompute, Recompute, Registry,
};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::name::{is_valid_name, qualify, ContextPath, QualifiedName};

/// How a name used inside a body is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// The itemwise index parameter.
    Indexer,
    /// A variable of the recompute's own frame.
    Local,
    /// A tracked or stored variable.
    Global(QualifiedName),
}

/// Side table mapping names in a body to their bindings.
#[derive(Debug, Clone)]
pub struct Resolution {
    context: ContextPath,
    owner: Option<QualifiedName>,
    indexer: Option<String>,
    locals: IndexSet<String>,
    globals: IndexMap<String, QualifiedName>,
}

impl Resolution {
    /// Resolution for code outside any definition: every name is global.
    pub fn top_level(context: ContextPath) -> Self {
        Self {
            context,
            owner: None,
            indexer: None,
            locals: IndexSet::new(),
            globals: IndexMap::new(),
        }
    }

    pub fn resolve(&self, name: &str) -> Binding {
        if self.indexer.as_deref() == Some(name) {
            return Binding::Indexer;
        }
        if self.locals.contains(name) {
            return Binding::Local;
        }
        let qualified = self
            .globals
            .get(name)
            .cloned()
            .unwrap_or_else(|| qualify(&self.context, name));
        Binding::Global(qualified)
    }

    pub fn context(&self) -> &ContextPath {
        &self.context
    }

    /// The dependency this resolution was compiled for.
    pub fn owner(&self) -> Option<&QualifiedName> {
        self.owner.as_ref()
    }

    pub fn indexer(&self) -> Option<&str> {
        self.indexer.as_deref()
    }

    pub fn locals(&self) -> &IndexSet<String> {
        &self.locals
    }
}

/// A compiled definition, ready to register.
#[derive(Debug, Clone)]
pub struct CompiledDependency {
    name: QualifiedName,
    reads: IndexSet<QualifiedName>,
    resolution: Arc<Resolution>,
    body: Arc<Expr>,
    source: String,
}

impl CompiledDependency {
    pub fn name(&self) -> &QualifiedName {
        &self.name
    }

    /// Qualified names the body reads.
    pub fn reads(&self) -> &IndexSet<QualifiedName> {
        &self.reads
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn is_itemwise(&self) -> bool {
        self.resolution.indexer.is_some()
    }

    /// Build the registry item with its recompute procedure.
    pub fn into_dependency(self) -> Dependency {
        let CompiledDependency {
            name,
            reads,
            resolution,
            body,
            source,
        } = self;

        let dependency: Dependency = if resolution.indexer.is_some() {
            let recompute: ItemwiseRecompute = Arc::new(move |env: &Environment, index: i64| {
                Interpreter::new(env, &resolution).run(&body, Some(index))
            });
            ItemwiseDependencyItem::from_parts(name, reads, recompute).into()
        } else {
            let recompute: Recompute = Arc::new(move |env: &Environment| {
                Interpreter::new(env, &resolution).run(&body, None)
            });
            DependencyItem::from_parts(name, reads, recompute).into()
        };

        if source.is_empty() {
            return dependency;
        }
        match dependency {
            Dependency::Scalar(item) => item.with_source(source).into(),
            Dependency::Itemwise(item) => item.with_source(source).into(),
        }
    }

    /// Register this definition. Returns the qualified name it was stored under.
    pub fn register(self, registry: &Registry) -> Result<QualifiedName> {
        let name = self.name.clone();
        registry.insert(self.into_dependency())?;
        Ok(name)
    }
}

/// Compile `def` in `context`.
pub fn compile(def: &DependencyDef, context: &ContextPath) -> Result<CompiledDependency> {
    if !is_valid_name(&def.variable) {
        return Err(Error::UnresolvedName(def.variable.clone()));
    }
    let name = qualify(context, &def.variable);
    let mut usage = def.variables.clone();

    if let Some(indexer) = &def.indexer {
        let bound = is_valid_name(indexer)
            && !indexer.contains('.')
            && *indexer != def.variable
            && !usage.local_assignment.contains_key(indexer);
        if !bound {
            return Err(Error::UnboundIndexer {
                variable: def.variable.clone(),
                indexer: indexer.clone(),
            });
        }
        usage.accessing.shift_remove(indexer);
    }

    if let Some(count) = usage.local_assignment.shift_remove(&def.variable) {
        *usage
            .global_assignment
            .entry(def.variable.clone())
            .or_default() += count;
    }

    let locals: IndexSet<String> = usage.local_assignment.keys().cloned().collect();
    if let Some(bad) = locals.iter().find(|local| !is_valid_name(local)) {
        return Err(Error::UnresolvedName(bad.clone()));
    }

    let mut globals = IndexMap::new();
    for used in usage.accessing.keys().chain(usage.global_assignment.keys()) {
        if locals.contains(used) {
            continue;
        }
        if !is_valid_name(used) {
            return Err(Error::UnresolvedName(used.clone()));
        }
        globals.insert(used.clone(), qualify(context, used));
    }
    globals.insert(def.variable.clone(), name.clone());

    let reads: IndexSet<QualifiedName> = usage
        .accessing
        .keys()
        .filter_map(|used| globals.get(used).cloned())
        .collect();

    tracing::trace!(name = %name, reads = reads.len(), locals = locals.len(), "compiled dependency");

    Ok(CompiledDependency {
        name: name.clone(),
        reads,
        resolution: Arc::new(Resolution {
            context: context.clone(),
            owner: Some(name),
            indexer: def.indexer.clone(),
            locals,
            globals,
        }),
        body: Arc::new(def.body.clone()),
        source: def.source.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn root() -> ContextPath {
        ContextPath::root()
    }

    #[test]
    fn reads_exclude_locals() {
        // x: { t := y * 2; t + z }
        let def = DependencyDef::new(
            "x",
            Expr::sequence(vec![
                Expr::assign("t", Expr::multiply(Expr::var("y"), Expr::int(2))),
                Expr::add(Expr::var("t"), Expr::var("z")),
            ]),
        );

        let compiled = compile(&def, &root()).unwrap();
        let reads: Vec<String> = compiled.reads().iter().map(ToString::to_string).collect();
        assert_eq!(reads, vec![".y", ".z"]);
        assert_eq!(compiled.resolution().resolve("t"), Binding::Local);
        assert!(!compiled.is_itemwise());
    }

    #[test]
    fn reads_are_qualified_in_defining_context() {
        let ctx = ContextPath::parse("s");
        let def = DependencyDef::new("x", Expr::add(Expr::var("y"), Expr::var("t.z")));

        let compiled = compile(&def, &ctx).unwrap();
        assert_eq!(compiled.name().to_string(), "s.x");
        let reads: Vec<String> = compiled.reads().iter().map(ToString::to_string).collect();
        assert_eq!(reads, vec!["s.y", "t.z"]);
    }

    #[test]
    fn indexer_is_not_a_read() {
        let def = DependencyDef::itemwise(
            "v",
            "i",
            Expr::multiply(Expr::var("i"), Expr::var("scale")),
        );

        let compiled = compile(&def, &root()).unwrap();
        assert!(compiled.is_itemwise());
        assert_eq!(compiled.reads().len(), 1);
        assert_eq!(compiled.resolution().resolve("i"), Binding::Indexer);
    }

    #[test]
    fn own_name_assignment_is_promoted_to_global() {
        // x: { x := y; x + 1 }
        let def = DependencyDef::new(
            "x",
            Expr::sequence(vec![
                Expr::assign("x", Expr::var("y")),
                Expr::add(Expr::var("x"), Expr::int(1)),
            ]),
        );

        let compiled = compile(&def, &root()).unwrap();
        let own = QualifiedName::new(root(), "x");
        assert_eq!(compiled.resolution().resolve("x"), Binding::Global(own.clone()));
        assert!(!compiled.resolution().locals().contains("x"));
        assert!(compiled.reads().contains(&own));
    }

    #[test]
    fn reading_own_name_after_promoted_assignment_is_circular() {
        let env = Environment::new();
        env.assign("y", Value::Int(1));

        // x: { x := y; x + 1 }
        let def = DependencyDef::new(
            "x",
            Expr::sequence(vec![
                Expr::assign("x", Expr::var("y")),
                Expr::add(Expr::var("x"), Expr::int(1)),
            ]),
        );
        env.define(&def).unwrap();

        let own = QualifiedName::new(root(), "x");
        assert!(matches!(
            env.read("x"),
            Err(Error::CircularDependency { name, .. }) if name == own
        ));
        // The promoted assignment ran before the failing read.
        assert_eq!(env.value(&own), Some(Value::Int(1)));
    }

    #[test]
    fn assigned_indexer_is_unbound() {
        let def = DependencyDef::itemwise(
            "v",
            "i",
            Expr::sequence(vec![Expr::assign("i", Expr::int(0)), Expr::var("i")]),
        );

        assert!(matches!(compile(&def, &root()), Err(Error::UnboundIndexer { .. })));
    }

    #[test]
    fn indexer_must_be_plain_name() {
        for indexer in ["", "s.i", "v", "9"] {
            let def = DependencyDef::itemwise("v", indexer, Expr::int(0));
            assert!(
                matches!(compile(&def, &root()), Err(Error::UnboundIndexer { .. })),
                "indexer {indexer:?} should be rejected"
            );
        }
    }

    #[test]
    fn malformed_names_fail_before_registration() {
        let env = Environment::new();

        let bad_read = DependencyDef::new("x", Expr::var("a..b"));
        assert!(matches!(env.define(&bad_read), Err(Error::UnresolvedName(n)) if n == "a..b"));

        let bad_target = DependencyDef::new("x.", Expr::int(1));
        assert!(matches!(env.define(&bad_target), Err(Error::UnresolvedName(_))));

        assert!(env.registry().is_empty());
    }

    #[test]
    fn register_stores_source_text() {
        let env = Environment::new();
        let def = DependencyDef::new("x", Expr::int(5)).with_source("x: 5");

        let name = compile(&def, &root()).unwrap().register(env.registry()).unwrap();
        assert_eq!(env.registry().definition_text(&name).as_deref(), Some("x: 5"));
        assert_eq!(env.read("x").unwrap(), Value::Int(5));
    }
}
