//! Execution Environment
//!
//! The environment is the context threaded through every evaluation: it owns
//! the dependency registry, the store of plain variable values, and the active
//! naming context. There is no global instance; each environment is an
//! isolated session.
//!
//! # Read path
//!
//! A read of a name that has a registered dependency evaluates the dependency.
//! Anything else comes from the variable store.
//!
//! # Assignment path
//!
//! Every assignment stores the value and then calls
//! [`Registry::notify_assigned`], which invalidates all dependencies reading
//! the name.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::compiler::{compile, DependencyDef, Expr, Interpreter, Resolution};
use crate::config::RegistryConfig;
use crate::dependency::{Dependency, Registry};
use crate::error::{Error, Result};
use crate::name::{qualify, ContextPath, QualifiedName};
use crate::value::Value;

#[derive(Debug, Default)]
pub struct Environment {
    registry: Registry,
    variables: RwLock<IndexMap<QualifiedName, Value>>,
    context: RwLock<ContextPath>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            registry: Registry::with_config(config),
            ..Self::default()
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The active naming context.
    pub fn context(&self) -> ContextPath {
        self.context.read().clone()
    }

    pub fn set_context(&self, context: ContextPath) {
        *self.context.write() = context;
    }

    /// Qualify `name` in the active context.
    pub fn qualify(&self, name: &str) -> QualifiedName {
        qualify(&self.context.read(), name)
    }

    /// Compile and register a dependency definition in the active context.
    pub fn define(&self, def: &DependencyDef) -> Result<QualifiedName> {
        let compiled = compile(def, &self.context())?;
        compiled.register(&self.registry)
    }

    /// Evaluate an expression at top level in the active context.
    pub fn eval(&self, expr: &Expr) -> Result<Value> {
        let resolution = Resolution::top_level(self.context());
        Interpreter::new(self, &resolution).run(expr, None)
    }

    /// Assign a variable and invalidate its readers.
    ///
    /// Returns the dependencies invalidated by the write.
    pub fn assign(&self, name: &str, value: Value) -> Vec<QualifiedName> {
        let qualified = self.qualify(name);
        self.assign_qualified(&qualified, value)
    }

    pub fn assign_qualified(&self, name: &QualifiedName, value: Value) -> Vec<QualifiedName> {
        self.store(name.clone(), value);
        self.registry.notify_assigned(name)
    }

    /// Write the store without notifying the registry.
    pub(crate) fn store(&self, name: QualifiedName, value: Value) {
        self.variables.write().insert(name, value);
    }

    /// The stored value of a plain variable, bypassing dependencies.
    pub fn value(&self, name: &QualifiedName) -> Option<Value> {
        self.variables.read().get(name).cloned()
    }

    /// Read a variable through the dependency layer.
    pub fn read(&self, name: &str) -> Result<Value> {
        self.read_qualified(&self.qualify(name))
    }

    pub fn read_qualified(&self, name: &QualifiedName) -> Result<Value> {
        if self.registry.contains(name) {
            return self.registry.evaluate(name, self);
        }
        self.value(name)
            .ok_or_else(|| Error::UndefinedVariable(name.clone()))
    }

    /// Read `name[index]`. Itemwise dependencies evaluate just that slot.
    pub fn read_item(&self, name: &str, index: i64) -> Result<Value> {
        self.read_item_qualified(&self.qualify(name), index)
    }

    pub fn read_item_qualified(&self, name: &QualifiedName, index: i64) -> Result<Value> {
        if self.registry.contains(name) {
            return self.registry.evaluate_item(name, index, self);
        }
        self.value(name)
            .ok_or_else(|| Error::UndefinedVariable(name.clone()))?
            .select(index)
    }

    /// Look up the registered dependency for `name` in the active context.
    pub fn dependency(&self, name: &str) -> Result<Arc<Dependency>> {
        self.registry.get_dependency(&self.qualify(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environments_are_isolated() {
        let first = Environment::new();
        let second = Environment::new();

        first.assign("y", Value::Int(1));
        first
            .define(&DependencyDef::new("x", Expr::var("y")))
            .unwrap();

        assert_eq!(first.read("x").unwrap(), Value::Int(1));
        assert!(second.registry().is_empty());
        assert!(matches!(second.read("x"), Err(Error::UndefinedVariable(_))));
    }

    #[test]
    fn context_drives_qualification() {
        let env = Environment::new();
        env.set_context(ContextPath::parse("s"));

        env.assign("y", Value::Int(2));
        let name = env
            .define(&DependencyDef::new("x", Expr::multiply(Expr::var("y"), Expr::int(3))))
            .unwrap();

        assert_eq!(name.to_string(), "s.x");
        assert_eq!(env.read("x").unwrap(), Value::Int(6));

        env.set_context(ContextPath::root());
        assert_eq!(env.read("s.x").unwrap(), Value::Int(6));
        assert!(env.read("x").is_err());
    }

    #[test]
    fn assign_reports_invalidated_dependencies() {
        let env = Environment::new();
        env.assign("y", Value::Int(1));
        env.define(&DependencyDef::new("x", Expr::var("y"))).unwrap();
        env.read("x").unwrap();

        let invalidated = env.assign("y", Value::Int(2));
        assert_eq!(invalidated, vec![env.qualify("x")]);
        assert!(env.assign("unrelated", Value::Int(0)).is_empty());
    }

    #[test]
    fn dependency_lookup_through_environment() {
        let env = Environment::new();
        env.define(&DependencyDef::itemwise("v", "i", Expr::var("i"))).unwrap();

        assert!(env.dependency("v").unwrap().is_itemwise());
        assert!(matches!(env.dependency("w"), Err(Error::UnknownDependency(_))));
    }
}
