//! Named collection of IR functions.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::IrError;
use crate::function::{FunctionInfo, IrFunction};
use crate::parse::{Item, parse_source};
use crate::validate::validate;

/// IR source of the core primitives.
pub const CORE_SOURCE: &str = include_str!("core.rill");

/// Function names reserved for a flow's boundary nodes.
pub const BOUNDARY_NAMES: [&str; 2] = ["inputs", "outputs"];

/// Functions and aliases callable by name.
///
/// Cloning is cheap: functions are shared behind [`Arc`].
#[derive(Debug, Clone, Default)]
pub struct Library {
    functions: BTreeMap<String, Arc<IrFunction>>,
    aliases: BTreeMap<String, String>,
}

impl Library {
    /// Creates an empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a library holding the core primitives.
    pub fn core() -> Result<Self, IrError> {
        let mut library = Self::new();
        library.load_source(CORE_SOURCE)?;
        Ok(library)
    }

    /// Parses `text` and adds every function and alias in it.
    ///
    /// Functions in one source may call each other in any order. Nothing is
    /// added unless the whole source validates. Returns the names added.
    pub fn load_source(&mut self, text: &str) -> Result<Vec<String>, IrError> {
        let items = parse_source(text)?;
        let mut staged = self.clone();
        let mut names = Vec::with_capacity(items.len());

        for item in &items {
            let name = match item {
                Item::Function(func) => func.name.as_str(),
                Item::Alias { name, .. } => name.as_str(),
            };
            if names.iter().any(|n| n == name) {
                return Err(IrError::DuplicateFunction(name.to_owned()));
            }
            names.push(name.to_owned());
        }

        for item in &items {
            if let Item::Function(func) = item {
                staged.aliases.remove(&func.name);
                staged
                    .functions
                    .insert(func.name.clone(), Arc::new(func.clone()));
            }
        }
        for item in items {
            if let Item::Alias { name, target } = item {
                staged.add_alias(name, target)?;
            }
        }
        for name in &names {
            if let Some(func) = staged.functions.get(name) {
                validate(func, Some(&staged))?;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(count = names.len(), "library: loaded source");

        *self = staged;
        Ok(names)
    }

    /// Validates and adds `func`, replacing any function or alias of the
    /// same name.
    pub fn insert(&mut self, func: IrFunction) -> Result<Arc<IrFunction>, IrError> {
        validate(&func, Some(self))?;
        let func = Arc::new(func);
        self.aliases.remove(&func.name);
        self.functions.insert(func.name.clone(), Arc::clone(&func));
        Ok(func)
    }

    /// Adds `name` as another name for `target`.
    pub fn add_alias(
        &mut self,
        name: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<(), IrError> {
        let (name, target) = (name.into(), target.into());
        let target = self
            .resolve_name(&target)
            .ok_or(IrError::UnknownFunction(target.clone()))?
            .to_owned();
        self.functions.remove(&name);
        self.aliases.insert(name, target);
        Ok(())
    }

    /// Removes a function or alias. Aliases pointing at a removed function
    /// are removed with it.
    pub fn remove(&mut self, name: &str) -> Option<Arc<IrFunction>> {
        if self.aliases.remove(name).is_some() {
            return None;
        }
        let removed = self.functions.remove(name)?;
        self.aliases.retain(|_, target| target != name);
        Some(removed)
    }

    /// Canonical function name for `name`, following an alias.
    pub fn resolve_name<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        if let Some(target) = self.aliases.get(name) {
            return Some(target);
        }
        self.functions.contains_key(name).then_some(name)
    }

    /// Looks up a function by name or alias.
    pub fn get(&self, name: &str) -> Option<&Arc<IrFunction>> {
        self.functions.get(self.resolve_name(name)?)
    }

    /// Whether `name` is a function or alias.
    pub fn contains(&self, name: &str) -> bool {
        self.resolve_name(name).is_some()
    }

    /// Metadata for `name`, reported under the name asked for.
    pub fn info(&self, name: &str) -> Option<FunctionInfo> {
        let func = self.get(name)?;
        let mut info = func.info_as(name);
        if func.display.is_some() && self.aliases.contains_key(name) {
            info.display_name = name.to_owned();
        }
        Some(info)
    }

    /// Metadata for every function and alias, sorted by name.
    pub fn infos(&self) -> Vec<FunctionInfo> {
        let mut names: Vec<&str> = self
            .functions
            .keys()
            .chain(self.aliases.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names.into_iter().filter_map(|n| self.info(n)).collect()
    }

    /// Iterates over the defined functions.
    pub fn functions(&self) -> impl Iterator<Item = &Arc<IrFunction>> {
        self.functions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_library_has_every_primitive() {
        let lib = Library::core().unwrap();
        for name in [
            "lag", "switch", "control", "watch", "delta", "floor", "abs", "latch", "buffer",
            "read", "write", "length", "sample", "button", "toggle", "graph",
        ] {
            assert!(lib.contains(name), "missing {name}");
        }
        assert!(!lib.contains("inputs"));
    }

    #[test]
    fn lag_capability_matches_table() {
        let lib = Library::core().unwrap();
        let lag_capable: Vec<_> = lib
            .infos()
            .into_iter()
            .filter(|i| i.lag_capable)
            .map(|i| i.name)
            .collect();
        assert_eq!(
            lag_capable,
            ["button", "control", "delta", "graph", "lag", "latch", "toggle", "watch"]
        );
    }

    #[test]
    fn alias_info_uses_alias_name() {
        let lib = Library::core().unwrap();
        let info = lib.info("button").unwrap();
        assert_eq!(info.name, "button");
        assert_eq!(info.display_name, "button");
        assert_eq!(lib.info("control").unwrap().display_name, "Control");
        assert_eq!(lib.resolve_name("toggle"), Some("control"));
    }

    #[test]
    fn load_source_is_all_or_nothing() {
        let mut lib = Library::core().unwrap();
        let err = lib
            .load_source(
                "func good() -> (out: float)\nbegin\n  store #out, 1\nend\n\
                 func bad() -> (out: float)\nbegin\n  call missing()\n  store #out, 1\nend",
            )
            .unwrap_err();
        assert_eq!(err, IrError::UnknownFunction("missing".into()));
        assert!(!lib.contains("good"));
    }

    #[test]
    fn load_source_allows_forward_calls() {
        let mut lib = Library::new();
        let names = lib
            .load_source(
                "func outer() -> (out: float)\nbegin\n  call inner() -> %0\n  store #out, %0\nend\n\
                 func inner() -> (out: float)\nbegin\n  store #out, 2\nend",
            )
            .unwrap();
        assert_eq!(names, ["outer", "inner"]);
    }

    #[test]
    fn duplicate_definitions_rejected() {
        let mut lib = Library::new();
        let err = lib
            .load_source("func a() -> ()\nbegin\nend\nfunc a() -> ()\nbegin\nend")
            .unwrap_err();
        assert_eq!(err, IrError::DuplicateFunction("a".into()));
    }

    #[test]
    fn removing_a_function_drops_its_aliases() {
        let mut lib = Library::core().unwrap();
        assert!(lib.remove("control").is_some());
        assert!(!lib.contains("button"));
        assert!(lib.remove("graph").is_none());
        assert!(lib.contains("watch"));
    }
}
