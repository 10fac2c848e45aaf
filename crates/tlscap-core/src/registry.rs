//! Module registry
//!
//! Maps a stable module name to a constructor for that module. Filled once at
//! startup and only read afterwards.

use crate::module::CaptureModule;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Module already registered: {0}")]
    Duplicate(String),

    #[error("Module not found: {0}")]
    NotFound(String),
}

type Constructor = Arc<dyn Fn() -> Box<dyn CaptureModule> + Send + Sync>;

/// A registered module: its name and how to build it
#[derive(Clone)]
pub struct ModuleDescriptor {
    name: String,
    constructor: Constructor,
}

impl ModuleDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instantiate(&self) -> Box<dyn CaptureModule> {
        let module = (self.constructor)();
        if module.name() != self.name {
            warn!(
                "module registered as {} reports name {}",
                self.name,
                module.name()
            );
        }
        module
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Registry of available capture modules
#[derive(Debug, Default, Clone)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, ModuleDescriptor>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module constructor under a unique name
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn CaptureModule> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.modules.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.modules.insert(
            name.clone(),
            ModuleDescriptor {
                name,
                constructor: Arc::new(constructor),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules.get(name)
    }

    pub fn instantiate(&self, name: &str) -> Result<Box<dyn CaptureModule>, RegistryError> {
        self.get(name)
            .map(ModuleDescriptor::instantiate)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ValidatedConfig;
    use crate::module::{ModuleContext, ModuleResult};
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl CaptureModule for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn init(&mut self, _ctx: ModuleContext, _config: ValidatedConfig) -> ModuleResult<()> {
            Ok(())
        }

        async fn run(&mut self) -> ModuleResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ModuleRegistry::new();
        registry.register("openssl", || Box::new(Named("openssl"))).unwrap();
        registry.register("gotls", || Box::new(Named("gotls"))).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("openssl"));
        assert_eq!(registry.instantiate("gotls").unwrap().name(), "gotls");
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["gotls", "openssl"]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = ModuleRegistry::new();
        registry.register("nspr", || Box::new(Named("nspr"))).unwrap();
        assert_eq!(
            registry.register("nspr", || Box::new(Named("nspr"))),
            Err(RegistryError::Duplicate("nspr".into()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_missing_module() {
        let registry = ModuleRegistry::new();
        assert!(matches!(
            registry.instantiate("gnutls"),
            Err(RegistryError::NotFound(name)) if name == "gnutls"
        ));
    }
}
