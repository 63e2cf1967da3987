//! Named behavior factories and room macros.
//!
//! Room descriptors refer to behaviors (`spawn character slime 2 3 wander`)
//! and macros (`run_macro decorate`) by name. The game registers the
//! implementations at startup; the world looks them up while loading.

use std::collections::HashMap;
use std::fmt;

use crate::entity::Behavior;
use crate::world::GameWorld;
use crate::RegistryError;

/// Builds a fresh behavior instance for one entity.
pub type BehaviorFactory = Box<dyn Fn() -> Box<dyn Behavior> + Send + Sync>;

/// Code run against the world after a room has been populated.
pub type RoomMacro = Box<dyn Fn(&mut GameWorld) -> anyhow::Result<()> + Send + Sync>;

/// Behavior factories and room macros keyed by name.
#[derive(Default)]
pub struct Registry {
    behaviors: HashMap<String, BehaviorFactory>,
    macros: HashMap<String, RoomMacro>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a behavior factory. Replaces any factory of the same name.
    pub fn register_behavior<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Behavior> + Send + Sync + 'static,
    {
        self.behaviors.insert(name.into(), Box::new(factory));
        self
    }

    /// Register a room macro. Replaces any macro of the same name.
    pub fn register_macro<F>(&mut self, name: impl Into<String>, run: F) -> &mut Self
    where
        F: Fn(&mut GameWorld) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.macros.insert(name.into(), Box::new(run));
        self
    }

    /// Instantiate the behavior registered under `name`.
    pub fn create_behavior(&self, name: &str) -> Result<Box<dyn Behavior>, RegistryError> {
        self.behaviors
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| RegistryError::UnknownBehavior {
                name: name.to_string(),
                registered: joined(self.behaviors.keys()),
            })
    }

    /// The macro registered under `name`.
    pub fn room_macro(&self, name: &str) -> Result<&RoomMacro, RegistryError> {
        self.macros
            .get(name)
            .ok_or_else(|| RegistryError::UnknownMacro {
                name: name.to_string(),
                registered: joined(self.macros.keys()),
            })
    }

    /// Registered behavior names, sorted.
    pub fn behavior_names(&self) -> Vec<&str> {
        sorted(self.behaviors.keys())
    }

    /// Registered macro names, sorted.
    pub fn macro_names(&self) -> Vec<&str> {
        sorted(self.macros.keys())
    }
}

fn sorted<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
    let mut names: Vec<&str> = keys.map(String::as_str).collect();
    names.sort_unstable();
    names
}

fn joined<'a>(keys: impl Iterator<Item = &'a String>) -> String {
    sorted(keys).join(", ")
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("behaviors", &self.behavior_names())
            .field("macros", &self.macro_names())
            .finish()
    }
}
