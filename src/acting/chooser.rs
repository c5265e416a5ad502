//! Action selection
//!
//! Which action a resident starts on a building is a policy point. The
//! default picks uniformly among the actions registered for the building's
//! content type.

use rand::seq::SliceRandom;
use std::collections::HashMap;

use crate::db::schemas::BuildingDoc;

pub trait ActionChooser: Send + Sync {
    /// Action to start on `building`, or `None` when nothing applies
    fn choose_action(&self, building: &BuildingDoc) -> Option<String>;
}

/// Content type to allowed action names
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Vec<String>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in article pipeline
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("twitter-social-post", "fetch-article");
        registry.register("article-text", "extract-article-concepts");
        registry
    }

    pub fn register(&mut self, content_type: &str, action: &str) {
        let actions = self.actions.entry(content_type.to_string()).or_default();
        if !actions.iter().any(|a| a == action) {
            actions.push(action.to_string());
        }
    }

    pub fn actions_for(&self, content_type: &str) -> &[String] {
        self.actions
            .get(content_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

pub struct RandomActionChooser {
    registry: ActionRegistry,
}

impl RandomActionChooser {
    pub fn new(registry: ActionRegistry) -> Self {
        Self { registry }
    }
}

impl Default for RandomActionChooser {
    fn default() -> Self {
        Self::new(ActionRegistry::builtin())
    }
}

impl ActionChooser for RandomActionChooser {
    fn choose_action(&self, building: &BuildingDoc) -> Option<String> {
        let content_type = building.content_type.as_deref()?;
        self.registry
            .actions_for(content_type)
            .choose(&mut rand::thread_rng())
            .cloned()
    }
}
