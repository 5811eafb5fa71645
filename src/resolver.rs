//! Resolution of activity names to deployable endpoints or resource ids.

use std::collections::HashMap;

/// Maps an activity name to the address a backend or caller should use.
pub trait ResourceResolver: Send + Sync {
    fn resolve(&self, activity: &str) -> Option<String>;
}

/// Explicit overrides first, then `{name}` substitution into a template.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    template: Option<String>,
    overrides: HashMap<String, String>,
}

impl TemplateResolver {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: Some(template.into()),
            overrides: HashMap::new(),
        }
    }

    /// Only resolves names listed explicitly.
    pub fn fixed(overrides: HashMap<String, String>) -> Self {
        Self {
            template: None,
            overrides,
        }
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    pub fn with(mut self, activity: &str, resource: &str) -> Self {
        self.overrides.insert(activity.to_string(), resource.to_string());
        self
    }
}

impl ResourceResolver for TemplateResolver {
    fn resolve(&self, activity: &str) -> Option<String> {
        if let Some(resource) = self.overrides.get(activity) {
            return Some(resource.clone());
        }
        self.template.as_ref().map(|t| t.replace("{name}", activity))
    }
}
