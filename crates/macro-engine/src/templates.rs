//! Workflow templates: parameterized generators of workflow definitions

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::types::WorkflowDefinition;

/// Expands a small configuration object into a full workflow definition
#[async_trait]
pub trait WorkflowTemplate: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn generate(&self, config: &Value) -> Result<WorkflowDefinition>;
}

/// Listing entry for a registered template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Templates keyed by id, in registration order
#[derive(Default)]
pub struct TemplateRegistry {
    templates: IndexMap<String, Arc<dyn WorkflowTemplate>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template, replacing any with the same id
    pub fn register(&mut self, template: Arc<dyn WorkflowTemplate>) {
        self.templates.insert(template.id().to_string(), template);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn WorkflowTemplate>> {
        self.templates.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    pub fn list(&self) -> Vec<TemplateInfo> {
        self.templates
            .values()
            .map(|t| TemplateInfo {
                id: t.id().to_string(),
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty(&'static str);

    #[async_trait]
    impl WorkflowTemplate for Empty {
        fn id(&self) -> &str {
            self.0
        }

        fn name(&self) -> &str {
            "Empty"
        }

        fn description(&self) -> &str {
            "An empty workflow"
        }

        async fn generate(&self, _config: &Value) -> Result<WorkflowDefinition> {
            Ok(WorkflowDefinition::new(self.0, "Empty"))
        }
    }

    #[tokio::test]
    async fn test_register_and_generate() {
        let mut registry = TemplateRegistry::new();
        registry.register(Arc::new(Empty("b")));
        registry.register(Arc::new(Empty("a")));

        let ids: Vec<_> = registry.list().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let def = registry
            .get("a")
            .unwrap()
            .generate(&Value::Null)
            .await
            .unwrap();
        assert_eq!(def.id, "a");
        assert!(registry.get("missing").is_none());
    }
}
