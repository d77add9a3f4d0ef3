//! Tool registry.

use super::handler::ToolHandler;
use crate::types::ToolSchema;
use crate::{Error, ErrorContext, Result};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct RegisteredTool {
    pub schema: ToolSchema,
    pub handler: Arc<dyn ToolHandler>,
}

/// Read-only map from tool name to schema and handler.
///
/// Built once through [`ToolRegistryBuilder`] and shared behind an `Arc`.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }
    pub fn schema(&self, name: &str) -> Option<&ToolSchema> {
        self.tools.get(name).map(|t| &t.schema)
    }
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
    pub fn len(&self) -> usize {
        self.tools.len()
    }
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: Vec<RegisteredTool>,
}

impl ToolRegistryBuilder {
    pub fn tool(mut self, schema: ToolSchema, handler: Arc<dyn ToolHandler>) -> Self {
        self.tools.push(RegisteredTool { schema, handler });
        self
    }

    pub fn register(&mut self, schema: ToolSchema, handler: Arc<dyn ToolHandler>) -> &mut Self {
        self.tools.push(RegisteredTool { schema, handler });
        self
    }

    /// Checks every schema and rejects duplicate names.
    pub fn build(self) -> Result<ToolRegistry> {
        let mut tools = HashMap::with_capacity(self.tools.len());
        for tool in self.tools {
            tool.schema.check()?;
            let name = tool.schema.name.clone();
            if tools.insert(name.clone(), tool).is_some() {
                return Err(Error::configuration_with_context(
                    format!("tool '{}' registered twice", name),
                    ErrorContext::new().with_source("tool_registry"),
                ));
            }
        }
        Ok(ToolRegistry { tools })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::handler_fn;
    use serde_json::json;

    fn noop() -> Arc<dyn ToolHandler> {
        handler_fn(|_| async { Ok(json!(null)) })
    }

    #[test]
    fn build_and_lookup() {
        let registry = ToolRegistry::builder()
            .tool(ToolSchema::new("b_tool", ""), noop())
            .tool(ToolSchema::new("a_tool", ""), noop())
            .build()
            .unwrap();
        assert_eq!(registry.names(), vec!["a_tool", "b_tool"]);
        assert!(registry.contains("a_tool"));
        assert!(registry.schema("missing").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_names_rejected() {
        let result = ToolRegistry::builder()
            .tool(ToolSchema::new("dup", ""), noop())
            .tool(ToolSchema::new("dup", ""), noop())
            .build();
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[test]
    fn invalid_schema_rejected() {
        let result = ToolRegistry::builder()
            .tool(ToolSchema::new("  ", ""), noop())
            .build();
        assert!(result.is_err());
    }
}
