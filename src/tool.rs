use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{MeetprepError, Result};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// JSON schema of the arguments object, if the tool takes any.
    fn parameters(&self) -> Option<Value> {
        None
    }

    async fn call(&self, input: Value) -> Result<Value>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub parameters: Option<Value>,
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_shared(Arc::new(tool));
    }

    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn merge(&mut self, other: ToolRegistry) {
        self.tools.extend(other.tools);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn describe(&self) -> Vec<ToolDescription> {
        self.tools
            .values()
            .map(|tool| ToolDescription {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    pub async fn call(&self, name: &str, input: Value) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| MeetprepError::ToolNotFound(name.to_string()))?;
        tool.call(input).await.map_err(|err| match err {
            err @ MeetprepError::ToolInvocation { .. } => err,
            other => MeetprepError::ToolInvocation {
                name: name.to_string(),
                source: Box::new(other),
            },
        })
    }
}

/// Pull a required string argument out of a tool input object.
pub(crate) fn required_str<'a>(input: &'a Value, field: &str, tool: &str) -> Result<&'a str> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| MeetprepError::Protocol(format!("missing `{field}` for {tool}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercases `text`"
        }

        async fn call(&self, input: Value) -> Result<Value> {
            let text = required_str(&input, "text", "upper")?;
            Ok(json!(text.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn dispatches_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Upper);

        let out = registry.call("upper", json!({"text": "abc"})).await.unwrap();
        assert_eq!(out, json!("ABC"));
        assert_eq!(registry.names(), vec!["upper".to_string()]);
        assert_eq!(registry.describe()[0].description, "Uppercases `text`");
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_are_errors() {
        let mut registry = ToolRegistry::new();
        registry.register(Upper);

        assert!(matches!(
            registry.call("lower", json!({})).await,
            Err(MeetprepError::ToolNotFound(name)) if name == "lower"
        ));
        assert!(matches!(
            registry.call("upper", json!({})).await,
            Err(MeetprepError::ToolInvocation { name, .. }) if name == "upper"
        ));
    }

    #[test]
    fn merge_combines_registries() {
        let mut a = ToolRegistry::new();
        a.register(Upper);
        let mut b = ToolRegistry::new();
        b.merge(a);
        assert!(b.get("upper").is_some());
        assert!(!b.is_empty());
    }
}
