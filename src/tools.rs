//! Tool trait, registry and built-in research tools

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Context provided to tools during execution
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Label of the agent invoking the tool (e.g. "specialist-2")
    pub caller: String,
}

impl ToolContext {
    /// Create a new tool context
    pub fn new(caller: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
        }
    }
}

/// Output from a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Whether the tool execution was successful
    pub success: bool,
    /// Output content fed back to the model
    pub content: String,
    /// Optional error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutput {
    /// Create a successful tool output
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error: None,
        }
    }

    /// Create a failed tool output
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            content: format!("Error: {}", error),
            error: Some(error),
        }
    }
}

/// JSON Schema for tool parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSchema {
    /// Schema type
    #[serde(rename = "type")]
    pub schema_type: String,
    /// Schema properties
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<HashMap<String, Value>>,
    /// Required properties
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

impl JsonSchema {
    /// Create an object schema with properties
    pub fn object(properties: HashMap<String, Value>) -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: Some(properties),
            required: None,
        }
    }

    /// Set required properties
    pub fn with_required(mut self, required: &[&str]) -> Self {
        self.required = Some(required.iter().map(|s| s.to_string()).collect());
        self
    }

    /// The schema as a JSON value
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A named, schema-described function a model may call
#[async_trait]
pub trait Tool: Send + Sync {
    /// Function name advertised to the model
    fn name(&self) -> &str;

    /// Description for function calling
    fn description(&self) -> &str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> JsonSchema;

    /// Execute the tool with given parameters
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput>;
}

/// Advertised tool description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Function name
    pub name: String,
    /// Description
    pub description: String,
    /// Parameter schema
    pub parameters: Value,
}

/// Named set of tools offered to a call
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any tool with the same name
    pub fn register(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
        self
    }

    /// Number of tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Descriptions of every registered tool
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.input_schema().to_value(),
            })
            .collect()
    }

    /// Validate arguments against the tool's schema and execute it.
    ///
    /// Unknown tools, invalid arguments and tool errors all come back as a
    /// failed [`ToolOutput`] so the model can see and correct them.
    pub async fn invoke(&self, name: &str, params: Value, ctx: &ToolContext) -> ToolOutput {
        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            return ToolOutput::failure(format!("unknown tool '{}'", name));
        };

        if let Err(e) = validate_params(tool.as_ref(), &params) {
            return ToolOutput::failure(e.to_string());
        }

        match tool.execute(params, ctx).await {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!(tool = name, caller = %ctx.caller, error = %e, "tool execution failed");
                ToolOutput::failure(e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| t.name()))
            .finish()
    }
}

fn validate_params(tool: &dyn Tool, params: &Value) -> Result<()> {
    let schema = tool.input_schema().to_value();
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| Error::tool_execution(tool.name(), format!("invalid schema: {}", e)))?;
    if validator.is_valid(params) {
        Ok(())
    } else {
        Err(Error::tool_execution(
            tool.name(),
            format!("arguments do not match schema: {}", params),
        ))
    }
}

/// Reads named sections of a read-only research context.
///
/// Specialists start from a deliberately sparse seed; this tool is how they
/// pull the deeper material.
pub struct ContextLookupTool {
    context: Arc<Value>,
}

impl ContextLookupTool {
    /// Wrap a context document
    pub fn new(context: Arc<Value>) -> Self {
        Self { context }
    }

    fn sections(&self) -> Vec<String> {
        match self.context.as_ref() {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl Tool for ContextLookupTool {
    fn name(&self) -> &str {
        "lookup_context"
    }

    fn description(&self) -> &str {
        "Returns one section of the research context. Call with section=\"index\" to list sections."
    }

    fn input_schema(&self) -> JsonSchema {
        let mut properties = HashMap::new();
        properties.insert(
            "section".to_string(),
            serde_json::json!({
                "type": "string",
                "description": "Section name, or \"index\" for the list of sections"
            }),
        );
        JsonSchema::object(properties).with_required(&["section"])
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let section = params
            .get("section")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        if section == "index" {
            return Ok(ToolOutput::success(self.sections().join(", ")));
        }

        match self.context.get(section) {
            Some(Value::String(s)) => Ok(ToolOutput::success(s.clone())),
            Some(value) => Ok(ToolOutput::success(serde_json::to_string_pretty(value)?)),
            None => Ok(ToolOutput::failure(format!(
                "no section '{}'; available: {}",
                section,
                self.sections().join(", ")
            ))),
        }
    }
}

/// Arithmetic helper for ratios and changes
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Arithmetic on two numbers: add, subtract, multiply, divide, percent_change (a to b)"
    }

    fn input_schema(&self) -> JsonSchema {
        let mut properties = HashMap::new();
        properties.insert(
            "operation".to_string(),
            serde_json::json!({
                "type": "string",
                "enum": ["add", "subtract", "multiply", "divide", "percent_change"]
            }),
        );
        properties.insert("a".to_string(), serde_json::json!({ "type": "number" }));
        properties.insert("b".to_string(), serde_json::json!({ "type": "number" }));
        JsonSchema::object(properties).with_required(&["operation", "a", "b"])
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let operation = params["operation"].as_str().unwrap_or_default();
        let (Some(a), Some(b)) = (params["a"].as_f64(), params["b"].as_f64()) else {
            return Ok(ToolOutput::failure("operands must be numbers"));
        };

        let result = match operation {
            "add" => a + b,
            "subtract" => a - b,
            "multiply" => a * b,
            "divide" if b == 0.0 => return Ok(ToolOutput::failure("division by zero")),
            "divide" => a / b,
            "percent_change" if a == 0.0 => {
                return Ok(ToolOutput::failure("percent change from zero is undefined"))
            }
            "percent_change" => (b - a) / a.abs() * 100.0,
            other => return Ok(ToolOutput::failure(format!("unknown operation '{}'", other))),
        };

        Ok(ToolOutput::success(format!("{}", result)))
    }
}

/// Registry with the built-in research tools over a context document
pub fn research_tools(context: Arc<Value>) -> ToolRegistry {
    ToolRegistry::new()
        .register(Arc::new(ContextLookupTool::new(context)))
        .register(Arc::new(CalculatorTool))
}
