//! Tool System
//!
//! The agent never implements tools itself: it describes them to the model
//! and forwards invocations to the sandbox. This module holds the
//! descriptions ([`ToolSchema`]), the model's requests ([`ToolCall`]) and the
//! [`ToolCatalog`] deciding which capabilities this deployment offers.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ToolError;

/// Tool call request from the LLM
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID for pairing the observation with the request
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Arguments, normally a JSON object
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    /// Create a call with a generated ID
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Enum of allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ParameterSchema {
    fn required(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: true,
            enum_values: None,
        }
    }

    fn optional(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }
}

/// Tool definition schema (for LLM function calling)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// Parameter definitions
    pub parameters: Vec<ParameterSchema>,
}

impl ToolSchema {
    /// JSON Schema object describing the parameters
    pub fn parameters_json(&self) -> Value {
        let mut properties = serde_json::Map::new();
        for param in &self.parameters {
            let mut prop = json!({
                "type": param.param_type,
                "description": param.description,
            });
            if let Some(values) = &param.enum_values {
                prop["enum"] = Value::Array(values.clone());
            }
            properties.insert(param.name.clone(), prop);
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// OpenAI-style function definition
    pub fn function_definition(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters_json(),
            }
        })
    }
}

/// Backend family a tool needs in the sandbox
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Shell,
    File,
    Browser,
    Search,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Shell => "shell",
            Self::File => "file",
            Self::Browser => "browser",
            Self::Search => "search",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
struct CatalogEntry {
    schema: ToolSchema,
    capability: Capability,
}

/// Tools known to the agent and the capabilities this deployment enables
#[derive(Clone, Debug, Default)]
pub struct ToolCatalog {
    entries: Vec<CatalogEntry>,
    enabled: Vec<Capability>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shell, file, browser and search tools with shell and file enabled
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        for (schema, capability) in standard_tools() {
            catalog.register(schema, capability);
        }
        catalog.enable(Capability::Shell);
        catalog.enable(Capability::File);
        catalog
    }

    /// Register a tool schema under a capability
    pub fn register(&mut self, schema: ToolSchema, capability: Capability) {
        self.entries.retain(|e| e.schema.name != schema.name);
        self.entries.push(CatalogEntry { schema, capability });
    }

    pub fn enable(&mut self, capability: Capability) {
        if !self.enabled.contains(&capability) {
            self.enabled.push(capability);
        }
    }

    pub fn with_capability(mut self, capability: Capability, enabled: bool) -> Self {
        if enabled {
            self.enable(capability);
        } else {
            self.enabled.retain(|c| *c != capability);
        }
        self
    }

    pub fn is_enabled(&self, capability: Capability) -> bool {
        self.enabled.contains(&capability)
    }

    /// Schemas offered to the model (enabled capabilities only)
    pub fn offered(&self) -> Vec<ToolSchema> {
        self.entries
            .iter()
            .filter(|e| self.is_enabled(e.capability))
            .map(|e| e.schema.clone())
            .collect()
    }

    /// Whether a call to `name` can be served, or why not
    pub fn availability(&self, name: &str) -> Result<Capability, ToolError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.schema.name == name)
            .ok_or_else(|| ToolError::Unavailable(format!("unknown tool '{name}'")))?;

        if self.is_enabled(entry.capability) {
            Ok(entry.capability)
        } else {
            Err(ToolError::Unavailable(format!(
                "no {} backend is configured for tool '{name}'",
                entry.capability
            )))
        }
    }

    /// Tool names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.schema.name.as_str()).collect()
    }

    /// Number of offered tools
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| self.is_enabled(e.capability))
            .count()
    }

    /// True when no tool would be offered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Describe `tools` as prompt text for providers without native function calling.
///
/// The model is told to answer with a `{"tool_calls": [...]}` JSON object.
pub fn tools_prompt_section(tools: &[ToolSchema]) -> String {
    if tools.is_empty() {
        return String::new();
    }

    let mut prompt = String::from("\n\nYou have access to the following tools:\n");
    for schema in tools {
        prompt.push_str(&format!("\n- {}: {}", schema.name, schema.description));
        if !schema.parameters.is_empty() {
            let params = schema.parameters_json();
            let properties = serde_json::to_string_pretty(&params["properties"])
                .unwrap_or_default();
            prompt.push_str(&format!("\n  Parameters: {properties}"));
            let required: Vec<&str> = schema
                .parameters
                .iter()
                .filter(|p| p.required)
                .map(|p| p.name.as_str())
                .collect();
            if !required.is_empty() {
                prompt.push_str(&format!("\n  Required: {}", required.join(", ")));
            }
        }
    }

    prompt.push_str("\n\nTo use a tool, respond with JSON in this exact format:");
    prompt.push_str(
        "\n{\"tool_calls\": [{\"function\": {\"name\": \"tool_name\", \"arguments\": {\"param\": \"value\"}}}]}",
    );
    prompt.push_str("\n\nIf you don't need to use a tool, just respond normally with text.");
    prompt
}

fn standard_tools() -> Vec<(ToolSchema, Capability)> {
    vec![
        (
            ToolSchema {
                name: "shell_exec".into(),
                description: "Execute a shell command in the sandbox".into(),
                parameters: vec![
                    ParameterSchema::required("command", "string", "Command line to run"),
                    ParameterSchema::optional("exec_dir", "string", "Working directory"),
                ],
            },
            Capability::Shell,
        ),
        (
            ToolSchema {
                name: "file_read".into(),
                description: "Read the contents of a file".into(),
                parameters: vec![
                    ParameterSchema::required("file", "string", "Absolute file path"),
                    ParameterSchema::optional("start_line", "integer", "First line to read"),
                    ParameterSchema::optional("end_line", "integer", "Line to stop before"),
                ],
            },
            Capability::File,
        ),
        (
            ToolSchema {
                name: "file_write".into(),
                description: "Write or append content to a file".into(),
                parameters: vec![
                    ParameterSchema::required("file", "string", "Absolute file path"),
                    ParameterSchema::required("content", "string", "Text to write"),
                    ParameterSchema::optional("append", "boolean", "Append instead of overwrite"),
                ],
            },
            Capability::File,
        ),
        (
            ToolSchema {
                name: "file_list".into(),
                description: "List the entries of a directory".into(),
                parameters: vec![ParameterSchema::required(
                    "path",
                    "string",
                    "Absolute directory path",
                )],
            },
            Capability::File,
        ),
        (
            ToolSchema {
                name: "browser_navigate".into(),
                description: "Open a URL in the sandbox browser and return the page text".into(),
                parameters: vec![ParameterSchema::required("url", "string", "URL to open")],
            },
            Capability::Browser,
        ),
        (
            ToolSchema {
                name: "web_search".into(),
                description: "Search the web and return the top results".into(),
                parameters: vec![ParameterSchema::required("query", "string", "Search query")],
            },
            Capability::Search,
        ),
    ]
}
