pub mod registry;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::BoxFuture;
use serde_json::{Map, Value, json};

use crate::error::ToolError;
use crate::llm::ModelToolDefinition;

pub use registry::{CollisionPolicy, ForceGuard, ToolRegistry, ToolScope};

type FunctionHandler =
    dyn Fn(Arguments) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync;

/// How a parameter's raw argument is decoded before the handler sees it.
///
/// The wire schema always declares parameters as strings; the kind only
/// governs the local decode step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterKind {
    String,
    Number,
    Boolean,
}

impl ParameterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }

    fn decode(self, raw: &Value) -> Result<ArgumentValue, String> {
        match (self, raw) {
            (Self::String, Value::String(text)) => Ok(ArgumentValue::String(text.clone())),
            (Self::String, Value::Number(number)) => Ok(ArgumentValue::String(number.to_string())),
            (Self::String, Value::Bool(flag)) => Ok(ArgumentValue::String(flag.to_string())),
            (Self::Number, Value::Number(number)) => number
                .as_f64()
                .map(ArgumentValue::Number)
                .ok_or_else(|| format!("number {number} is out of range")),
            (Self::Number, Value::String(text)) => match text.trim().parse::<f64>() {
                Ok(number) if number.is_finite() => Ok(ArgumentValue::Number(number)),
                _ => Err(format!("expected a number, found \"{text}\"")),
            },
            (Self::Boolean, Value::Bool(flag)) => Ok(ArgumentValue::Boolean(*flag)),
            (Self::Boolean, Value::String(text)) => {
                match text.trim().to_ascii_lowercase().as_str() {
                    "true" => Ok(ArgumentValue::Boolean(true)),
                    "false" => Ok(ArgumentValue::Boolean(false)),
                    _ => Err(format!("expected true or false, found \"{text}\"")),
                }
            }
            (kind, other) => Err(format!(
                "expected {}, found {}",
                kind.as_str(),
                json_type_name(other)
            )),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Schema fragment for one function argument. Shared by every call and never
/// holds a value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameter {
    name: String,
    description: String,
    kind: ParameterKind,
}

impl Parameter {
    pub fn new(name: impl Into<String>, description: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, ParameterKind::String)
    }

    pub fn number(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, ParameterKind::Number)
    }

    pub fn boolean(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, ParameterKind::Boolean)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> ParameterKind {
        self.kind
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ArgumentValue {
    String(String),
    Number(f64),
    Boolean(bool),
}

impl std::fmt::Display for ArgumentValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(text) => f.write_str(text),
            Self::Number(number) => write!(f, "{number}"),
            Self::Boolean(flag) => write!(f, "{flag}"),
        }
    }
}

/// Per-call copy of a [`Parameter`] carrying the decoded value.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterInstance {
    template: Parameter,
    value: ArgumentValue,
}

impl ParameterInstance {
    pub fn template(&self) -> &Parameter {
        &self.template
    }

    pub fn name(&self) -> &str {
        self.template.name()
    }

    pub fn value(&self) -> &ArgumentValue {
        &self.value
    }
}

/// Decoded arguments for a single invocation, in declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Arguments {
    function: String,
    instances: Vec<ParameterInstance>,
}

impl Arguments {
    /// Clones each template and fills it from the raw argument map.
    pub fn decode(
        function: &str,
        templates: &[Parameter],
        raw: &Map<String, Value>,
    ) -> Result<Self, ToolError> {
        let mut instances = Vec::with_capacity(templates.len());

        for template in templates {
            let raw_value = raw.get(template.name()).ok_or_else(|| ToolError::ArgumentDecode {
                function: function.to_string(),
                parameter: template.name().to_string(),
                message: "missing required argument".to_string(),
            })?;

            let value = template
                .kind()
                .decode(raw_value)
                .map_err(|message| ToolError::ArgumentDecode {
                    function: function.to_string(),
                    parameter: template.name().to_string(),
                    message,
                })?;

            instances.push(ParameterInstance {
                template: template.clone(),
                value,
            });
        }

        Ok(Self {
            function: function.to_string(),
            instances,
        })
    }

    pub fn get(&self, name: &str) -> Option<&ArgumentValue> {
        self.instances
            .iter()
            .find(|instance| instance.name() == name)
            .map(ParameterInstance::value)
    }

    pub fn string(&self, name: &str) -> Result<&str, ToolError> {
        match self.get(name) {
            Some(ArgumentValue::String(text)) => Ok(text),
            other => Err(self.wrong_kind(name, ParameterKind::String, other)),
        }
    }

    pub fn number(&self, name: &str) -> Result<f64, ToolError> {
        match self.get(name) {
            Some(ArgumentValue::Number(number)) => Ok(*number),
            other => Err(self.wrong_kind(name, ParameterKind::Number, other)),
        }
    }

    pub fn boolean(&self, name: &str) -> Result<bool, ToolError> {
        match self.get(name) {
            Some(ArgumentValue::Boolean(flag)) => Ok(*flag),
            other => Err(self.wrong_kind(name, ParameterKind::Boolean, other)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterInstance> {
        self.instances.iter()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn wrong_kind(
        &self,
        name: &str,
        expected: ParameterKind,
        found: Option<&ArgumentValue>,
    ) -> ToolError {
        let message = match found {
            None => "argument not declared".to_string(),
            Some(value) => format!("expected {} argument, found {value:?}", expected.as_str()),
        };
        ToolError::ArgumentDecode {
            function: self.function.clone(),
            parameter: name.to_string(),
            message,
        }
    }
}

/// One callable capability exposed to the model.
pub struct Function {
    name: String,
    description: String,
    parameters: Vec<Parameter>,
    disabled: AtomicBool,
    force_call: AtomicBool,
    handler: Arc<FunctionHandler>,
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("disabled", &self.is_disabled())
            .field("force_call", &self.is_forced())
            .finish()
    }
}

impl Function {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            disabled: AtomicBool::new(false),
            force_call: AtomicBool::new(false),
            handler: Arc::new(|_args| {
                Box::pin(async {
                    Err(ToolError::Execution(
                        "function handler not configured".to_string(),
                    ))
                })
            }),
        }
    }

    pub fn parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        self.handler = Arc::new(move |args| Box::pin(handler(args)));
        self
    }

    pub fn disabled(self, disabled: bool) -> Self {
        self.set_disabled(disabled);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Release);
    }

    pub fn is_forced(&self) -> bool {
        self.force_call.load(Ordering::Acquire)
    }

    pub fn set_force_call(&self, force_call: bool) {
        self.force_call.store(force_call, Ordering::Release);
    }

    /// Wire schema: every parameter is a required string.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for parameter in &self.parameters {
            properties.insert(
                parameter.name().to_string(),
                json!({
                    "type": "string",
                    "description": parameter.description(),
                }),
            );
        }

        let required = self
            .parameters
            .iter()
            .map(|parameter| Value::String(parameter.name().to_string()))
            .collect::<Vec<_>>();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    pub fn definition(&self) -> ModelToolDefinition {
        ModelToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.json_schema(),
        }
    }

    pub async fn invoke(&self, raw: &Map<String, Value>) -> Result<Value, ToolError> {
        let arguments = Arguments::decode(&self.name, &self.parameters, raw)?;
        (self.handler)(arguments).await
    }
}

/// A named group of functions plus an optional prompt describing them.
#[derive(Debug)]
pub struct Tool {
    name: String,
    injection_prompt: String,
    functions: Vec<Arc<Function>>,
}

impl Tool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            injection_prompt: String::new(),
            functions: Vec::new(),
        }
    }

    pub fn injection_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.injection_prompt = prompt.into();
        self
    }

    pub fn with_function(mut self, function: impl Into<Arc<Function>>) -> Self {
        self.functions.push(function.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prompt(&self) -> &str {
        &self.injection_prompt
    }

    pub fn functions(&self) -> &[Arc<Function>] {
        &self.functions
    }

    pub fn function(&self, name: &str) -> Option<&Arc<Function>> {
        self.functions.iter().find(|function| function.name() == name)
    }
}
