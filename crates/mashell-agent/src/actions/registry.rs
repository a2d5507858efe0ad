use super::{ActionInvocation, ActionKind, RawOrigin, RiskClass, classify_command};
use crate::ActionError;
use mashell_llm::{ToolCall, ToolDefinition};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq)]
pub struct ActionSpec {
    pub kind: ActionKind,
    pub description: String,
    pub parameters: Value,
}

impl ActionSpec {
    fn builtin(kind: ActionKind) -> Self {
        Self {
            kind,
            description: kind.description().to_string(),
            parameters: kind.parameters(),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.kind.as_str().to_string(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// The fixed catalog of actions. Read-only once built.
#[derive(Clone, Debug)]
pub struct ActionRegistry {
    specs: BTreeMap<ActionKind, ActionSpec>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ActionRegistry {
    pub fn builtin() -> Self {
        let specs = ActionKind::ALL
            .into_iter()
            .map(|kind| (kind, ActionSpec::builtin(kind)))
            .collect();
        Self { specs }
    }

    pub fn lookup(&self, name: &str) -> Result<&ActionSpec, ActionError> {
        ActionKind::parse(name)
            .and_then(|kind| self.specs.get(&kind))
            .ok_or_else(|| ActionError::UnknownAction(name.to_string()))
    }

    /// Definitions advertised to the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> =
            self.specs.values().map(ActionSpec::definition).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.specs.keys().map(ActionKind::as_str).collect()
    }

    /// Turns a model tool call into a validated invocation.
    pub fn validate(&self, tool_call: &ToolCall) -> Result<ActionInvocation, ActionError> {
        let spec = self.lookup(&tool_call.name)?;
        let arguments = parse_tool_arguments(tool_call)?;
        let origin = RawOrigin {
            call_id: tool_call.id.clone(),
            name: tool_call.name.clone(),
            raw_arguments: tool_call
                .raw_arguments
                .clone()
                .unwrap_or_else(|| tool_call.arguments.to_string()),
        };
        validate_arguments(spec.kind, &spec.parameters, &arguments)?;
        Ok(ActionInvocation::new(spec.kind, arguments, origin))
    }

    /// Re-validates a human-edited parameter set for an already-proposed invocation.
    pub fn revalidate(
        &self,
        original: &ActionInvocation,
        parameters: Value,
    ) -> Result<ActionInvocation, ActionError> {
        let spec = self.lookup(original.kind().as_str())?;
        validate_arguments(spec.kind, &spec.parameters, &parameters)?;
        Ok(ActionInvocation::new(
            spec.kind,
            parameters,
            original.origin().clone(),
        ))
    }

    /// Risk of a concrete invocation. Commands are classified by their text.
    pub fn classify(&self, invocation: &ActionInvocation) -> RiskClass {
        match invocation.kind() {
            ActionKind::ExecuteCommand | ActionKind::RunBackground => invocation
                .subject()
                .map(classify_command)
                .unwrap_or(RiskClass::Execute),
            kind => kind.base_risk(),
        }
    }
}

fn parse_tool_arguments(tool_call: &ToolCall) -> Result<Value, ActionError> {
    if let Some(raw_arguments) = &tool_call.raw_arguments {
        let raw = raw_arguments.trim();
        if raw.is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        return serde_json::from_str::<Value>(raw).map_err(|error| {
            ActionError::invalid(&tool_call.name, format!("invalid JSON arguments: {error}"))
        });
    }

    if tool_call.arguments.is_null() {
        return Ok(Value::Object(Default::default()));
    }
    Ok(tool_call.arguments.clone())
}

fn validate_arguments(
    kind: ActionKind,
    schema: &Value,
    arguments: &Value,
) -> Result<(), ActionError> {
    let action = kind.as_str();
    let object = arguments
        .as_object()
        .ok_or_else(|| ActionError::invalid(action, "arguments must be a JSON object"))?;

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return Err(ActionError::invalid(
                    action,
                    format!("missing required argument '{key}'"),
                ));
            }
        }
    }

    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let additional_allowed = schema
        .get("additionalProperties")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    for (key, value) in object {
        let Some(property) = properties.get(key) else {
            if additional_allowed {
                continue;
            }
            return Err(ActionError::invalid(
                action,
                format!("unexpected argument '{key}'"),
            ));
        };

        if let Some(type_name) = property.get("type").and_then(Value::as_str) {
            let is_valid = match type_name {
                "string" => value.is_string(),
                "number" => value.is_number(),
                // Every integer parameter is a count or a duration.
                "integer" => value.as_u64().is_some(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !is_valid {
                let expected = if type_name == "integer" {
                    "non-negative integer"
                } else {
                    type_name
                };
                return Err(ActionError::invalid(
                    action,
                    format!(
                        "argument '{key}' expected {expected} but received {}",
                        json_type_name(value)
                    ),
                ));
            }
        }

        if let Some(min_length) = property.get("minLength").and_then(Value::as_u64) {
            let length = value.as_str().map(|text| text.trim().chars().count());
            if length.is_some_and(|length| (length as u64) < min_length) {
                return Err(ActionError::invalid(
                    action,
                    format!("argument '{key}' must not be empty"),
                ));
            }
        }
    }

    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::String(_) => "string",
        Value::Number(number) if number.is_i64() && !number.is_u64() => "negative integer",
        Value::Number(_) => "number",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
