//! Input schema construction and validation.
//!
//! Every tool publishes a JSON Schema assembled by [`SchemaBuilder`]: the
//! tool's own fields merged with the common fields every tool accepts
//! (`model`, `temperature`, `thinking_mode`, `continuation_id`, `files`,
//! `images`). Validation is structural (required fields, primitive types,
//! enum membership) and reports the offending field path.

use serde_json::{Map, Value, json};

use super::ToolError;

/// Builder for tool input schemas.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl SchemaBuilder {
    /// An empty object schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an optional field.
    #[must_use]
    pub fn field(mut self, name: &str, schema: Value) -> Self {
        self.properties.insert(name.to_owned(), schema);
        self
    }

    /// Add a required field.
    #[must_use]
    pub fn required_field(mut self, name: &str, schema: Value) -> Self {
        self.properties.insert(name.to_owned(), schema);
        self.required.push(name.to_owned());
        self
    }

    /// Add the fields every tool accepts.
    #[must_use]
    pub fn common_fields(self) -> Self {
        self.field(
            "model",
            string_prop(
                "Model to use: an alias, a canonical name, or 'auto' to pick by capability rank.",
            ),
        )
        .field("temperature", json!({"type": "number", "description": "Sampling temperature; constrained per model."}))
        .field(
            "thinking_mode",
            enum_prop(
                "Reasoning effort for models with extended thinking.",
                &["minimal", "low", "medium", "high", "max"],
            ),
        )
        .field(
            "continuation_id",
            string_prop("Thread id from a previous response; continues that conversation."),
        )
        .field("files", string_array_prop("Absolute paths of files relevant to the request."))
        .field("images", string_array_prop("Absolute paths of image attachments."))
        .field(
            "working_directory",
            string_prop("Absolute directory where generated artifacts may be written."),
        )
    }

    /// Make `working_directory` mandatory; used by tools that emit
    /// generated-code artifacts.
    #[must_use]
    pub fn require_working_directory(self) -> Self {
        self.required_field(
            "working_directory",
            string_prop("Absolute directory where generated artifacts may be written."),
        )
    }

    /// Finish the schema.
    #[must_use]
    pub fn build(self) -> Value {
        let mut schema = json!({
            "type": "object",
            "properties": Value::Object(self.properties),
            "additionalProperties": false,
        });
        if !self.required.is_empty() {
            schema["required"] = json!(self.required);
        }
        schema
    }
}

/// A string property with a description.
#[must_use]
pub fn string_prop(description: &str) -> Value {
    json!({"type": "string", "description": description})
}

/// An integer property with a description.
#[must_use]
pub fn integer_prop(description: &str) -> Value {
    json!({"type": "integer", "description": description})
}

/// A boolean property with a description.
#[must_use]
pub fn boolean_prop(description: &str) -> Value {
    json!({"type": "boolean", "description": description})
}

/// An array-of-strings property with a description.
#[must_use]
pub fn string_array_prop(description: &str) -> Value {
    json!({"type": "array", "items": {"type": "string"}, "description": description})
}

/// A string enum property with a description.
#[must_use]
pub fn enum_prop(description: &str, values: &[&str]) -> Value {
    json!({"type": "string", "enum": values, "description": description})
}

/// Validate `args` against a schema produced by [`SchemaBuilder`].
///
/// # Errors
///
/// [`ToolError::SchemaInvalid`] naming the offending field path.
pub fn validate_input(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let Some(args_map) = args.as_object() else {
        return Err(ToolError::SchemaInvalid {
            path: "$".to_owned(),
            message: "arguments must be a JSON object".to_owned(),
        });
    };
    let properties = schema["properties"].as_object();

    if let Some(required) = schema["required"].as_array() {
        for name in required.iter().filter_map(Value::as_str) {
            if !args_map.contains_key(name) {
                return Err(ToolError::SchemaInvalid {
                    path: name.to_owned(),
                    message: "missing required field".to_owned(),
                });
            }
        }
    }

    for (name, value) in args_map {
        let Some(prop) = properties.and_then(|p| p.get(name)) else {
            return Err(ToolError::SchemaInvalid {
                path: name.clone(),
                message: "unknown field".to_owned(),
            });
        };
        check_value(name, prop, value)?;
    }
    Ok(())
}

fn check_value(path: &str, prop: &Value, value: &Value) -> Result<(), ToolError> {
    let invalid = |message: String| ToolError::SchemaInvalid {
        path: path.to_owned(),
        message,
    };

    match prop["type"].as_str() {
        Some("string") => {
            let Some(s) = value.as_str() else {
                return Err(invalid("expected a string".to_owned()));
            };
            if let Some(allowed) = prop["enum"].as_array()
                && !allowed.iter().any(|v| v.as_str() == Some(s))
            {
                let options: Vec<&str> =
                    allowed.iter().filter_map(Value::as_str).collect();
                return Err(invalid(format!(
                    "'{s}' is not one of {}",
                    options.join("|")
                )));
            }
        }
        Some("number") => {
            if !value.is_number() {
                return Err(invalid("expected a number".to_owned()));
            }
        }
        Some("integer") => {
            if !value.is_i64() && !value.is_u64() {
                return Err(invalid("expected an integer".to_owned()));
            }
        }
        Some("boolean") => {
            if !value.is_boolean() {
                return Err(invalid("expected a boolean".to_owned()));
            }
        }
        Some("array") => {
            let Some(items) = value.as_array() else {
                return Err(invalid("expected an array".to_owned()));
            };
            for (index, item) in items.iter().enumerate() {
                check_value(&format!("{path}[{index}]"), &prop["items"], item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn chat_like_schema() -> Value {
        SchemaBuilder::new()
            .required_field("prompt", string_prop("The message."))
            .common_fields()
            .build()
    }

    #[test]
    fn build_merges_tool_and_common_fields() {
        let schema = chat_like_schema();
        let props = schema["properties"].as_object().unwrap();
        for field in [
            "prompt",
            "model",
            "temperature",
            "thinking_mode",
            "continuation_id",
            "files",
            "images",
            "working_directory",
        ] {
            assert!(props.contains_key(field), "missing {field}");
        }
        assert_eq!(schema["required"], json!(["prompt"]));
        assert_eq!(schema["additionalProperties"], json!(false));
    }

    #[test]
    fn missing_required_field_names_the_path() {
        let schema = chat_like_schema();
        let err = validate_input(&schema, &json!({"model": "auto"})).unwrap_err();
        match err {
            ToolError::SchemaInvalid { path, .. } => assert_eq!(path, "prompt"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn wrong_type_names_the_path() {
        let schema = chat_like_schema();
        let err = validate_input(&schema, &json!({"prompt": 42})).unwrap_err();
        match err {
            ToolError::SchemaInvalid { path, message } => {
                assert_eq!(path, "prompt");
                assert!(message.contains("string"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn enum_violation_lists_options() {
        let schema = chat_like_schema();
        let err = validate_input(
            &schema,
            &json!({"prompt": "hi", "thinking_mode": "ultra"}),
        )
        .unwrap_err();
        match err {
            ToolError::SchemaInvalid { path, message } => {
                assert_eq!(path, "thinking_mode");
                assert!(message.contains("minimal|low|medium|high|max"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn array_items_are_checked_with_index_paths() {
        let schema = chat_like_schema();
        let err = validate_input(
            &schema,
            &json!({"prompt": "hi", "files": ["/ok", 7]}),
        )
        .unwrap_err();
        match err {
            ToolError::SchemaInvalid { path, .. } => assert_eq!(path, "files[1]"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let schema = chat_like_schema();
        let err = validate_input(
            &schema,
            &json!({"prompt": "hi", "promt": "typo"}),
        )
        .unwrap_err();
        match err {
            ToolError::SchemaInvalid { path, message } => {
                assert_eq!(path, "promt");
                assert!(message.contains("unknown"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn valid_input_passes() {
        let schema = chat_like_schema();
        validate_input(
            &schema,
            &json!({
                "prompt": "hi",
                "model": "auto",
                "temperature": 0.4,
                "thinking_mode": "high",
                "files": ["/srv/app/main.rs"],
            }),
        )
        .unwrap();
    }

    #[test]
    fn non_object_arguments_are_rejected_at_root() {
        let schema = chat_like_schema();
        let err = validate_input(&schema, &json!(["not", "an", "object"])).unwrap_err();
        match err {
            ToolError::SchemaInvalid { path, .. } => assert_eq!(path, "$"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn working_directory_can_be_required() {
        let schema = SchemaBuilder::new()
            .required_field("prompt", string_prop("p"))
            .require_working_directory()
            .build();
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "working_directory"));
    }
}
