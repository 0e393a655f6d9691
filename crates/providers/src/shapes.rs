//! Response-shape parsers for hosted inference payloads.
//!
//! Hosted text-generation endpoints answer in several shapes depending on the
//! model and task. Each known shape is a named parser; [`parse_first`] tries
//! them in order and the first match wins.

use serde_json::Value;

/// Prompt delimiter that some endpoints echo back in front of the answer.
pub const INST_DELIMITER: &str = "[/INST]";

/// A named strategy that extracts generated text from one response shape.
#[derive(Clone, Copy)]
pub struct ShapeParser {
    pub name: &'static str,
    pub parse: fn(&Value) -> Option<String>,
}

impl std::fmt::Debug for ShapeParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapeParser").field("name", &self.name).finish()
    }
}

/// Shapes accepted from the hosted inference API, in precedence order.
pub const HOSTED_SHAPES: &[ShapeParser] = &[
    ShapeParser {
        name: "plain_string",
        parse: plain_string,
    },
    ShapeParser {
        name: "list_of_strings",
        parse: list_of_strings,
    },
    ShapeParser {
        name: "list_of_objects",
        parse: list_of_objects,
    },
    ShapeParser {
        name: "object_generated_text",
        parse: object_generated_text,
    },
    ShapeParser {
        name: "object_content",
        parse: object_content,
    },
    ShapeParser {
        name: "object_message_content",
        parse: object_message_content,
    },
];

/// Run `parsers` in order and return the first match with the parser's name.
pub fn parse_first(value: &Value, parsers: &[ShapeParser]) -> Option<(&'static str, String)> {
    parsers
        .iter()
        .find_map(|p| (p.parse)(value).map(|text| (p.name, text)))
}

fn plain_string(value: &Value) -> Option<String> {
    value.as_str().map(String::from)
}

fn list_of_strings(value: &Value) -> Option<String> {
    value.as_array()?.first()?.as_str().map(String::from)
}

fn list_of_objects(value: &Value) -> Option<String> {
    let first = value.as_array()?.first()?;
    text_field(first, "generated_text").or_else(|| text_field(first, "content"))
}

fn object_generated_text(value: &Value) -> Option<String> {
    text_field(value, "generated_text")
}

fn object_content(value: &Value) -> Option<String> {
    text_field(value, "content")
}

fn object_message_content(value: &Value) -> Option<String> {
    text_field(value.as_object()?.get("message")?, "content")
}

fn text_field(value: &Value, field: &str) -> Option<String> {
    value.as_object()?.get(field)?.as_str().map(String::from)
}

/// Drop everything up to and including the last echoed `[/INST]` delimiter.
pub fn strip_prompt_artifact(text: &str) -> String {
    match text.rfind(INST_DELIMITER) {
        Some(idx) => text[idx + INST_DELIMITER.len()..].trim().to_string(),
        None => text.to_string(),
    }
}

/// First `max_chars` characters of `body`, for diagnostics.
pub fn excerpt(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
