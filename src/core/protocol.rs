//! Prompt construction and interpretation of model output

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::debug;

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{Batch, ChatMessage};

/// System prompt shared by every translation request
pub const SYSTEM_PROMPT: &str = "你是专业的音效术语翻译助手，请将英文音效术语翻译为中文。";

const USER_PROMPT_HEADER: &str = concat!(
    "请将以下音效条目的text字段从英文翻译为中文，保持同类条目风格一致。\n",
    "翻译为中文。保证翻译后的中文的每一个词汇用下划线分割，不使用空格。如遇某些无法翻译的词语或缩写，就保留\n",
    "输出格式：JSON字典，key为id，value为翻译后的中文\n",
    "示例输入：[{\"id\": \"123\", \"text\": \"WeaponSword_Wooden Hit_JSE\"}]\n",
    "示例输出：{\"123\": \"武器_剑_木制_击打_JSE\"}\n\n",
    "请翻译以下条目：\n",
);

/// Build the user prompt listing `{id, text}` items of a batch
pub fn build_user_prompt(batch: &Batch) -> Result<String> {
    let items = serde_json::to_string(&batch.items)?;
    Ok(format!("{}{}", USER_PROMPT_HEADER, items))
}

/// Messages for one chat completion covering a batch
pub fn build_messages(batch: &Batch) -> Result<Vec<ChatMessage>> {
    Ok(vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(build_user_prompt(batch)?),
    ])
}

/// Places where a JSON object may open: `{` followed by a key or `}`
fn object_start() -> &'static Regex {
    static START: OnceLock<Regex> = OnceLock::new();
    START.get_or_init(|| Regex::new(r#"\{\s*["}]"#).expect("static regex"))
}

/// Parse content that must be a JSON object
pub fn parse_object_strict(content: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(content.trim()) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(TranslationError::format(format!("Expected a JSON object, got: {}", other))),
        Err(e) => Err(TranslationError::format(format!("Invalid JSON content: {}", e))),
    }
}

/// Parse model output that may wrap the JSON object in prose or code fences
pub fn extract_json_object(content: &str) -> Result<Map<String, Value>> {
    if let Ok(map) = parse_object_strict(content) {
        return Ok(map);
    }

    // First candidate that parses as one complete object; text after it is ignored
    for start in object_start().find_iter(content).map(|m| m.start()) {
        let mut values = serde_json::Deserializer::from_str(&content[start..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(map))) = values.next() {
            debug!("Extracted JSON object at offset {} of mixed output", start);
            return Ok(map);
        }
    }

    Err(TranslationError::format(format!("No JSON object in response: {}", content)))
}

/// Translation map carried by a result object.
///
/// Models answer either `{"result": {id: name}}` or the flat `{id: name}`
/// map. A `result` key holding an object is taken as the envelope; any other
/// object is treated as the translation map itself.
pub fn normalize_envelope(result: Map<String, Value>) -> Result<Map<String, Value>> {
    match result.get("result") {
        Some(Value::Object(inner)) => Ok(inner.clone()),
        Some(other) => Err(TranslationError::format(format!(
            "Result envelope does not hold an object: {}",
            other
        ))),
        None => Ok(result),
    }
}
