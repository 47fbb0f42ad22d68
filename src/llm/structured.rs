//! 结构化输出：从模型回复中提取 JSON 对象并反序列化
//!
//! 依次尝试：整条回复即 JSON；回复以 ``` 代码块开头时取块内内容；
//! 在文本中找第一个括号平衡且能解析的 `{ ... }`（跳过字符串内的括号）。
//! 字符串值里出现的代码块或花括号不影响提取。
//! Schema 由 schemars 生成后拼入 prompt，减少格式错误。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::llm::LlmError;

/// 提取回复中的 JSON 对象文本；找不到时返回 None
pub fn extract_json_object(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if is_object(trimmed) {
        return Some(trimmed);
    }
    if let Some(inner) = fenced_body(trimmed).filter(|inner| is_object(inner)) {
        return Some(inner);
    }
    trimmed
        .match_indices('{')
        .filter_map(|(start, _)| balanced_object(&trimmed[start..]))
        .find(|candidate| is_object(candidate))
}

fn is_object(s: &str) -> bool {
    s.starts_with('{') && matches!(serde_json::from_str::<Value>(s), Ok(Value::Object(_)))
}

/// 以 ``` 开头的回复：去掉首行（```json）与最后一个 ``` 之后的内容
fn fenced_body(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```")?;
    let body = &rest[rest.find('\n')? + 1..];
    let end = body.rfind("```").unwrap_or(body.len());
    Some(body[..end].trim())
}

/// 从 `{` 开始到与之配对的 `}`；字符串内的括号与转义字符不计
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// 解析模型回复为 T；无 JSON 或字段不符时为 Malformed
pub fn parse_reply<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let json = extract_json_object(text)
        .ok_or_else(|| LlmError::Malformed(format!("no JSON object in reply: {}", preview(text))))?;
    serde_json::from_str(json).map_err(|e| LlmError::Malformed(format!("{e}: {}", preview(json))))
}

/// T 的 JSON Schema 字符串，可拼入 system prompt
pub fn schema_json<T: JsonSchema>() -> String {
    let schema = schema_for!(T);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

fn preview(s: &str) -> String {
    s.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Verdict {
        complete: bool,
    }

    #[test]
    fn test_extracts_fenced_block() {
        let text = "Sure!\n```json\n{\"complete\": true}\n```\nbye";
        assert_eq!(extract_json_object(text), Some("{\"complete\": true}"));
    }

    #[test]
    fn test_extracts_outer_braces_from_prose() {
        let text = "I think {\"complete\": false, \"x\": {\"y\": 1}} is right";
        let v: Verdict = parse_reply(text).unwrap();
        assert!(!v.complete);
    }

    #[test]
    fn test_fence_inside_string_value() {
        let text = "{\"complete\": true, \"reason\": \"Run:\\n```bash\\nls\\n```\"}";
        assert_eq!(extract_json_object(text), Some(text));
        let v: Verdict = parse_reply(text).unwrap();
        assert!(v.complete);
    }

    #[test]
    fn test_fenced_reply_with_nested_fence() {
        let text = "```json\n{\"complete\": true, \"reason\": \"use ```ls```\"}\n```";
        let v: Verdict = parse_reply(text).unwrap();
        assert!(v.complete);
    }

    #[test]
    fn test_skips_braces_that_are_not_json() {
        let text = "Use awk '{print $1}' first, then reply {\"complete\": false}";
        assert_eq!(extract_json_object(text), Some("{\"complete\": false}"));
        assert_eq!(extract_json_object("awk '{print $1}' file"), None);
    }

    #[test]
    fn test_braces_inside_strings_are_balanced() {
        let text = "ok {\"complete\": true, \"reason\": \"a } and { \\\" inside\"} trailing }";
        let v: Verdict = parse_reply(text).unwrap();
        assert!(v.complete);
    }

    #[test]
    fn test_plain_text_is_malformed() {
        let err = parse_reply::<Verdict>("no json here").unwrap_err();
        assert!(matches!(err, LlmError::Malformed(_)));
        let err = parse_reply::<Verdict>("{\"other\": 1}").unwrap_err();
        assert!(matches!(err, LlmError::Malformed(_)));
    }

    #[test]
    fn test_schema_mentions_fields() {
        assert!(schema_json::<Verdict>().contains("complete"));
    }
}
