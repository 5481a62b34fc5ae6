//! モデル出力からのツール指示抽出
//!
//! 指示は ```json ブロック内の {"tool": 名前, "params": {フラットなキー値}} 形式。
//! 構文不良のブロックは指示として実行せず、プレーンテキスト扱いにする。

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// モデルが発行したツール指示
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    /// ツール名
    pub name: String,
    /// フラットなキー値引数。未知のキーは無視されるだけでエラーにしない。
    pub args: Map<String, Value>,
}

impl Directive {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Map::new(),
        }
    }

    pub fn with_arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    /// 文字列引数の取得（欠落・型不一致はNone）
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }

    /// 数値引数の取得
    pub fn arg_usize(&self, key: &str) -> Option<usize> {
        self.args.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
    }

    /// 真偽値引数の取得
    pub fn arg_bool(&self, key: &str) -> Option<bool> {
        self.args.get(key).and_then(|v| v.as_bool())
    }
}

/// LLM応答からツール指示を抽出するパーサ
pub struct DirectiveParser;

impl DirectiveParser {
    /// 応答テキストから全指示を抽出
    pub fn parse(response: &str) -> Vec<Directive> {
        let mut directives = Vec::new();

        for block in Self::extract_json_blocks(response) {
            match Self::parse_directive(&block) {
                Ok(directive) => directives.push(directive),
                Err(e) => {
                    tracing::debug!("Skipping malformed directive block: {}", e);
                }
            }
        }

        directives
    }

    /// 最初の指示のみを取得
    pub fn parse_first(response: &str) -> Option<Directive> {
        Self::parse(response).into_iter().next()
    }

    /// JSONブロックを抽出
    fn extract_json_blocks(text: &str) -> Vec<String> {
        let re = Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)```").unwrap();
        let mut blocks = Vec::new();

        for cap in re.captures_iter(text) {
            if let Some(content) = cap.get(1) {
                blocks.push(content.as_str().trim().to_string());
            }
        }

        // ```なしの生JSONも検出
        if blocks.is_empty() {
            if let Some(json) = Self::find_raw_json(text) {
                blocks.push(json);
            }
        }

        blocks
    }

    /// 生のJSONオブジェクトを検出
    fn find_raw_json(text: &str) -> Option<String> {
        let text = text.trim();
        let start = text.find('{')?;

        let mut depth = 0;
        for (i, c) in text[start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(text[start..start + i + c.len_utf8()].to_string());
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// JSONをDirectiveにパース
    fn parse_directive(json_str: &str) -> Result<Directive, ProtocolError> {
        let value: Value = serde_json::from_str(json_str).map_err(|e| ProtocolError {
            reason: e.to_string(),
        })?;

        let name = value
            .get("tool")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProtocolError {
                reason: "missing 'tool' field".to_string(),
            })?
            .to_string();

        let args = match value.get("params") {
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(ProtocolError {
                    reason: "'params' is not an object".to_string(),
                })
            }
            None => Map::new(),
        };

        Ok(Directive { name, args })
    }

    /// 応答に指示が含まれるかチェック
    pub fn has_directive(response: &str) -> bool {
        let re = Regex::new(r#"\{\s*"tool"\s*:"#).unwrap();
        re.is_match(response)
    }

    /// 指示ブロックとテキスト部分を分離
    pub fn split_response(response: &str) -> (String, Vec<Directive>) {
        let re = Regex::new(r"```(?:json)?\s*\n?[\s\S]*?```").unwrap();
        let text_only = re.replace_all(response, "").trim().to_string();
        let directives = Self::parse(response);
        (text_only, directives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_block() {
        let response = r#"
I'll read that note for you.

```json
{"tool": "read_file", "params": {"path": "notes/today.md"}}
```
"#;
        let directives = DirectiveParser::parse(response);
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].name, "read_file");
        assert_eq!(directives[0].arg_str("path"), Some("notes/today.md"));
    }

    #[test]
    fn test_parse_multiple_directives() {
        let response = r#"
```json
{"tool": "list_files", "params": {"path": "notes"}}
```

Then let me read the note:

```json
{"tool": "read_file", "params": {"path": "notes/today.md"}}
```
"#;
        let directives = DirectiveParser::parse(response);
        assert_eq!(directives.len(), 2);
    }

    #[test]
    fn test_malformed_block_is_skipped() {
        let response = r#"
```json
{"tool": "read_file", "params": {broken json
```
"#;
        let directives = DirectiveParser::parse(response);
        assert!(directives.is_empty());
    }

    #[test]
    fn test_missing_tool_field_is_skipped() {
        let response = r#"
```json
{"params": {"path": "notes/today.md"}}
```
"#;
        assert!(DirectiveParser::parse(response).is_empty());
    }

    #[test]
    fn test_unknown_keys_are_ignorable() {
        let response = r#"
```json
{"tool": "write_to_file", "params": {"path": "a.md", "content": "x", "unexpected_key": 42}}
```
"#;
        let directives = DirectiveParser::parse(response);
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].arg_str("path"), Some("a.md"));
        // 未知のキーはエラーを起こさない
        assert_eq!(directives[0].arg_str("unexpected_key"), None);
    }

    #[test]
    fn test_has_directive() {
        assert!(DirectiveParser::has_directive(r#"{"tool": "read_file"}"#));
        assert!(!DirectiveParser::has_directive("Just a regular message"));
    }

    #[test]
    fn test_split_response() {
        let response = "Here you go.\n\n```json\n{\"tool\": \"read_file\", \"params\": {}}\n```";
        let (text, directives) = DirectiveParser::split_response(response);
        assert_eq!(text, "Here you go.");
        assert_eq!(directives.len(), 1);
    }

    #[test]
    fn test_raw_json_detected() {
        let response = r#"{"tool": "attempt_completion", "params": {"result": "All done"}}"#;
        let directives = DirectiveParser::parse(response);
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].name, "attempt_completion");
    }
}
