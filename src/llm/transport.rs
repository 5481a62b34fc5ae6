//! LLMトランスポート契約とOpenAI互換クライアント
//!
//! SSEストリーミングでコンテンツ差分とreasoning差分を受信する。
//! 自動リトライはしない。失敗した交換はそこで終わり、再送はユーザー操作。

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::streaming::DeltaStream;
use crate::config::{ModelOptions, ProviderConfig};
use crate::error::ExchangeError;

/// モデル/プロバイダ選択
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelector {
    pub provider: String,
    pub model_id: String,
}

impl ModelSelector {
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
        }
    }
}

/// リクエストメッセージのロール
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestRole {
    System,
    User,
    Assistant,
}

/// トランスポートへ送るメッセージ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub role: RequestRole,
    pub content: String,
}

impl RequestMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: RequestRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: RequestRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: RequestRole::Assistant,
            content: content.into(),
        }
    }
}

/// ストリーミング差分
///
/// contentとreasoningは別チャンネルで、互いを上書きしない。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamDelta {
    pub content: Option<String>,
    pub reasoning: Option<String>,
}

impl StreamDelta {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            reasoning: None,
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            content: None,
            reasoning: Some(text.into()),
        }
    }
}

/// LLMトランスポートの契約
///
/// 返されるストリームは有限で、再開不可。キャンセル後の再試行は新規呼び出し。
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn stream_chat(
        &self,
        model: &ModelSelector,
        messages: &[RequestMessage],
        options: &ModelOptions,
        cancel: CancellationToken,
    ) -> Result<DeltaStream, ExchangeError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [RequestMessage],
    stream: bool,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

/// OpenAI互換エンドポイント用クライアント
#[derive(Clone)]
pub struct OpenAiCompatClient {
    client: Client,
    config: ProviderConfig,
}

impl OpenAiCompatClient {
    pub fn new(config: ProviderConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .read_timeout(Duration::from_secs(config.read_timeout))
            .no_proxy()
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, config }
    }

    /// リクエスト前の設定検証（欠落はConfigurationエラーとして交換を終了させる）
    fn validate(&self, model: &ModelSelector) -> Result<(), ExchangeError> {
        if self.config.base_url.trim().is_empty() {
            return Err(ExchangeError::Configuration(
                "provider base URL is not set".to_string(),
            ));
        }
        if self.config.api_key.trim().is_empty() {
            return Err(ExchangeError::Configuration(
                "provider API key is not set".to_string(),
            ));
        }
        if model.model_id.trim().is_empty() {
            return Err(ExchangeError::Configuration("model is not set".to_string()));
        }
        Ok(())
    }

    /// SSE行からチャンクを取り出す（"data: "プレフィックス、[DONE]で終端）
    fn parse_sse_line(line: &str) -> Option<Result<StreamDelta, String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        let payload = trimmed.strip_prefix("data:").map(str::trim_start)?;
        if payload == "[DONE]" {
            return None;
        }

        match serde_json::from_str::<ChatChunk>(payload) {
            Ok(chunk) => {
                let delta = chunk.choices.into_iter().next().map(|c| c.delta)?;
                if delta.content.is_none() && delta.reasoning_content.is_none() {
                    return None;
                }
                Some(Ok(StreamDelta {
                    content: delta.content,
                    reasoning: delta.reasoning_content,
                }))
            }
            Err(e) => Some(Err(format!("malformed stream chunk: {}", e))),
        }
    }
}

#[async_trait]
impl LlmTransport for OpenAiCompatClient {
    async fn stream_chat(
        &self,
        model: &ModelSelector,
        messages: &[RequestMessage],
        options: &ModelOptions,
        cancel: CancellationToken,
    ) -> Result<DeltaStream, ExchangeError> {
        self.validate(model)?;

        let request = ChatRequest {
            model: &model.model_id,
            messages,
            stream: true,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Transport(format!("{}: {}", status, body)));
        }

        let (tx, rx) = mpsc::channel(100);
        let mut byte_stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = Vec::new();

            loop {
                let chunk = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    chunk = byte_stream.next() => chunk,
                };

                let Some(chunk) = chunk else { break };

                match chunk {
                    Ok(bytes) => {
                        buffer.extend_from_slice(&bytes);

                        // 改行で分割してSSE行をパース
                        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                            let line: Vec<u8> = buffer.drain(..=pos).collect();
                            let Ok(text) = std::str::from_utf8(&line) else {
                                continue;
                            };

                            if let Some(event) = Self::parse_sse_line(text) {
                                if tx.send(event).await.is_err() {
                                    return; // レシーバーがドロップされた
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Stream interrupted: {}", e);
                        let _ = tx.send(Err(e.to_string())).await;
                        break;
                    }
                }
            }
        });

        Ok(DeltaStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_missing_config() {
        let client = OpenAiCompatClient::new(ProviderConfig::default());
        let err = client
            .validate(&ModelSelector::new("openai", "m1"))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Configuration(_)));

        let client = OpenAiCompatClient::new(ProviderConfig {
            base_url: "https://api.example.com/v1".to_string(),
            api_key: "sk-test".to_string(),
            ..ProviderConfig::default()
        });
        assert!(client.validate(&ModelSelector::new("openai", "m1")).is_ok());
        let err = client
            .validate(&ModelSelector::new("openai", ""))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Configuration(_)));
    }

    #[test]
    fn test_parse_sse_line() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#;
        let delta = OpenAiCompatClient::parse_sse_line(line).unwrap().unwrap();
        assert_eq!(delta.content.as_deref(), Some("Hello"));
        assert!(delta.reasoning.is_none());

        let reasoning = r#"data: {"choices":[{"delta":{"reasoning_content":"hmm"}}]}"#;
        let delta = OpenAiCompatClient::parse_sse_line(reasoning)
            .unwrap()
            .unwrap();
        assert_eq!(delta.reasoning.as_deref(), Some("hmm"));

        assert!(OpenAiCompatClient::parse_sse_line("data: [DONE]").is_none());
        assert!(OpenAiCompatClient::parse_sse_line("").is_none());
        assert!(OpenAiCompatClient::parse_sse_line(": keep-alive").is_none());

        let malformed = OpenAiCompatClient::parse_sse_line("data: {not json").unwrap();
        assert!(malformed.is_err());
    }
}
