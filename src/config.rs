//! 設定ファイル管理モジュール
//!
//! settings.tomlから設定を読み込み、アプリケーション全体で使用できる
//! 型安全な設定構造体を提供します。設定変更の通知はSettingsBus経由で行う。

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// アプリケーション全体の設定
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    /// LLMプロバイダ関連設定
    #[serde(default)]
    pub provider: ProviderConfig,
    /// モデル生成オプション
    #[serde(default)]
    pub model_options: ModelOptions,
    /// アシスタント動作設定
    #[serde(default)]
    pub assistant: AssistantConfig,
    /// 実験フラグ（ツール単位のオプトアウト）
    #[serde(default)]
    pub experiments: HashMap<String, bool>,
}

/// LLMプロバイダ接続設定
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// OpenAI互換エンドポイントのベースURL
    #[serde(default)]
    pub base_url: String,
    /// APIキー
    #[serde(default)]
    pub api_key: String,
    /// 使用するモデルID
    #[serde(default)]
    pub model: String,
    /// 接続タイムアウト（秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// 読み取りタイムアウト（秒）
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
}

/// モデル生成オプション
#[derive(Debug, Clone, Deserialize)]
pub struct ModelOptions {
    /// 生成温度
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// 最大生成トークン数
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// アシスタント動作設定
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
    /// 既定モードのスラッグ
    #[serde(default = "default_mode_slug")]
    pub default_mode: String,
    /// 応答の優先言語（未指定なら指示しない）
    pub preferred_language: Option<String>,
    /// グローバルなカスタム指示
    #[serde(default)]
    pub custom_instructions: String,
    /// モード別システムプロンプト上書きファイルの置き場所
    pub prompt_dir: Option<String>,
    /// ファイル検索バックエンド（regex / match）
    #[serde(default = "default_search_method")]
    pub search_method: String,
    /// ディスパッチ時のカタログ再検査ポリシー（trust / strict）
    #[serde(default = "default_dispatch_policy")]
    pub dispatch_policy: String,
}

// デフォルト値を返す関数群
fn default_connect_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    300
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_mode_slug() -> String {
    "ask".to_string()
}

fn default_search_method() -> String {
    "regex".to_string()
}

fn default_dispatch_policy() -> String {
    "trust".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            model: String::new(),
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
        }
    }
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            default_mode: default_mode_slug(),
            preferred_language: None,
            custom_instructions: String::new(),
            prompt_dir: None,
            search_method: default_search_method(),
            dispatch_policy: default_dispatch_policy(),
        }
    }
}

impl Settings {
    /// TOMLファイルから設定を読み込む
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// TOML文字列から設定をパース
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML settings")
    }

    /// デフォルト設定ファイルパスを取得
    pub fn default_settings_path() -> std::path::PathBuf {
        if let Ok(path) = std::env::var("VAULT_COPILOT_SETTINGS") {
            return std::path::PathBuf::from(path);
        }

        if let Some(home) = dirs::home_dir() {
            let home_settings = home.join(".vault-copilot").join("settings.toml");
            if home_settings.exists() {
                return home_settings;
            }
        }

        std::path::PathBuf::from("settings.toml")
    }

    /// 指定ツールの実験フラグを評価（未指定は有効扱い）
    pub fn experiment_enabled(&self, name: &str) -> bool {
        self.experiments.get(name).copied().unwrap_or(true)
    }
}

/// 設定変更の購読ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// 設定変更の明示的なpublish/subscribeチャンネル
///
/// 購読者はコンポーネント構築時に登録し、破棄時に解除する。
/// publishは登録順に同期呼び出しする。
#[derive(Default)]
pub struct SettingsBus {
    subscribers: Vec<(SubscriptionId, Box<dyn Fn(&Settings) + Send + Sync>)>,
    next_id: u64,
}

impl SettingsBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 購読者を登録し、解除用のIDを返す
    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: Fn(&Settings) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(listener)));
        id
    }

    /// 購読を解除
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sid, _)| *sid != id);
    }

    /// 登録済みの全購読者に設定変更を通知
    pub fn publish(&self, settings: &Settings) {
        for (_, listener) in &self.subscribers {
            listener(settings);
        }
    }

    /// 登録中の購読者数
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_parse_settings() {
        let toml_content = r#"
[provider]
base_url = "https://api.example.com/v1"
api_key = "sk-test"
model = "test-model"

[model_options]
temperature = 0.2
max_tokens = 2048

[assistant]
default_mode = "write"
search_method = "match"
"#;
        let settings = Settings::parse(toml_content).unwrap();

        assert_eq!(settings.provider.base_url, "https://api.example.com/v1");
        assert_eq!(settings.provider.model, "test-model");
        assert_eq!(settings.model_options.temperature, 0.2);
        assert_eq!(settings.model_options.max_tokens, 2048);
        assert_eq!(settings.assistant.default_mode, "write");
        assert_eq!(settings.assistant.search_method, "match");
    }

    #[test]
    fn test_default_values() {
        let settings = Settings::default();

        assert!(settings.provider.base_url.is_empty());
        assert_eq!(settings.provider.connect_timeout, 30);
        assert_eq!(settings.provider.read_timeout, 300);
        assert_eq!(settings.model_options.max_tokens, 4096);
        assert_eq!(settings.assistant.default_mode, "ask");
        assert_eq!(settings.assistant.dispatch_policy, "trust");
    }

    #[test]
    fn test_partial_settings() {
        let toml_content = r#"
[provider]
base_url = "https://custom.example.com/v1"
"#;
        let settings = Settings::parse(toml_content).unwrap();

        assert_eq!(settings.provider.base_url, "https://custom.example.com/v1");
        assert_eq!(settings.provider.connect_timeout, 30); // デフォルト値
        assert_eq!(settings.assistant.default_mode, "ask");
    }

    #[test]
    fn test_experiment_enabled() {
        let mut settings = Settings::default();
        assert!(settings.experiment_enabled("insert_content"));

        settings
            .experiments
            .insert("insert_content".to_string(), false);
        assert!(!settings.experiment_enabled("insert_content"));

        settings
            .experiments
            .insert("search_and_replace".to_string(), true);
        assert!(settings.experiment_enabled("search_and_replace"));
    }

    #[test]
    fn test_settings_bus_publish_and_unsubscribe() {
        let mut bus = SettingsBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c1 = calls.clone();
        bus.subscribe(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = calls.clone();
        let id2 = bus.subscribe(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&Settings::default());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        bus.unsubscribe(id2);
        assert_eq!(bus.len(), 1);

        bus.publish(&Settings::default());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
