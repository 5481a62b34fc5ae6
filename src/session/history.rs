//! 会話履歴の永続化管理
//!
//! ~/.vault-copilot/history/ にセッションをJSON形式で保存・読み込みする。
//! 書き込みは常に全スナップショット（write-through）で、部分書き込みはしない。

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::conversation::ChatSession;
use super::turn::{Mentionable, Role, Turn};
use crate::llm::ModelSelector;

/// 履歴ストアの契約
///
/// 保存は明示されたチェックポイントでのみ呼ばれ、チャンク境界では呼ばれない。
pub trait HistoryStore: Send + Sync {
    /// IDでセッションを読み込む（存在しなければNone）
    fn load_session(&self, id: &str) -> Result<Option<ChatSession>>;

    /// セッション全体を保存
    fn save_session(&self, session: &ChatSession) -> Result<()>;
}

/// 永続化用のセッションデータ
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub id: String,
    pub name: String,
    /// 保存日時（Unix timestamp）
    pub saved_at: i64,
    pub mode: String,
    pub provider: String,
    pub model: String,
    pub turns: Vec<PersistedTurn>,
}

/// 永続化用のターン
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedTurn {
    pub id: String,
    pub role: String,
    pub content: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Mentionable>,
    #[serde(default)]
    pub is_tool_result: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_content: Option<String>,
}

/// 履歴一覧のエントリ
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub name: String,
    pub saved_at: i64,
    pub turn_count: usize,
    pub path: PathBuf,
}

/// JSONファイルベースの履歴ストア
pub struct JsonHistoryStore {
    history_dir: PathBuf,
}

impl JsonHistoryStore {
    /// デフォルトでは ~/.vault-copilot/history/ を使用
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        let history_dir = home.join(".vault-copilot").join("history");

        Self::with_directory(history_dir)
    }

    /// 指定されたディレクトリで履歴ストアを作成
    pub fn with_directory(history_dir: PathBuf) -> Result<Self> {
        if !history_dir.exists() {
            std::fs::create_dir_all(&history_dir)
                .context("Failed to create history directory")?;
        }

        Ok(Self { history_dir })
    }

    /// 保存されたセッション一覧を取得（保存日時の降順）
    pub fn list(&self) -> Result<Vec<HistoryEntry>> {
        let mut entries = Vec::new();

        if !self.history_dir.exists() {
            return Ok(entries);
        }

        let read_dir = std::fs::read_dir(&self.history_dir)
            .context("Failed to read history directory")?;

        for entry in read_dir {
            let entry = entry?;
            let path = entry.path();

            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            match self.read_entry(&path) {
                Ok(history_entry) => entries.push(history_entry),
                Err(e) => {
                    tracing::warn!("Failed to read history entry {:?}: {}", path, e);
                }
            }
        }

        entries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));

        Ok(entries)
    }

    /// セッションを削除
    pub fn delete(&self, id: &str) -> Result<()> {
        let file_path = self.session_path(id);

        if !file_path.exists() {
            anyhow::bail!("Session '{}' not found", id);
        }

        std::fs::remove_file(&file_path).context("Failed to delete history file")?;

        Ok(())
    }

    /// セッションが存在するかチェック
    pub fn exists(&self, id: &str) -> bool {
        self.session_path(id).exists()
    }

    pub fn history_dir(&self) -> &PathBuf {
        &self.history_dir
    }

    // --- Private methods ---

    fn session_path(&self, id: &str) -> PathBuf {
        self.history_dir
            .join(format!("{}.json", Self::sanitize_filename(id)))
    }

    /// ファイル名として安全な文字列に変換
    fn sanitize_filename(name: &str) -> String {
        name.chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                _ => c,
            })
            .collect()
    }

    fn turn_to_persisted(turn: &Turn) -> PersistedTurn {
        let role = match turn.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };

        PersistedTurn {
            id: turn.id.clone(),
            role: role.to_string(),
            content: turn.content.clone(),
            created_at: turn.created_at.timestamp(),
            attachments: turn.attachments.clone(),
            is_tool_result: turn.is_tool_result,
            reasoning: turn.reasoning.clone(),
            prompt_content: turn.prompt_content.clone(),
        }
    }

    fn persisted_to_turn(persisted: &PersistedTurn) -> Turn {
        let role = match persisted.role.as_str() {
            "assistant" => Role::Assistant,
            _ => Role::User,
        };

        let created_at: DateTime<Utc> = Utc
            .timestamp_opt(persisted.created_at, 0)
            .single()
            .unwrap_or_else(Utc::now);

        Turn {
            id: persisted.id.clone(),
            role,
            content: persisted.content.clone(),
            created_at,
            attachments: persisted.attachments.clone(),
            is_tool_result: persisted.is_tool_result,
            reasoning: persisted.reasoning.clone(),
            prompt_content: persisted.prompt_content.clone(),
        }
    }

    fn read_entry(&self, path: &PathBuf) -> Result<HistoryEntry> {
        let json = std::fs::read_to_string(path).context("Failed to read history file")?;

        let persisted: PersistedSession =
            serde_json::from_str(&json).context("Failed to parse history file")?;

        Ok(HistoryEntry {
            id: persisted.id,
            name: persisted.name,
            saved_at: persisted.saved_at,
            turn_count: persisted.turns.len(),
            path: path.clone(),
        })
    }
}

impl HistoryStore for JsonHistoryStore {
    fn load_session(&self, id: &str) -> Result<Option<ChatSession>> {
        let file_path = self.session_path(id);

        if !file_path.exists() {
            return Ok(None);
        }

        let json = std::fs::read_to_string(&file_path).context("Failed to read history file")?;

        let persisted: PersistedSession =
            serde_json::from_str(&json).context("Failed to parse history file")?;

        let turns = persisted.turns.iter().map(Self::persisted_to_turn).collect();

        Ok(Some(ChatSession::restore(
            persisted.id,
            persisted.name,
            persisted.mode,
            ModelSelector::new(persisted.provider, persisted.model),
            turns,
        )))
    }

    fn save_session(&self, session: &ChatSession) -> Result<()> {
        let file_path = self.session_path(session.id());

        let persisted = PersistedSession {
            id: session.id().to_string(),
            name: session.name().to_string(),
            saved_at: Utc::now().timestamp(),
            mode: session.mode_slug().to_string(),
            provider: session.model().provider.clone(),
            model: session.model().model_id.clone(),
            turns: session.turns().iter().map(Self::turn_to_persisted).collect(),
        };

        let json =
            serde_json::to_string_pretty(&persisted).context("Failed to serialize session")?;

        std::fs::write(&file_path, json).context("Failed to write history file")?;

        tracing::debug!(session = session.id(), turns = session.len(), "Session persisted");

        Ok(())
    }
}
