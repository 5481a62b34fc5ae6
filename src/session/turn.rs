//! 会話ターンと添付リソース参照

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 会話のロール
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// ホストリソースへの型付き参照
///
/// 解決済みテキストではなく、コンパイル時に解決できるだけの識別情報を持つ。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mentionable {
    File {
        path: String,
    },
    Folder {
        path: String,
    },
    Block {
        path: String,
        start_line: usize,
        end_line: usize,
    },
    CurrentResource,
    Url {
        url: String,
    },
    Corpus,
}

impl Mentionable {
    /// 集合セマンティクスのための派生キー（パス＋種別＋範囲）
    pub fn key(&self) -> String {
        match self {
            Mentionable::File { path } => format!("file:{}", path),
            Mentionable::Folder { path } => format!("folder:{}", path),
            Mentionable::Block {
                path,
                start_line,
                end_line,
            } => format!("block:{}#L{}-{}", path, start_line, end_line),
            Mentionable::CurrentResource => "current-resource".to_string(),
            Mentionable::Url { url } => format!("url:{}", url),
            Mentionable::Corpus => "corpus".to_string(),
        }
    }
}

/// 会話ターン
///
/// 追加後は不変。ただしストリーミング中の最新アシスタントターンだけは
/// contentが単調に伸びる形でその場で更新される。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// 添付リソース参照（ユーザーターンのみ）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Mentionable>,
    /// ツール結果の折り込みターンか（ウィンドウ処理で除外される）
    #[serde(default)]
    pub is_tool_result: bool,
    /// reasoningチャンネルの蓄積（アシスタントターンのみ）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// コンパイル済みプロンプト内容（ユーザーターンのみ）
    ///
    /// 添付の解決は提出ごとに一度きり。同一ターンの再試行では再解決しない。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_content: Option<String>,
}

impl Turn {
    pub fn user(content: impl Into<String>, attachments: Vec<Mentionable>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
            attachments,
            is_tool_result: false,
            reasoning: None,
            prompt_content: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.into(),
            created_at: Utc::now(),
            attachments: Vec::new(),
            is_tool_result: false,
            reasoning: None,
            prompt_content: None,
        }
    }

    /// ツール実行結果を折り込むターン
    ///
    /// 次の交換でモデルに見える必要があるため、ユーザーチャンネル側に積む。
    /// アシスタント側のis_tool_resultは表示用エコーで、ウィンドウから除外される。
    pub fn tool_result(tool_name: &str, content: &str) -> Self {
        let mut turn = Self::user(format!("[{}]\n{}", tool_name, content), Vec::new());
        turn.is_tool_result = true;
        turn
    }
}
