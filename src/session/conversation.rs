//! 会話セッション
//!
//! 順序付きターンログと、提出待ちの添付・アクティブモード・モデル選択という
//! 可変セッション状態を保持する。ターンログはセッションが排他的に所有する。

use uuid::Uuid;

use super::turn::{Mentionable, Role, Turn};
use crate::llm::ModelSelector;

/// 会話セッション
#[derive(Debug, Clone)]
pub struct ChatSession {
    /// セッションID（履歴ストアのキー）
    id: String,
    /// 表示名
    name: String,
    /// ターンログ（追記のみ、提出時刻順）
    turns: Vec<Turn>,
    /// 提出待ちの添付（派生キーによる集合、挿入順保持）
    pending: Vec<Mentionable>,
    /// アクティブモードのスラッグ
    mode_slug: String,
    /// アクティブなモデル/プロバイダ選択
    model: ModelSelector,
}

impl ChatSession {
    pub fn new(name: impl Into<String>, mode_slug: impl Into<String>, model: ModelSelector) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            turns: Vec::new(),
            pending: Vec::new(),
            mode_slug: mode_slug.into(),
            model,
        }
    }

    /// 既存IDを引き継いでセッションを復元（履歴ストア用）
    pub fn restore(
        id: impl Into<String>,
        name: impl Into<String>,
        mode_slug: impl Into<String>,
        model: ModelSelector,
        turns: Vec<Turn>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            turns,
            pending: Vec::new(),
            mode_slug: mode_slug.into(),
            model,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// ターンを追加
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// ログ中のユーザー発話数（ツール結果の折り込みは数えない）
    pub fn user_turn_count(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| t.role == Role::User && !t.is_tool_result)
            .count()
    }

    /// ストリーミング対象（末尾のアシスタントターン）にコンテンツ差分を連結
    pub fn append_to_streaming_turn(&mut self, delta: &str) {
        if let Some(turn) = self.turns.last_mut() {
            if turn.role == Role::Assistant {
                turn.content.push_str(delta);
            }
        }
    }

    /// ストリーミング対象のreasoningバッファに差分を連結
    pub fn append_reasoning_to_streaming_turn(&mut self, delta: &str) {
        if let Some(turn) = self.turns.last_mut() {
            if turn.role == Role::Assistant {
                turn.reasoning.get_or_insert_with(String::new).push_str(delta);
            }
        }
    }

    /// 末尾のユーザーターンにコンパイル済みプロンプトを記録
    pub fn set_prompt_content_on_last_user(&mut self, prompt_content: String) {
        if let Some(turn) = self.turns.last_mut() {
            if turn.role == Role::User {
                turn.prompt_content = Some(prompt_content);
            }
        }
    }

    /// 添付を追加（同一キーは無視、挿入順保持）
    pub fn add_mentionable(&mut self, mentionable: Mentionable) {
        let key = mentionable.key();
        if !self.pending.iter().any(|m| m.key() == key) {
            self.pending.push(mentionable);
        }
    }

    pub fn pending_mentionables(&self) -> &[Mentionable] {
        &self.pending
    }

    /// 提出時に添付を取り出してクリア
    pub fn take_mentionables(&mut self) -> Vec<Mentionable> {
        std::mem::take(&mut self.pending)
    }

    pub fn mode_slug(&self) -> &str {
        &self.mode_slug
    }

    pub fn set_mode(&mut self, slug: impl Into<String>) {
        self.mode_slug = slug.into();
    }

    pub fn model(&self) -> &ModelSelector {
        &self.model
    }

    pub fn set_model(&mut self, model: ModelSelector) {
        self.model = model;
    }
}
