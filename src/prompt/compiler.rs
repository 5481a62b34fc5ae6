//! プロンプトコンパイラ
//!
//! モード設定・添付コンテキスト・会話履歴から、決定的なシステム＋ユーザー
//! メッセージ列を組み立てる。副作用はリゾルバ呼び出しだけで、再実行は安全。

use std::path::Path;

use super::sections;
use crate::config::Settings;
use crate::error::{CompileError, ResolveError};
use crate::llm::RequestMessage;
use crate::modes::ModeRegistry;
use crate::session::progress::{ProgressTracker, QueryProgress};
use crate::session::turn::{Mentionable, Role};
use crate::session::ChatSession;
use crate::tools::{ToolContext, ToolRegistry};
use crate::vault::{ChildEntry, ResourceResolver};

/// トランスポートへ送る履歴ウィンドウの長さ
pub const MESSAGE_WINDOW: usize = 19;

/// コンパイル結果
#[derive(Debug, Clone)]
pub struct CompiledPrompt {
    pub system_message: String,
    pub request_messages: Vec<RequestMessage>,
    /// 今回のユーザーターンの解決済み本文
    pub resolved_user_content: String,
}

/// 行番号を付けて整形（右寄せ、`NN | line`）
pub fn add_line_numbers(content: &str, start_line: usize) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let width = (start_line + lines.len().saturating_sub(1)).to_string().len();

    lines
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:>width$} | {}", start_line + i, line, width = width))
        .collect::<Vec<String>>()
        .join("\n")
}

/// 空でない内容だけを `\n\n# タイトル\n内容` の形に整形
fn format_section(title: &str, content: &str) -> String {
    if content.trim().is_empty() {
        return String::new();
    }
    format!("\n\n# {}\n{}", title, content.trim())
}

/// フォルダ直下のエントリをツリー表示に整形
fn render_children(entries: &[ChildEntry]) -> String {
    let mut out = String::new();
    for (index, entry) in entries.iter().enumerate() {
        let prefix = if index == entries.len() - 1 {
            "└── "
        } else {
            "├── "
        };
        let suffix = if entry.is_container { "/" } else { "" };
        out.push_str(&format!("{}{}{}\n", prefix, entry.name, suffix));
    }
    out
}

/// 解決失敗を劣化プレースホルダに変換
fn degraded(path: &str, error: &ResolveError) -> String {
    format!("(Error reading path \"{}\": {})", path, error)
}

/// プロンプトコンパイラ
pub struct PromptCompiler;

impl PromptCompiler {
    /// 会話セッションからリクエストメッセージ列をコンパイル
    ///
    /// 失敗するのはターンログが空か、最後のターンがユーザー発話でない場合のみ。
    /// 個々の添付の解決失敗はプレースホルダに劣化し、コンパイルは成功する。
    pub async fn compile(
        session: &mut ChatSession,
        modes: &ModeRegistry,
        tools: &ToolRegistry,
        resolver: &dyn ResourceResolver,
        settings: &Settings,
        active_resource: Option<&str>,
        progress: &mut ProgressTracker,
    ) -> Result<CompiledPrompt, CompileError> {
        let Some(last) = session.last() else {
            return Err(CompileError::EmptyConversation);
        };
        if last.role != Role::User {
            return Err(CompileError::LastTurnNotUser);
        }

        let is_new_chat = session.user_turn_count() == 1;

        // 添付の解決は提出ごとに一度きり。解決済みなら再利用する。
        if last.prompt_content.is_none() {
            let resolved = Self::compile_user_content(
                last.content.clone(),
                last.attachments.clone(),
                is_new_chat,
                resolver,
                session.mode_slug(),
                active_resource,
                progress,
            )
            .await;
            session.set_prompt_content_on_last_user(resolved);
        }

        let resolved_user_content = session
            .last()
            .and_then(|t| t.prompt_content.clone())
            .unwrap_or_default();

        let system_message =
            Self::build_system_message(session.mode_slug(), modes, tools, settings).await;

        // ツール結果エコーを除外した解決済みメッセージ列に対して
        // 直近MESSAGE_WINDOW件のスライディングウィンドウを適用する
        let mut resolved: Vec<RequestMessage> = session
            .turns()
            .iter()
            .filter(|t| !(t.role == Role::Assistant && t.is_tool_result))
            .map(|t| match t.role {
                Role::User => RequestMessage::user(
                    t.prompt_content
                        .clone()
                        .unwrap_or_else(|| t.content.clone()),
                ),
                Role::Assistant => RequestMessage::assistant(t.content.clone()),
            })
            .collect();

        let start = resolved.len().saturating_sub(MESSAGE_WINDOW);
        let window = resolved.split_off(start);

        let mut request_messages = Vec::with_capacity(window.len() + 1);
        request_messages.push(RequestMessage::system(system_message.clone()));
        request_messages.extend(window);

        Ok(CompiledPrompt {
            system_message,
            request_messages,
            resolved_user_content,
        })
    }

    /// 今回のユーザーターンの本文を解決
    ///
    /// 添付ブロック → 環境スナップショット → task/feedbackラッパの順。
    async fn compile_user_content(
        query: String,
        attachments: Vec<Mentionable>,
        is_new_chat: bool,
        resolver: &dyn ResourceResolver,
        mode_slug: &str,
        active_resource: Option<&str>,
        progress: &mut ProgressTracker,
    ) -> String {
        let mut attached_context = String::new();

        // 解決順序: ファイル、フォルダ、範囲ブロック、アクティブリソース
        let ordered: Vec<&Mentionable> = attachments
            .iter()
            .filter(|m| matches!(m, Mentionable::File { .. }))
            .chain(
                attachments
                    .iter()
                    .filter(|m| matches!(m, Mentionable::Folder { .. })),
            )
            .chain(
                attachments
                    .iter()
                    .filter(|m| matches!(m, Mentionable::Block { .. })),
            )
            .chain(attachments.iter().filter(|m| {
                !matches!(
                    m,
                    Mentionable::File { .. } | Mentionable::Folder { .. } | Mentionable::Block { .. }
                )
            }))
            .collect();

        let total = ordered.len();
        if total > 0 {
            progress.advance(QueryProgress::ReadingAttachments {
                completed: 0,
                total,
            });
        }

        for (index, mention) in ordered.iter().enumerate() {
            let block = Self::mention_block(mention, resolver, active_resource).await;
            attached_context.push_str(&block);
            attached_context.push('\n');

            progress.advance(QueryProgress::ReadingAttachments {
                completed: index + 1,
                total,
            });
        }

        let env_details = Self::environment_details(active_resource, mode_slug);

        let wrapper = if is_new_chat {
            format!("<task>{}</task>", query)
        } else {
            format!("<feedback>{}</feedback>", query)
        };

        let parts: Vec<&str> = [attached_context.trim_end(), env_details.as_str(), &wrapper]
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect();

        parts.join("\n\n")
    }

    /// 添付1件を区切り付きコンテキストブロックに解決
    async fn mention_block(
        mention: &Mentionable,
        resolver: &dyn ResourceResolver,
        active_resource: Option<&str>,
    ) -> String {
        match mention {
            Mentionable::File { path } => {
                let content = match resolver.resolve(path).await {
                    Ok(text) => add_line_numbers(&text, 1),
                    Err(e) => degraded(path, &e),
                };
                format!(
                    "<user_mention_file path=\"{}\">\n{}\n</user_mention_file>",
                    path, content
                )
            }
            Mentionable::Folder { path } => {
                let content = match resolver.list_children(path).await {
                    Ok(children) => render_children(&children).trim_end().to_string(),
                    Err(e) => degraded(path, &e),
                };
                format!(
                    "<user_mention_folder path=\"{}\">\n{}\n</user_mention_folder>",
                    path, content
                )
            }
            Mentionable::Block {
                path,
                start_line,
                end_line,
            } => {
                let content = match resolver.resolve(path).await {
                    Ok(text) => {
                        let lines: Vec<&str> = text.split('\n').collect();
                        let start = start_line.saturating_sub(1).min(lines.len());
                        let end = (*end_line).min(lines.len());
                        let slice = lines[start..end].join("\n");
                        add_line_numbers(&slice, *start_line)
                    }
                    Err(e) => degraded(path, &e),
                };
                format!(
                    "<user_mention_blocks location=\"{}#L{}-{}\">\n{}\n</user_mention_blocks>",
                    path, start_line, end_line, content
                )
            }
            Mentionable::CurrentResource => match active_resource {
                Some(path) => {
                    let content = match resolver.resolve(path).await {
                        Ok(text) => add_line_numbers(&text, 1),
                        Err(e) => degraded(path, &e),
                    };
                    format!(
                        "<current_tab_note path=\"{}\">\n{}\n</current_tab_note>",
                        path, content
                    )
                }
                None => "<current_tab_note path=\"\">\n(No current file active)\n</current_tab_note>"
                    .to_string(),
            },
            Mentionable::Url { url } => format!(
                "<user_mention_url url=\"{}\">\n(URL fetching is not supported in this configuration)\n</user_mention_url>",
                url
            ),
            Mentionable::Corpus => {
                "<user_mention_vault>\n(Vault-wide context is not supported in this configuration)\n</user_mention_vault>"
                    .to_string()
            }
        }
    }

    /// 環境スナップショット
    fn environment_details(active_resource: Option<&str>, mode_slug: &str) -> String {
        let current_file = format_section(
            "Current File",
            active_resource.unwrap_or("(No current file active)"),
        );

        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let state = format!(
            "## Current Time\n{}\n\n## Current Mode\n{}",
            now, mode_slug
        );

        format!(
            "<environment_details>{}{}\n</environment_details>",
            current_file,
            format_section("Assistant & User State", &state)
        )
    }

    /// システムメッセージを構築
    async fn build_system_message(
        mode_slug: &str,
        modes: &ModeRegistry,
        tools: &ToolRegistry,
        settings: &Settings,
    ) -> String {
        let mode = modes.resolve_or_default(mode_slug);

        // モード別の上書きファイルがあれば、生成セクションの代わりに使う
        if let Some(dir) = &settings.assistant.prompt_dir {
            let override_path = Path::new(dir).join(&mode.slug).join("system_prompt.md");
            if let Ok(content) = tokio::fs::read_to_string(&override_path).await {
                if !content.trim().is_empty() {
                    tracing::info!(mode = mode.slug.as_str(), "Using system prompt override file");
                    let custom = sections::custom_instructions_section(
                        &settings.assistant.custom_instructions,
                        mode,
                        settings.assistant.preferred_language.as_deref(),
                    );
                    return [mode.role_definition.as_str(), content.trim(), custom.as_str()]
                        .into_iter()
                        .filter(|s| !s.trim().is_empty())
                        .collect::<Vec<&str>>()
                        .join("\n\n");
                }
            }
        }

        let ctx = ToolContext::new(settings.assistant.search_method.clone());

        let section_list = vec![
            mode.role_definition.clone(),
            sections::tool_use_section(),
            tools.catalogue_section(mode, &settings.experiments, &ctx),
            sections::tool_use_guidelines_section(),
            sections::extension_servers_section(),
            sections::capabilities_section(mode, &settings.assistant.search_method),
            sections::modes_section(modes),
            sections::rules_section(mode, &settings.assistant.search_method),
            sections::objective_section(mode),
            sections::custom_instructions_section(
                &settings.assistant.custom_instructions,
                mode,
                settings.assistant.preferred_language.as_deref(),
            ),
        ];

        // 空セクションは区切りを残さず省略する
        section_list
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<String>>()
            .join("\n\n")
    }
}
