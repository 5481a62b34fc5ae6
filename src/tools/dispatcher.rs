//! ツールディスパッチャ
//!
//! モデルが発行した指示をホスト操作へ対応付ける。カタログフィルタは
//! プロンプトコンパイル時に一度だけ適用済みという前提（Trustポリシー）で、
//! Strictポリシーのときだけディスパッチ時にカタログ所属を再検査する。

use super::registry::ToolDescription;
use crate::error::ToolError;
use crate::llm::Directive;
use crate::vault::HostActions;

/// ディスパッチ時のカタログ再検査ポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    /// カタログフィルタの結果を信頼し、再検査しない
    #[default]
    Trust,
    /// カタログに無い指示を拒否する
    Strict,
}

impl DispatchPolicy {
    /// 設定文字列からポリシーを得る（未知の値はTrust）
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "strict" => DispatchPolicy::Strict,
            _ => DispatchPolicy::Trust,
        }
    }
}

/// ターンを終了・転換する終端指示か（ホスト状態には触れない）
pub fn is_terminal_directive(name: &str) -> bool {
    matches!(name, "ask_followup_question" | "attempt_completion")
}

/// ツールディスパッチャ
pub struct ToolDispatcher {
    policy: DispatchPolicy,
}

impl ToolDispatcher {
    pub fn new(policy: DispatchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// 指示を1件実行し、会話に畳み込むテキスト結果を返す
    ///
    /// 実行保証は「指示の出現1回につき最大1回」のみ。重複排除はしない。
    pub async fn dispatch(
        &self,
        directive: &Directive,
        host: &dyn HostActions,
        active_resource: Option<&str>,
        catalogue: &[ToolDescription],
    ) -> Result<String, ToolError> {
        if self.policy == DispatchPolicy::Strict
            && !catalogue.iter().any(|d| d.name == directive.name)
        {
            return Err(ToolError::NotInCatalogue(directive.name.clone()));
        }

        tracing::debug!(tool = directive.name.as_str(), "Dispatching directive");

        match directive.name.as_str() {
            "write_to_file" => {
                let target = Self::target(directive, active_resource)?;
                let content = directive.arg_str("content").unwrap_or("");
                host.write_full(&target, content)
                    .await
                    .map_err(|e| ToolError::Host(e.to_string()))?;
                Ok(format!("Wrote to {}", target))
            }
            "read_file" => {
                let target = Self::target(directive, active_resource)?;
                let content = host
                    .read_full(&target)
                    .await
                    .map_err(|e| ToolError::Host(e.to_string()))?;
                Ok(content)
            }
            "list_files" => {
                // 一覧の既定対象はボルトルート（アクティブリソースではない）
                let path = directive.arg_str("path").unwrap_or("");
                let recursive = directive
                    .arg_bool("recursive")
                    .or_else(|| directive.arg_str("recursive").map(|s| s == "true"))
                    .unwrap_or(false);
                let entries = host
                    .list_tree(path, recursive)
                    .await
                    .map_err(|e| ToolError::Host(e.to_string()))?;
                if entries.is_empty() {
                    Ok("(empty folder)".to_string())
                } else {
                    Ok(entries.join("\n"))
                }
            }
            "insert_content" => {
                let target = Self::target(directive, active_resource)?;
                let content = directive
                    .arg_str("content")
                    .ok_or(ToolError::MissingArgument("content"))?;
                let position = directive.arg_usize("line");
                host.append_or_insert(&target, content, position)
                    .await
                    .map_err(|e| ToolError::Host(e.to_string()))?;
                Ok(format!("Inserted content into {}", target))
            }
            "search_and_replace" => {
                let target = Self::target(directive, active_resource)?;
                let search = directive
                    .arg_str("search")
                    .ok_or(ToolError::MissingArgument("search"))?;
                let replace = directive.arg_str("replace").unwrap_or("");
                let count = host
                    .search_and_replace(&target, search, replace)
                    .await
                    .map_err(|e| ToolError::Host(e.to_string()))?;
                if count == 0 {
                    Ok(format!("No occurrences of the search text in {}", target))
                } else {
                    Ok(format!("Replaced {} occurrence(s) in {}", count, target))
                }
            }
            "ask_followup_question" => Ok(directive
                .arg_str("question")
                .unwrap_or("Asking a followup question.")
                .to_string()),
            "attempt_completion" => Ok(directive
                .arg_str("result")
                .unwrap_or("Completed.")
                .to_string()),
            // 未知の指示は例外にせず会話として続行できる結果文字列に解決する
            other => Ok(format!(
                "Tool {} is not supported in this configuration.",
                other
            )),
        }
    }

    /// 対象リソースの解決: 明示path引数、無ければアクティブリソース
    fn target(directive: &Directive, active_resource: Option<&str>) -> Result<String, ToolError> {
        directive
            .arg_str("path")
            .map(str::to_string)
            .or_else(|| active_resource.map(str::to_string))
            .ok_or(ToolError::NoTargetResource)
    }
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self::new(DispatchPolicy::Trust)
    }
}
