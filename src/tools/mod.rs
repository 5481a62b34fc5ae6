//! ツールカタログとディスパッチ
//!
//! 組み込みツールは閉じたToolKind列挙で、文字列ベースの動的ルックアップを避ける。
//! ユーザー定義ツールは名前キーの二次テーブルで登録でき、組み込みに
//! 一致しなかった場合のみ参照される。

pub mod dispatcher;
pub mod registry;

use std::collections::HashMap;

use crate::modes::{Mode, ToolGroup};

/// ツール記述の生成に使うコンテキスト
///
/// コンパイルごとに再評価される。キャッシュはしない。
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// ファイル検索バックエンド（regex / match）
    pub search_method: String,
}

impl ToolContext {
    pub fn new(search_method: impl Into<String>) -> Self {
        Self {
            search_method: search_method.into(),
        }
    }
}

/// 組み込みツールの閉じた列挙
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    ReadFile,
    WriteToFile,
    ListFiles,
    SearchFiles,
    InsertContent,
    SearchAndReplace,
    AskFollowupQuestion,
    AttemptCompletion,
    SearchWeb,
    FetchUrlsContent,
}

impl ToolKind {
    pub const ALL: &'static [ToolKind] = &[
        ToolKind::ReadFile,
        ToolKind::WriteToFile,
        ToolKind::ListFiles,
        ToolKind::SearchFiles,
        ToolKind::InsertContent,
        ToolKind::SearchAndReplace,
        ToolKind::AskFollowupQuestion,
        ToolKind::AttemptCompletion,
        ToolKind::SearchWeb,
        ToolKind::FetchUrlsContent,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::ReadFile => "read_file",
            ToolKind::WriteToFile => "write_to_file",
            ToolKind::ListFiles => "list_files",
            ToolKind::SearchFiles => "search_files",
            ToolKind::InsertContent => "insert_content",
            ToolKind::SearchAndReplace => "search_and_replace",
            ToolKind::AskFollowupQuestion => "ask_followup_question",
            ToolKind::AttemptCompletion => "attempt_completion",
            ToolKind::SearchWeb => "search_web",
            ToolKind::FetchUrlsContent => "fetch_urls_content",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    /// 所属するツールグループ
    pub fn groups(&self) -> &'static [ToolGroup] {
        match self {
            ToolKind::ReadFile | ToolKind::ListFiles | ToolKind::SearchFiles => &[ToolGroup::Read],
            ToolKind::WriteToFile | ToolKind::InsertContent | ToolKind::SearchAndReplace => {
                &[ToolGroup::Edit]
            }
            ToolKind::SearchWeb | ToolKind::FetchUrlsContent => &[ToolGroup::Web],
            ToolKind::AskFollowupQuestion | ToolKind::AttemptCompletion => &[],
        }
    }

    /// モードのグループ許可に関わらず常にカタログへ載せるか
    pub fn always_available(&self) -> bool {
        matches!(
            self,
            ToolKind::AskFollowupQuestion | ToolKind::AttemptCompletion
        )
    }

    /// 実験ゲートのキー（対象外はNone）
    fn experiment_key(&self) -> Option<&'static str> {
        match self {
            ToolKind::InsertContent => Some("insert_content"),
            ToolKind::SearchAndReplace => Some("search_and_replace"),
            _ => None,
        }
    }

    /// モードと実験フラグに対する適用可否
    pub fn applies_to(&self, _mode: &Mode, experiments: &HashMap<String, bool>) -> bool {
        match self.experiment_key() {
            Some(key) => experiments.get(key).copied().unwrap_or(true),
            None => true,
        }
    }

    /// プロンプトカタログ向けの記述を生成
    ///
    /// Noneはこのビルド構成で無効なツールを意味し、カタログからも
    /// ディスパッチ表からも除外される。
    pub fn describe(&self, ctx: &ToolContext) -> Option<String> {
        match self {
            ToolKind::ReadFile => Some(
                "## read_file\n\
                 Description: Request to read the contents of a note in the vault. \
                 The content is returned with line numbers so later edits can refer to exact lines.\n\
                 Parameters:\n\
                 - path: (optional) Vault-relative path of the note. Defaults to the currently active note.\n\
                 Usage:\n\
                 ```json\n\
                 {\"tool\": \"read_file\", \"params\": {\"path\": \"notes/example.md\"}}\n\
                 ```"
                    .to_string(),
            ),
            ToolKind::WriteToFile => Some(
                "## write_to_file\n\
                 Description: Request to write full content to a note. Creates the note if it \
                 does not exist and overwrites it completely if it does. Use for new notes or \
                 large-scale rewrites.\n\
                 Parameters:\n\
                 - path: (optional) Vault-relative path of the note. Defaults to the currently active note.\n\
                 - content: (required) The complete new content of the note.\n\
                 Usage:\n\
                 ```json\n\
                 {\"tool\": \"write_to_file\", \"params\": {\"path\": \"notes/example.md\", \"content\": \"...\"}}\n\
                 ```"
                    .to_string(),
            ),
            ToolKind::ListFiles => Some(
                "## list_files\n\
                 Description: Request to list notes and folders inside a vault folder.\n\
                 Parameters:\n\
                 - path: (optional) Vault-relative folder path. Defaults to the vault root.\n\
                 - recursive: (optional) true to list the whole subtree.\n\
                 Usage:\n\
                 ```json\n\
                 {\"tool\": \"list_files\", \"params\": {\"path\": \"notes\", \"recursive\": true}}\n\
                 ```"
                    .to_string(),
            ),
            ToolKind::SearchFiles => {
                let method_line = if ctx.search_method == "match" {
                    "Performs keyword/phrase based search across the vault."
                } else {
                    "Performs regular-expression based search across the vault."
                };
                Some(format!(
                    "## search_files\n\
                     Description: {}\n\
                     Parameters:\n\
                     - query: (required) The search query.\n\
                     - path: (optional) Folder to restrict the search to.\n\
                     Usage:\n\
                     ```json\n\
                     {{\"tool\": \"search_files\", \"params\": {{\"query\": \"meeting notes\"}}}}\n\
                     ```",
                    method_line
                ))
            }
            ToolKind::InsertContent => Some(
                "## insert_content\n\
                 Description: Request to add lines to an existing note without rewriting it. \
                 Appends at the end when no line is given.\n\
                 Parameters:\n\
                 - path: (optional) Vault-relative path of the note. Defaults to the currently active note.\n\
                 - content: (required) The lines to insert.\n\
                 - line: (optional) 1-based line number to insert before.\n\
                 Usage:\n\
                 ```json\n\
                 {\"tool\": \"insert_content\", \"params\": {\"path\": \"notes/example.md\", \"content\": \"new line\", \"line\": 3}}\n\
                 ```"
                    .to_string(),
            ),
            ToolKind::SearchAndReplace => Some(
                "## search_and_replace\n\
                 Description: Request to replace every occurrence of a literal text in a note. \
                 The most precise tool for small, scattered, repetitive changes.\n\
                 Parameters:\n\
                 - path: (optional) Vault-relative path of the note. Defaults to the currently active note.\n\
                 - search: (required) The literal text to find.\n\
                 - replace: (required) The replacement text.\n\
                 Usage:\n\
                 ```json\n\
                 {\"tool\": \"search_and_replace\", \"params\": {\"path\": \"notes/example.md\", \"search\": \"teh\", \"replace\": \"the\"}}\n\
                 ```"
                    .to_string(),
            ),
            ToolKind::AskFollowupQuestion => Some(
                "## ask_followup_question\n\
                 Description: Ask the user a question to gather additional information needed \
                 to complete the task. Use sparingly.\n\
                 Parameters:\n\
                 - question: (required) The question to ask the user.\n\
                 Usage:\n\
                 ```json\n\
                 {\"tool\": \"ask_followup_question\", \"params\": {\"question\": \"Which note should I update?\"}}\n\
                 ```"
                    .to_string(),
            ),
            ToolKind::AttemptCompletion => Some(
                "## attempt_completion\n\
                 Description: Present the final result of the task to the user once all previous \
                 tool uses have been confirmed successful. The result must be final and must not \
                 end with a question.\n\
                 Parameters:\n\
                 - result: (required) The final result of the task.\n\
                 Usage:\n\
                 ```json\n\
                 {\"tool\": \"attempt_completion\", \"params\": {\"result\": \"The note has been reorganized.\"}}\n\
                 ```"
                    .to_string(),
            ),
            // Webツールはこのビルド構成では無効
            ToolKind::SearchWeb | ToolKind::FetchUrlsContent => None,
        }
    }
}

/// ユーザー定義ツールの記述子（二次テーブル）
///
/// 記述生成器と適用可否の述語を持ち、組み込み列挙に一致しない名前に対してのみ
/// 参照される。
pub struct UserToolDescriptor {
    pub name: String,
    pub groups: Vec<ToolGroup>,
    pub always_available: bool,
    pub applies_to: Box<dyn Fn(&Mode, &HashMap<String, bool>) -> bool + Send + Sync>,
    pub describe: Box<dyn Fn(&ToolContext) -> Option<String> + Send + Sync>,
}

impl UserToolDescriptor {
    /// 固定の記述を持つ常時適用のツールを作る
    pub fn simple(
        name: impl Into<String>,
        groups: Vec<ToolGroup>,
        description: impl Into<String>,
    ) -> Self {
        let description = description.into();
        Self {
            name: name.into(),
            groups,
            always_available: false,
            applies_to: Box::new(|_, _| true),
            describe: Box::new(move |_| Some(description.clone())),
        }
    }
}

pub use dispatcher::{is_terminal_directive, DispatchPolicy, ToolDispatcher};
pub use registry::{ToolDescription, ToolRegistry};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::built_in_modes;

    #[test]
    fn test_name_round_trip() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(*kind));
        }
        assert_eq!(ToolKind::from_name("no_such_tool"), None);
    }

    #[test]
    fn test_disabled_tools_have_no_description() {
        let ctx = ToolContext::new("regex");
        assert!(ToolKind::SearchWeb.describe(&ctx).is_none());
        assert!(ToolKind::FetchUrlsContent.describe(&ctx).is_none());
        assert!(ToolKind::ReadFile.describe(&ctx).is_some());
    }

    #[test]
    fn test_search_description_follows_backend() {
        let regex = ToolKind::SearchFiles
            .describe(&ToolContext::new("regex"))
            .unwrap();
        assert!(regex.contains("regular-expression"));

        let keyword = ToolKind::SearchFiles
            .describe(&ToolContext::new("match"))
            .unwrap();
        assert!(keyword.contains("keyword"));
    }

    #[test]
    fn test_experiment_gating() {
        let modes = built_in_modes();
        let write = modes.iter().find(|m| m.slug == "write").unwrap();

        let mut experiments = HashMap::new();
        assert!(ToolKind::InsertContent.applies_to(write, &experiments));

        experiments.insert("insert_content".to_string(), false);
        assert!(!ToolKind::InsertContent.applies_to(write, &experiments));
        // 他のツールには影響しない
        assert!(ToolKind::SearchAndReplace.applies_to(write, &experiments));
        assert!(ToolKind::ReadFile.applies_to(write, &experiments));
    }
}
