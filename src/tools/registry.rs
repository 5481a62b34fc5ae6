//! ツールレジストリとカタログフィルタ
//!
//! カタログ生成は純粋関数で、同じ（モード・実験フラグ・コンテキスト）からは
//! 内容も順序も同一の結果を返す。コンパイルごとに再実行され、キャッシュしない。

use std::collections::HashMap;

use super::{ToolContext, ToolKind, UserToolDescriptor};
use crate::modes::Mode;

/// カタログに載るツール記述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDescription {
    pub name: String,
    pub text: String,
}

/// ツールレジストリ
///
/// 組み込みのToolKind列挙に加えて、ユーザー定義ツールを名前キーで登録できる。
/// 組み込みと同名のユーザー定義は無視される（組み込みが優先）。
pub struct ToolRegistry {
    user: Vec<UserToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { user: Vec::new() }
    }

    /// ユーザー定義ツールを登録
    pub fn register(&mut self, descriptor: UserToolDescriptor) {
        if ToolKind::from_name(&descriptor.name).is_some() {
            tracing::warn!(
                tool = descriptor.name.as_str(),
                "Ignoring user tool that shadows a built-in"
            );
            return;
        }
        self.user.push(descriptor);
    }

    /// アクティブモードに対するツールカタログを生成
    ///
    /// 順序はグループ巡回中に最初に現れた名前の挿入順。グループをまたぐ重複は
    /// 1件に畳む。常時利用可能ツールはグループ由来の後に並ぶ。
    pub fn catalogue_for(
        &self,
        mode: &Mode,
        experiments: &HashMap<String, bool>,
        ctx: &ToolContext,
    ) -> Vec<ToolDescription> {
        // グループ巡回で順序付きの名前集合を作る
        let mut names: Vec<String> = Vec::new();

        for group in &mode.groups {
            for kind in ToolKind::ALL {
                if kind.groups().contains(group) {
                    add_name(&mut names, kind.name());
                }
            }
            for descriptor in &self.user {
                if descriptor.groups.contains(group) {
                    add_name(&mut names, &descriptor.name);
                }
            }
        }

        for kind in ToolKind::ALL {
            if kind.always_available() {
                add_name(&mut names, kind.name());
            }
        }
        for descriptor in &self.user {
            if descriptor.always_available {
                add_name(&mut names, &descriptor.name);
            }
        }

        // 適用可否と記述で絞る（組み込みが優先、無ければ二次テーブル）
        let mut out = Vec::new();
        for name in names {
            let text = match ToolKind::from_name(&name) {
                Some(kind) => {
                    if !kind.applies_to(mode, experiments) {
                        continue;
                    }
                    kind.describe(ctx)
                }
                None => {
                    let Some(descriptor) = self.user.iter().find(|d| d.name == name) else {
                        continue;
                    };
                    if !(descriptor.applies_to)(mode, experiments) {
                        continue;
                    }
                    (descriptor.describe)(ctx)
                }
            };

            if let Some(text) = text {
                if !text.trim().is_empty() {
                    out.push(ToolDescription { name, text });
                }
            }
        }

        out
    }

    /// カタログを1つのプロンプトセクションに整形
    pub fn catalogue_section(
        &self,
        mode: &Mode,
        experiments: &HashMap<String, bool>,
        ctx: &ToolContext,
    ) -> String {
        let descriptions = self.catalogue_for(mode, experiments, ctx);
        if descriptions.is_empty() {
            return String::new();
        }

        let joined: Vec<&str> = descriptions.iter().map(|d| d.text.as_str()).collect();
        format!("# Tools\n\n{}", joined.join("\n\n"))
    }
}

fn add_name(names: &mut Vec<String>, name: &str) {
    if !names.iter().any(|n| n == name) {
        names.push(name.to_string());
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::{built_in_modes, ToolGroup};

    fn mode(slug: &str) -> Mode {
        built_in_modes()
            .into_iter()
            .find(|m| m.slug == slug)
            .unwrap()
    }

    #[test]
    fn test_ask_mode_excludes_edit_tools() {
        let registry = ToolRegistry::new();
        let catalogue =
            registry.catalogue_for(&mode("ask"), &HashMap::new(), &ToolContext::new("regex"));

        let names: Vec<&str> = catalogue.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"read_file"));
        assert!(names.contains(&"ask_followup_question"));
        assert!(names.contains(&"attempt_completion"));
        assert!(!names.contains(&"write_to_file"));
    }

    #[test]
    fn test_write_mode_includes_edit_tools() {
        let registry = ToolRegistry::new();
        let catalogue =
            registry.catalogue_for(&mode("write"), &HashMap::new(), &ToolContext::new("regex"));

        let names: Vec<&str> = catalogue.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"write_to_file"));
        assert!(names.contains(&"insert_content"));
        assert!(names.contains(&"search_and_replace"));
        // 読み取り系がグループ順で先に並ぶ
        assert_eq!(names[0], "read_file");
    }

    #[test]
    fn test_disabled_web_tools_excluded() {
        let registry = ToolRegistry::new();
        let catalogue = registry.catalogue_for(
            &mode("research"),
            &HashMap::new(),
            &ToolContext::new("regex"),
        );

        let names: Vec<&str> = catalogue.iter().map(|d| d.name.as_str()).collect();
        // Webグループは許可されているが、記述がNoneなので除外される
        assert!(!names.contains(&"search_web"));
        assert!(!names.contains(&"fetch_urls_content"));
    }

    #[test]
    fn test_catalogue_deterministic() {
        let registry = ToolRegistry::new();
        let experiments = HashMap::new();
        let ctx = ToolContext::new("regex");
        let m = mode("write");

        let first = registry.catalogue_for(&m, &experiments, &ctx);
        let second = registry.catalogue_for(&m, &experiments, &ctx);

        assert_eq!(first, second);
    }

    #[test]
    fn test_experiment_flag_removes_tool() {
        let registry = ToolRegistry::new();
        let mut experiments = HashMap::new();
        experiments.insert("search_and_replace".to_string(), false);

        let catalogue =
            registry.catalogue_for(&mode("write"), &experiments, &ToolContext::new("regex"));
        let names: Vec<&str> = catalogue.iter().map(|d| d.name.as_str()).collect();
        assert!(!names.contains(&"search_and_replace"));
        assert!(names.contains(&"insert_content"));
    }

    #[test]
    fn test_user_tool_registration() {
        let mut registry = ToolRegistry::new();
        registry.register(UserToolDescriptor::simple(
            "daily_note",
            vec![ToolGroup::Read],
            "## daily_note\nDescription: Open today's daily note.",
        ));
        // 組み込みと同名のユーザー定義は無視される
        registry.register(UserToolDescriptor::simple(
            "read_file",
            vec![ToolGroup::Read],
            "shadowed",
        ));

        let catalogue =
            registry.catalogue_for(&mode("ask"), &HashMap::new(), &ToolContext::new("regex"));

        let names: Vec<&str> = catalogue.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"daily_note"));
        assert_eq!(names.iter().filter(|n| **n == "read_file").count(), 1);
        // 組み込み記述が使われている
        let read = catalogue.iter().find(|d| d.name == "read_file").unwrap();
        assert!(read.text.contains("Request to read"));
    }

    #[test]
    fn test_catalogue_section_format() {
        let registry = ToolRegistry::new();
        let section =
            registry.catalogue_section(&mode("ask"), &HashMap::new(), &ToolContext::new("regex"));
        assert!(section.starts_with("# Tools\n\n"));
        assert!(section.contains("## read_file"));
    }
}
