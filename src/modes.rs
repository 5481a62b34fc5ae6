//! モード定義とレジストリ
//!
//! 組み込みモード（ask / write / learn / research）は不変のカタログ。
//! ユーザー定義モードは追加登録でき、同一スラッグは後勝ちで組み込みを覆い隠す。

use std::fmt;

/// ツールグループ - モードはツール個別ではなくグループ単位で許可する
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolGroup {
    /// 読み取り系（read_file / list_files / search_files）
    Read,
    /// 編集系（write_to_file / insert_content / search_and_replace）
    Edit,
    /// Web系（search_web / fetch_urls_content）
    Web,
}

impl fmt::Display for ToolGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToolGroup::Read => "read",
            ToolGroup::Edit => "edit",
            ToolGroup::Web => "web",
        };
        write!(f, "{}", name)
    }
}

/// モード設定
#[derive(Debug, Clone)]
pub struct Mode {
    /// スラッグ（一意な識別子）
    pub slug: String,
    /// 表示名
    pub name: String,
    /// ロール定義（システムメッセージの先頭に置かれる）
    pub role_definition: String,
    /// 許可するツールグループ
    pub groups: Vec<ToolGroup>,
    /// モード固有のカスタム指示
    pub custom_instructions: String,
    /// 組み込みモードかどうか
    pub is_built_in: bool,
}

/// 組み込みモードの不変カタログを生成
pub fn built_in_modes() -> Vec<Mode> {
    vec![
        Mode {
            slug: "ask".to_string(),
            name: "Ask".to_string(),
            role_definition: "You are a knowledgeable assistant embedded in the user's \
                note vault. You answer questions about the vault's contents, summarize \
                notes, and explain concepts, grounding every answer in the material the \
                user has attached or that you read with the available tools."
                .to_string(),
            groups: vec![ToolGroup::Read],
            custom_instructions: String::new(),
            is_built_in: true,
        },
        Mode {
            slug: "write".to_string(),
            name: "Write".to_string(),
            role_definition: "You are a skilled writing assistant embedded in the user's \
                note vault. You create and revise notes on the user's behalf, keeping the \
                vault's structure, links and formatting conventions intact."
                .to_string(),
            groups: vec![ToolGroup::Read, ToolGroup::Edit],
            custom_instructions: String::new(),
            is_built_in: true,
        },
        Mode {
            slug: "learn".to_string(),
            name: "Learn".to_string(),
            role_definition: "You are a patient learning companion embedded in the user's \
                note vault. You help the user study the material in their notes, quiz them, \
                and build summaries that reinforce understanding."
                .to_string(),
            groups: vec![ToolGroup::Read],
            custom_instructions: String::new(),
            is_built_in: true,
        },
        Mode {
            slug: "research".to_string(),
            name: "Research".to_string(),
            role_definition: "You are a meticulous research assistant embedded in the \
                user's note vault. You gather material across notes and the web, compare \
                sources, and compose well-structured research notes."
                .to_string(),
            groups: vec![ToolGroup::Read, ToolGroup::Edit, ToolGroup::Web],
            custom_instructions: String::new(),
            is_built_in: true,
        },
    ]
}

/// モードレジストリ
///
/// リクエスト処理中は参照のみ。スラッグ解決はユーザー定義が優先（後勝ち）。
pub struct ModeRegistry {
    built_in: Vec<Mode>,
    user: Vec<Mode>,
}

impl ModeRegistry {
    pub fn new() -> Self {
        Self {
            built_in: built_in_modes(),
            user: Vec::new(),
        }
    }

    /// ユーザー定義モードを追加登録
    pub fn register(&mut self, mut mode: Mode) {
        mode.is_built_in = false;
        self.user.push(mode);
    }

    /// スラッグからモードを解決（ユーザー定義の後勝ち、次に組み込み）
    pub fn resolve(&self, slug: &str) -> Option<&Mode> {
        self.user
            .iter()
            .rev()
            .find(|m| m.slug == slug)
            .or_else(|| self.built_in.iter().find(|m| m.slug == slug))
    }

    /// スラッグを解決し、見つからなければ既定モードにフォールバック
    pub fn resolve_or_default(&self, slug: &str) -> &Mode {
        self.resolve(slug).unwrap_or(&self.built_in[0])
    }

    /// カタログ列挙: 組み込み（上書きされていれば上書き側）＋新規ユーザーモード
    pub fn all(&self) -> Vec<&Mode> {
        let mut result: Vec<&Mode> = self
            .built_in
            .iter()
            .map(|m| self.resolve(&m.slug).unwrap_or(m))
            .collect();

        for mode in &self.user {
            if !self.built_in.iter().any(|b| b.slug == mode.slug) {
                // 同名のユーザーモードが複数ある場合は最後の登録のみを残す
                let latest = self.resolve(&mode.slug).unwrap_or(mode);
                if !result.iter().any(|m| m.slug == mode.slug) {
                    result.push(latest);
                }
            }
        }

        result
    }
}

impl Default for ModeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_built_in_resolution() {
        let registry = ModeRegistry::new();
        assert!(registry.resolve("ask").is_some());
        assert!(registry.resolve("write").is_some());
        assert!(registry.resolve("nonexistent").is_none());
        assert_eq!(registry.resolve_or_default("nonexistent").slug, "ask");
    }

    #[test]
    fn test_user_mode_masks_built_in() {
        let mut registry = ModeRegistry::new();
        registry.register(Mode {
            slug: "write".to_string(),
            name: "Custom Write".to_string(),
            role_definition: "Custom role".to_string(),
            groups: vec![ToolGroup::Read],
            custom_instructions: "custom".to_string(),
            is_built_in: false,
        });

        let resolved = registry.resolve("write").unwrap();
        assert_eq!(resolved.name, "Custom Write");
        assert!(!resolved.is_built_in);
    }

    #[test]
    fn test_last_registered_wins() {
        let mut registry = ModeRegistry::new();
        for name in ["First", "Second"] {
            registry.register(Mode {
                slug: "custom".to_string(),
                name: name.to_string(),
                role_definition: String::new(),
                groups: vec![],
                custom_instructions: String::new(),
                is_built_in: false,
            });
        }

        assert_eq!(registry.resolve("custom").unwrap().name, "Second");
        // カタログ列挙にも最後の登録だけが現れる
        let all = registry.all();
        assert_eq!(all.iter().filter(|m| m.slug == "custom").count(), 1);
        assert_eq!(
            all.iter().find(|m| m.slug == "custom").unwrap().name,
            "Second"
        );
    }

    #[test]
    fn test_catalogue_order() {
        let registry = ModeRegistry::new();
        let slugs: Vec<&str> = registry.all().iter().map(|m| m.slug.as_str()).collect();
        assert_eq!(slugs, vec!["ask", "write", "learn", "research"]);
    }
}
