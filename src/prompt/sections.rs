//! システムメッセージの各セクション生成
//!
//! セクションは固定順で連結され、空文字列を返したセクションは
//! 区切りを残さず丸ごと省略される。

use crate::modes::{Mode, ModeRegistry, ToolGroup};

/// ツール使用プロトコルの説明
pub fn tool_use_section() -> String {
    "====\n\n\
     TOOL USE\n\n\
     You have access to a set of tools that are executed upon the user's approval. \
     You use one tool per message, and receive the result of that tool use before \
     continuing. Each step is informed by the result of the previous one.\n\n\
     To use a tool, output a JSON block like this:\n\
     ```json\n\
     {\"tool\": \"tool_name\", \"params\": {\"param1\": \"value1\"}}\n\
     ```\n\n\
     Always use the actual tool name as the \"tool\" value and put every argument \
     into the flat \"params\" object."
        .to_string()
}

/// ツール使用ガイドライン
pub fn tool_use_guidelines_section() -> String {
    "# Tool Use Guidelines\n\n\
     1. Assess what information you already have and what you need to proceed.\n\
     2. Choose the most appropriate tool for the current step.\n\
     3. Use one tool at a time. Do not assume the outcome of a tool use before \
     its result is returned to you.\n\
     4. Formulate your tool use in the JSON block format specified above.\n\
     5. After each tool use, its result will be folded into the conversation. \
     Use that result to decide your next step."
        .to_string()
}

/// 拡張サーバーのセクション（このビルドでは空）
pub fn extension_servers_section() -> String {
    String::new()
}

/// ケーパビリティの要約
pub fn capabilities_section(mode: &Mode, search_method: &str) -> String {
    let mut lines = vec![
        "====".to_string(),
        String::new(),
        "CAPABILITIES".to_string(),
        String::new(),
        "- You can read notes, list folders, and inspect the structure of the user's \
         vault to ground your answers."
            .to_string(),
    ];

    if mode.groups.contains(&ToolGroup::Edit) {
        lines.push(
            "- You can create and edit notes with write_to_file, insert_content and \
             search_and_replace, keeping the vault's conventions intact."
                .to_string(),
        );
    }

    let search_line = if search_method == "match" {
        "- File search uses keyword matching across the vault."
    } else {
        "- File search uses regular-expression matching across the vault."
    };
    lines.push(search_line.to_string());

    lines.join("\n")
}

/// モードカタログ
pub fn modes_section(registry: &ModeRegistry) -> String {
    let mut out = String::from("====\n\nMODES\n\n- These are the currently available modes:\n");

    for mode in registry.all() {
        let summary = mode
            .role_definition
            .split('.')
            .next()
            .unwrap_or(&mode.role_definition)
            .trim();
        out.push_str(&format!("  * \"{}\" mode ({}) - {}\n", mode.name, mode.slug, summary));
    }

    out.trim_end().to_string()
}

/// 編集ツールの選択方針（編集グループを持つモードのみ）
fn editing_instructions(mode: &Mode) -> String {
    if !mode.groups.contains(&ToolGroup::Edit) {
        return String::new();
    }

    "- For editing notes, you have access to these tools: write_to_file (for creating \
     new notes or complete note rewrites), insert_content (for adding lines to existing \
     notes), search_and_replace (for finding and replacing individual pieces of text). \
     You MUST follow this decision-making hierarchy to choose the correct tool:\n\n\
  1.  **For Small, Scattered, Repetitive Changes**: If the task is to correct a \
     specific term, a typo, or a pattern that appears in multiple, non-contiguous places \
     in the note, your **first and only choice** should be `search_and_replace`. It is \
     the most precise and efficient tool for this job.\n\n\
  2.  **For Large-Scale Rewrites or Major Changes**: If the task requires modifying a \
     large portion of the note (e.g., more than roughly 30-40% of the content) or \
     restructuring the entire note, you **MUST** use `write_to_file`. In these cases, \
     first use `read_file` to get the full current content, make all your changes in \
     your internal thought process, and then write the entire, new content back using \
     `write_to_file`."
        .to_string()
}

fn search_instructions(search_method: &str) -> String {
    match search_method {
        "match" => {
            "- You can use search_files for keyword/phrase-based searches across the vault."
                .to_string()
        }
        "regex" => {
            "- You can use search_files for pattern-based searches across the vault.".to_string()
        }
        _ => String::new(),
    }
}

/// 振る舞いルール
pub fn rules_section(mode: &Mode, search_method: &str) -> String {
    let mut rules = vec![
        "====".to_string(),
        String::new(),
        "RULES".to_string(),
        String::new(),
    ];

    let search = search_instructions(search_method);
    if !search.is_empty() {
        rules.push(search);
    }

    rules.push(
        "- When creating new notes, organize them according to the existing vault \
         structure unless the user specifies otherwise. Use appropriate file paths when \
         writing notes, as the write_to_file tool will automatically create any \
         necessary directories. New notes should follow Markdown syntax with \
         appropriate use of links, tags, headings and lists."
            .to_string(),
    );

    let editing = editing_instructions(mode);
    if !editing.is_empty() {
        rules.push(editing);
    }

    rules.push(
        "- When making changes to content, always consider the context within the \
         broader vault. Ensure that your changes maintain existing links, tags and \
         references, and that they follow the user's established formatting standards."
            .to_string(),
    );
    rules.push(
        "- Do not ask for more information than necessary. Use the tools provided to \
         accomplish the user's request efficiently and effectively. When you've \
         completed your task, you must use the attempt_completion tool to present the \
         result to the user."
            .to_string(),
    );
    rules.push(
        "- NEVER end an attempt_completion result with a question or request to engage \
         in further conversation. Formulate the end of your result in a way that is \
         final."
            .to_string(),
    );
    rules.push(
        "- You are STRICTLY FORBIDDEN from starting your messages with \"Great\", \
         \"Certainly\", \"Okay\", \"Sure\". Be direct and to the point."
            .to_string(),
    );
    rules.push(
        "- At the end of the user message you will automatically receive \
         environment_details. This information is auto-generated, not written by the \
         user."
            .to_string(),
    );
    rules.push(
        "- It is critical you wait for the result after each tool use, in order to \
         confirm its success before continuing."
            .to_string(),
    );

    rules.join("\n")
}

/// 目的の記述
pub fn objective_section(_mode: &Mode) -> String {
    "====\n\n\
     OBJECTIVE\n\n\
     You accomplish the user's task iteratively: break it into clear steps, work \
     through them one at a time using at most one tool per step, and present the \
     final result with attempt_completion when every step is done."
        .to_string()
}

/// カスタム指示（グローバル＋モード別、モード別が後勝ち）
pub fn custom_instructions_section(
    global: &str,
    mode: &Mode,
    preferred_language: Option<&str>,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(language) = preferred_language {
        if !language.trim().is_empty() {
            parts.push(format!(
                "Language Preference:\nYou should always speak and think in the \
                 \"{}\" language.",
                language.trim()
            ));
        }
    }

    if !global.trim().is_empty() {
        parts.push(format!("Global Instructions:\n{}", global.trim()));
    }

    // モード別の指示は後に置かれ、衝突時はこちらが優先される
    if !mode.custom_instructions.trim().is_empty() {
        parts.push(format!(
            "Mode-specific Instructions:\n{}",
            mode.custom_instructions.trim()
        ));
    }

    if parts.is_empty() {
        return String::new();
    }

    format!(
        "====\n\nUSER'S CUSTOM INSTRUCTIONS\n\n\
         The following additional instructions are provided by the user, and should \
         be followed to the best of your ability.\n\n{}",
        parts.join("\n\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::built_in_modes;

    fn mode(slug: &str) -> Mode {
        built_in_modes()
            .into_iter()
            .find(|m| m.slug == slug)
            .unwrap()
    }

    #[test]
    fn test_editing_policy_only_for_edit_modes() {
        let write_rules = rules_section(&mode("write"), "regex");
        assert!(write_rules.contains("decision-making hierarchy"));
        assert!(write_rules.contains("search_and_replace"));

        let ask_rules = rules_section(&mode("ask"), "regex");
        assert!(!ask_rules.contains("decision-making hierarchy"));
    }

    #[test]
    fn test_extension_servers_empty() {
        assert!(extension_servers_section().is_empty());
    }

    #[test]
    fn test_modes_section_lists_all() {
        let registry = ModeRegistry::new();
        let section = modes_section(&registry);
        for slug in ["ask", "write", "learn", "research"] {
            assert!(section.contains(&format!("({})", slug)));
        }
    }

    #[test]
    fn test_custom_instructions_merge_order() {
        let m = Mode {
            custom_instructions: "Mode level rule".to_string(),
            ..mode("ask")
        };
        let section = custom_instructions_section("Global rule", &m, Some("Japanese"));

        let lang_pos = section.find("Language Preference").unwrap();
        let global_pos = section.find("Global rule").unwrap();
        let mode_pos = section.find("Mode level rule").unwrap();
        assert!(lang_pos < global_pos);
        assert!(global_pos < mode_pos);
    }

    #[test]
    fn test_custom_instructions_empty_when_nothing_set() {
        assert!(custom_instructions_section("", &mode("ask"), None).is_empty());
    }
}
