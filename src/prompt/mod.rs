//! プロンプト生成モジュール
//!
//! システムメッセージの各セクションと、会話からのリクエスト列コンパイルを提供する。

pub mod compiler;
pub mod sections;

pub use compiler::{add_line_numbers, CompiledPrompt, PromptCompiler, MESSAGE_WINDOW};
