//! vault-copilot: ドキュメントホスト組み込み型の会話アシスタントコア
//!
//! プロンプトコンパイラ・ストリーミング応答コンシューマ・ツール指示ディスパッチャを
//! 束ねたオーケストレーションエンジン。UI描画とホスト固有のリソース解決は
//! トレイト越しの外部協調者として扱う。

pub mod config;
pub mod engine;
pub mod error;
pub mod llm;
pub mod modes;
pub mod prompt;
pub mod session;
pub mod tools;
pub mod vault;

// 主要な型の再エクスポート
pub use config::{Settings, SettingsBus, SubscriptionId};
pub use engine::{CopilotEngine, ExchangeOutcome, SubmitError};
pub use error::{CompileError, ExchangeError, ProtocolError, ResolveError, ToolError};
pub use llm::{
    DeltaStream, Directive, DirectiveParser, ExchangePhase, LlmTransport, ModelSelector,
    OpenAiCompatClient, RequestMessage, RequestRole, StreamDelta, StreamingExchange,
};
pub use modes::{built_in_modes, Mode, ModeRegistry, ToolGroup};
pub use prompt::{CompiledPrompt, PromptCompiler, MESSAGE_WINDOW};
pub use session::{
    ChatSession, HistoryStore, JsonHistoryStore, Mentionable, NoopProgressSink, ProgressSink,
    QueryProgress, Role, Turn,
};
pub use tools::{
    DispatchPolicy, ToolContext, ToolDescription, ToolDispatcher, ToolKind, ToolRegistry,
    UserToolDescriptor,
};
pub use vault::{ChildEntry, FsVault, HostActions, ResourceResolver};

/// バージョン情報
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
