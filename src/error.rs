//! エラー型定義
//!
//! 解決エラーとディスパッチエラーは会話テキストに畳み込んで回復し、
//! 設定エラーとトランスポートエラーは交換を終了させてユーザーに通知する。

use thiserror::Error;

/// プロンプトコンパイル時のエラー
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    /// ターンログが空
    #[error("conversation has no turns")]
    EmptyConversation,
    /// 最後のターンがユーザー発話ではない
    #[error("last turn is not a user turn")]
    LastTurnNotUser,
}

/// LLM交換（リクエスト〜ストリーミング）のエラー
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// 設定不備（APIキー・モデル・ベースURLの欠落）
    #[error("configuration error: {0}")]
    Configuration(String),
    /// ネットワーク・HTTPレベルの失敗
    #[error("transport error: {0}")]
    Transport(String),
    /// このセッションで交換がすでに進行中
    #[error("an exchange is already in flight for this session")]
    ExchangeInFlight,
}

impl ExchangeError {
    /// 最初のチャンク受信前に発生したエラーか（= failed遷移の対象か）
    pub fn is_pre_stream(&self) -> bool {
        matches!(
            self,
            ExchangeError::Configuration(_) | ExchangeError::Transport(_)
        )
    }
}

/// リソース解決のエラー
///
/// コンパイルを中断させず、添付ブロック内のプレースホルダ文字列に劣化させる。
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("resource kind not supported: {0}")]
    Unsupported(String),
    #[error("failed to read {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// ツールディスパッチのエラー
///
/// ユーザーには出さず、指示自身のテキスト結果としてモデルに返す。
#[derive(Debug, Error)]
pub enum ToolError {
    /// path引数もアクティブリソースも無い
    #[error("no target resource: no path argument was given and no resource is active")]
    NoTargetResource,
    /// 必須引数の欠落
    #[error("missing required argument '{0}'")]
    MissingArgument(&'static str),
    /// ホスト操作の失敗
    #[error("host action failed: {0}")]
    Host(String),
    /// Strictポリシー下でカタログ外の指示を拒否
    #[error("directive '{0}' is not in the active tool catalogue")]
    NotInCatalogue(String),
}

/// モデル出力中の指示ブロックの構文不良
///
/// 指示としては実行せず、プレーンテキストとして扱う。
#[derive(Debug, Clone, Error)]
#[error("malformed directive block: {reason}")]
pub struct ProtocolError {
    pub reason: String,
}
