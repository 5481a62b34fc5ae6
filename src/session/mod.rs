//! 会話セッション管理
//!
//! ターンログ・添付参照・進行状況・履歴永続化をまとめるモジュール。

pub mod conversation;
pub mod history;
pub mod progress;
pub mod turn;

pub use conversation::ChatSession;
pub use history::{HistoryEntry, HistoryStore, JsonHistoryStore, PersistedSession, PersistedTurn};
pub use progress::{NoopProgressSink, ProgressSink, ProgressTracker, QueryProgress};
pub use turn::{Mentionable, Role, Turn};
