//! LLM連携モジュール
//!
//! トランスポート契約・ストリーミング交換・ツール指示パーサを提供する。

pub mod streaming;
pub mod tool_call;
pub mod transport;

pub use streaming::{DeltaStream, ExchangePhase, StreamingExchange};
pub use tool_call::{Directive, DirectiveParser};
pub use transport::{
    LlmTransport, ModelSelector, OpenAiCompatClient, RequestMessage, RequestRole, StreamDelta,
};
