//! エージェントオーケストレーションエンジン
//!
//! セッション・コンパイラ・トランスポート・ディスパッチャを束ね、
//! ユーザー提出1回分の交換（コンパイル→ストリーミング→指示実行→永続化）を駆動する。
//! 1セッションにつき同時に開ける交換は1つだけ。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::{CompileError, ExchangeError};
use crate::llm::{
    DirectiveParser, ExchangePhase, LlmTransport, StreamingExchange,
};
use crate::modes::ModeRegistry;
use crate::prompt::PromptCompiler;
use crate::session::progress::{ProgressSink, ProgressTracker, QueryProgress};
use crate::session::{ChatSession, HistoryStore, NoopProgressSink, Turn};
use crate::tools::{is_terminal_directive, DispatchPolicy, ToolContext, ToolDispatcher, ToolRegistry};
use crate::vault::{HostActions, ResourceResolver};

/// 交換の最終結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// ストリーム完走（指示実行まで完了）
    Completed,
    /// キャンセル（部分コンテンツは保持・永続化済み）
    Cancelled,
    /// ストリーム途中の失敗（部分＋エラーターンが共存）
    Failed,
}

/// 提出時のエラー
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// オーケストレーションエンジン
pub struct CopilotEngine {
    settings: Settings,
    session: ChatSession,
    modes: ModeRegistry,
    tools: ToolRegistry,
    dispatcher: ToolDispatcher,
    resolver: Arc<dyn ResourceResolver>,
    host: Arc<dyn HostActions>,
    transport: Arc<dyn LlmTransport>,
    history: Arc<dyn HistoryStore>,
    progress_sink: Arc<dyn ProgressSink>,
    active_resource: Option<String>,
    /// 交換の同時実行ガード
    active: AtomicBool,
}

impl CopilotEngine {
    pub fn new(
        settings: Settings,
        session: ChatSession,
        resolver: Arc<dyn ResourceResolver>,
        host: Arc<dyn HostActions>,
        transport: Arc<dyn LlmTransport>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        let dispatcher =
            ToolDispatcher::new(DispatchPolicy::parse(&settings.assistant.dispatch_policy));

        Self {
            settings,
            session,
            modes: ModeRegistry::new(),
            tools: ToolRegistry::new(),
            dispatcher,
            resolver,
            host,
            transport,
            history,
            progress_sink: Arc::new(NoopProgressSink),
            active_resource: None,
            active: AtomicBool::new(false),
        }
    }

    /// 進行状況の通知先を設定
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress_sink = sink;
        self
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ChatSession {
        &mut self.session
    }

    pub fn modes_mut(&mut self) -> &mut ModeRegistry {
        &mut self.modes
    }

    pub fn tools_mut(&mut self) -> &mut ToolRegistry {
        &mut self.tools
    }

    /// 現在アクティブなリソース（path省略時のディスパッチ対象）を設定
    pub fn set_active_resource(&mut self, path: Option<String>) {
        self.active_resource = path;
    }

    /// 設定変更を反映（SettingsBusの購読者から呼ばれる想定）
    pub fn apply_settings(&mut self, settings: Settings) {
        self.dispatcher =
            ToolDispatcher::new(DispatchPolicy::parse(&settings.assistant.dispatch_policy));
        self.settings = settings;
    }

    /// ユーザー発話を提出して交換を1回駆動する
    pub async fn submit(&mut self, query: &str) -> Result<ExchangeOutcome, SubmitError> {
        self.submit_with_cancel(query, CancellationToken::new())
            .await
    }

    /// キャンセルトークン付きで提出。トークンは呼び出し側が保持し、
    /// 任意のタイミングでcancel()を呼べる。
    pub async fn submit_with_cancel(
        &mut self,
        query: &str,
        cancel: CancellationToken,
    ) -> Result<ExchangeOutcome, SubmitError> {
        // 交換が開いている間の提出はターンログを変えない no-op
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(SubmitError::Exchange(ExchangeError::ExchangeInFlight));
        }

        let result = self.run_exchange(query, cancel).await;
        self.active.store(false, Ordering::SeqCst);
        result
    }

    async fn run_exchange(
        &mut self,
        query: &str,
        cancel: CancellationToken,
    ) -> Result<ExchangeOutcome, SubmitError> {
        let mut progress = ProgressTracker::new(self.progress_sink.clone());
        progress.advance(QueryProgress::Analysing);

        // 提出待ちの添付をユーザーターンへ移す
        let attachments = self.session.take_mentionables();
        self.session.push(Turn::user(query, attachments));

        // コンパイル（添付解決の待ちも同じトークンで中断できる）
        let wait = {
            let compile_fut = PromptCompiler::compile(
                &mut self.session,
                &self.modes,
                &self.tools,
                self.resolver.as_ref(),
                &self.settings,
                self.active_resource.as_deref(),
                &mut progress,
            );
            tokio::pin!(compile_fut);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = &mut compile_fut => Some(result),
            }
        };

        let compiled = match wait {
            None => {
                // 解決が確定する前のキャンセル: プロンプトは保存されない
                self.persist();
                progress.advance(QueryProgress::Cancelled);
                return Ok(ExchangeOutcome::Cancelled);
            }
            Some(result) => result?,
        };

        // チェックポイント1: コンパイル結果のマージ後
        self.persist();

        self.session.push(Turn::assistant(""));
        if let Some(turn) = self.session.last() {
            progress.publish_turn(turn);
        }

        let mut exchange = StreamingExchange::with_token(cancel.clone());
        exchange.begin_request();

        let stream = self
            .transport
            .stream_chat(
                self.session.model(),
                &compiled.request_messages,
                &self.settings.model_options,
                cancel.clone(),
            )
            .await;

        let mut stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                // 最初のチャンク以前の失敗: failed遷移、エラーを会話にも残す
                exchange.mark_failed(e.to_string());
                self.session.push(Turn::assistant(format!("Error: {}", e)));
                self.persist();
                progress.advance(QueryProgress::Error {
                    message: e.to_string(),
                });
                return Err(SubmitError::Exchange(e));
            }
        };

        progress.advance(QueryProgress::Generating);

        let session = &mut self.session;
        let phase = exchange
            .consume(&mut stream, |delta| {
                if let Some(content) = &delta.content {
                    session.append_to_streaming_turn(content);
                }
                if let Some(reasoning) = &delta.reasoning {
                    session.append_reasoning_to_streaming_turn(reasoning);
                }
                if let Some(turn) = session.last() {
                    progress.publish_turn(turn);
                }
            })
            .await;

        match phase {
            ExchangePhase::Cancelled => {
                // 取り込み済みの部分コンテンツはロールバックせず永続化する
                self.persist();
                progress.advance(QueryProgress::Cancelled);
                tracing::info!(session = self.session.id(), "Exchange cancelled");
                Ok(ExchangeOutcome::Cancelled)
            }
            ExchangePhase::Failed => {
                let message = exchange
                    .stream_error()
                    .unwrap_or("stream interrupted")
                    .to_string();
                // 部分ターンとエラーターンは共存する
                self.session
                    .push(Turn::assistant(format!("Error: {}", message)));
                self.persist();
                progress.advance(QueryProgress::Error { message });
                Ok(ExchangeOutcome::Failed)
            }
            _ => {
                self.persist();
                if let Some(turn) = self.session.last() {
                    progress.publish_turn(turn);
                }

                let cut_short = self
                    .dispatch_directives(exchange.content(), &cancel, &mut progress)
                    .await;

                self.persist();
                if cut_short {
                    progress.advance(QueryProgress::Cancelled);
                    Ok(ExchangeOutcome::Cancelled)
                } else {
                    progress.advance(QueryProgress::Done);
                    Ok(ExchangeOutcome::Completed)
                }
            }
        }
    }

    /// 応答から指示を取り出し、順次ディスパッチして結果を折り込む
    ///
    /// キャンセルは指示の境界ごとに検査する。打ち切ったらtrueを返す。
    async fn dispatch_directives(
        &mut self,
        response: &str,
        cancel: &CancellationToken,
        progress: &mut ProgressTracker,
    ) -> bool {
        let directives = DirectiveParser::parse(response);
        if directives.is_empty() {
            return false;
        }

        // Strictポリシー用のカタログ（Trustでは所属検査に使われない）
        let mode = self.modes.resolve_or_default(self.session.mode_slug());
        let ctx = ToolContext::new(self.settings.assistant.search_method.clone());
        let catalogue = self
            .tools
            .catalogue_for(mode, &self.settings.experiments, &ctx);

        for directive in directives {
            if cancel.is_cancelled() {
                return true;
            }

            progress.advance(QueryProgress::ToolDispatch {
                tool: directive.name.clone(),
            });

            let result = self
                .dispatcher
                .dispatch(
                    &directive,
                    self.host.as_ref(),
                    self.active_resource.as_deref(),
                    &catalogue,
                )
                .await;

            // ディスパッチエラーは指示自身の結果テキストとしてモデルに返す
            let text = match result {
                Ok(text) => text,
                Err(e) => format!("Error: {}", e),
            };

            self.session.push(Turn::tool_result(&directive.name, &text));
            if let Some(turn) = self.session.last() {
                progress.publish_turn(turn);
            }

            if is_terminal_directive(&directive.name) {
                break;
            }
        }

        false
    }

    /// 履歴ストアへの書き込み（チェックポイントでのみ呼ばれる）
    fn persist(&self) {
        if let Err(e) = self.history.save_session(&self.session) {
            tracing::warn!("Failed to persist session: {}", e);
        }
    }
}
