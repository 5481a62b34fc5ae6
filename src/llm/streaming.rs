//! ストリーミング交換の状態管理
//!
//! アシスタントターン1つにつき交換は1つ。チャンク境界での協調キャンセルを行い、
//! キャンセル時点までに取り込んだ部分コンテンツは破棄せず保持する。

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::transport::StreamDelta;

/// 交換のフェーズ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl ExchangePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExchangePhase::Completed | ExchangePhase::Cancelled | ExchangePhase::Failed
        )
    }
}

/// トランスポートから届く差分のストリーム
///
/// 有限で再開不可。Errはストリーム途中のトランスポート断を表す。
pub struct DeltaStream {
    receiver: mpsc::Receiver<Result<StreamDelta, String>>,
}

impl DeltaStream {
    pub fn new(receiver: mpsc::Receiver<Result<StreamDelta, String>>) -> Self {
        Self { receiver }
    }

    /// 次のイベントを取得。ストリームが尽きたらNone。
    pub async fn next(&mut self) -> Option<Result<StreamDelta, String>> {
        self.receiver.recv().await
    }

    /// 固定の差分列からストリームを作る（テスト・モック用）
    pub fn from_deltas(deltas: Vec<StreamDelta>) -> Self {
        let (tx, rx) = mpsc::channel(deltas.len().max(1));
        tokio::spawn(async move {
            for delta in deltas {
                if tx.send(Ok(delta)).await.is_err() {
                    break;
                }
            }
        });
        Self::new(rx)
    }
}

/// アシスタントターン1つ分の一時的なストリーミング状態
///
/// 完了・失敗・キャンセルで破棄され、永続化されることはない。
pub struct StreamingExchange {
    cancel: CancellationToken,
    content: String,
    reasoning: String,
    phase: ExchangePhase,
    error: Option<String>,
}

impl StreamingExchange {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// 呼び出し側が所有するキャンセルトークンを結び付けて交換を作る
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            content: String::new(),
            reasoning: String::new(),
            phase: ExchangePhase::Idle,
            error: None,
        }
    }

    /// トランスポート呼び出しに渡すキャンセルトークン
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// キャンセルを要求（終端状態では何もしない冪等操作）
    pub fn request_cancel(&self) {
        if !self.phase.is_terminal() {
            self.cancel.cancel();
        }
    }

    pub fn phase(&self) -> ExchangePhase {
        self.phase
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// ストリーム途中で発生したエラーの説明
    pub fn stream_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// リクエスト発行を記録（idle → requesting）
    pub fn begin_request(&mut self) {
        if self.phase == ExchangePhase::Idle {
            self.phase = ExchangePhase::Requesting;
        }
    }

    /// 最初のチャンクより前の失敗を記録（requesting → failed）
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.error = Some(reason.into());
        self.phase = ExchangePhase::Failed;
    }

    /// チャンク消費ループ
    ///
    /// 差分を取り込むたびにon_deltaを呼ぶ。キャンセルは各チャンク境界で検査し、
    /// 検知したら以降のチャンクを消費せずに抜ける（取り込み済み分は保持）。
    pub async fn consume<F>(&mut self, stream: &mut DeltaStream, mut on_delta: F) -> ExchangePhase
    where
        F: FnMut(&StreamDelta),
    {
        loop {
            if self.cancel.is_cancelled() {
                self.phase = ExchangePhase::Cancelled;
                break;
            }

            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.phase = ExchangePhase::Cancelled;
                    break;
                }
                event = stream.next() => event,
            };

            match event {
                Some(Ok(delta)) => {
                    if self.phase == ExchangePhase::Requesting || self.phase == ExchangePhase::Idle
                    {
                        self.phase = ExchangePhase::Streaming;
                    }

                    // contentとreasoningは別バッファに蓄積し、交差させない
                    if let Some(content) = &delta.content {
                        self.content.push_str(content);
                    }
                    if let Some(reasoning) = &delta.reasoning {
                        self.reasoning.push_str(reasoning);
                    }

                    on_delta(&delta);
                }
                Some(Err(reason)) => {
                    // 1チャンク以上受信後の断。取り込み済みコンテンツは保持する。
                    self.error = Some(reason);
                    self.phase = ExchangePhase::Failed;
                    break;
                }
                None => {
                    self.phase = ExchangePhase::Completed;
                    break;
                }
            }
        }

        self.phase
    }
}

impl Default for StreamingExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_consume_to_completion() {
        let mut exchange = StreamingExchange::new();
        exchange.begin_request();

        let mut stream = DeltaStream::from_deltas(vec![
            StreamDelta::content("Hel"),
            StreamDelta::reasoning("thinking"),
            StreamDelta::content("lo"),
        ]);

        let mut deltas_seen = 0;
        let phase = exchange
            .consume(&mut stream, |_delta| {
                deltas_seen += 1;
            })
            .await;

        assert_eq!(phase, ExchangePhase::Completed);
        assert_eq!(exchange.content(), "Hello");
        assert_eq!(exchange.reasoning(), "thinking");
        assert_eq!(deltas_seen, 3);
    }

    #[tokio::test]
    async fn test_cancel_retains_merged_chunks() {
        let mut exchange = StreamingExchange::new();
        exchange.begin_request();

        let (tx, rx) = mpsc::channel(10);
        let mut stream = DeltaStream::new(rx);

        tx.send(Ok(StreamDelta::content("one "))).await.unwrap();
        tx.send(Ok(StreamDelta::content("two"))).await.unwrap();

        // 2チャンク取り込んだ時点でキャンセル
        let cancel = exchange.cancel_token();
        let mut merged = 0;
        let phase = exchange
            .consume(&mut stream, |_delta| {
                merged += 1;
                if merged == 2 {
                    cancel.cancel();
                }
            })
            .await;

        assert_eq!(phase, ExchangePhase::Cancelled);
        assert_eq!(exchange.content(), "one two");
        assert_eq!(merged, 2);

        // キャンセル後に届くチャンクは取り込まれない
        let _ = tx.send(Ok(StreamDelta::content(" three"))).await;
        assert_eq!(exchange.content(), "one two");
    }

    #[tokio::test]
    async fn test_midstream_error_keeps_partial() {
        let mut exchange = StreamingExchange::new();
        exchange.begin_request();

        let (tx, rx) = mpsc::channel(10);
        let mut stream = DeltaStream::new(rx);

        tx.send(Ok(StreamDelta::content("partial"))).await.unwrap();
        tx.send(Err("connection reset".to_string())).await.unwrap();
        drop(tx);

        let phase = exchange.consume(&mut stream, |_| {}).await;

        assert_eq!(phase, ExchangePhase::Failed);
        assert_eq!(exchange.content(), "partial");
        assert_eq!(exchange.stream_error(), Some("connection reset"));
    }

    #[tokio::test]
    async fn test_cancel_idempotent_after_terminal() {
        let mut exchange = StreamingExchange::new();
        exchange.begin_request();

        let mut stream = DeltaStream::from_deltas(vec![StreamDelta::content("done")]);
        let phase = exchange.consume(&mut stream, |_| {}).await;
        assert_eq!(phase, ExchangePhase::Completed);

        // 終端後のキャンセルは無効
        exchange.request_cancel();
        assert_eq!(exchange.phase(), ExchangePhase::Completed);
    }

    #[test]
    fn test_phase_transitions() {
        let mut exchange = StreamingExchange::new();
        assert_eq!(exchange.phase(), ExchangePhase::Idle);

        exchange.begin_request();
        assert_eq!(exchange.phase(), ExchangePhase::Requesting);

        exchange.mark_failed("no api key");
        assert_eq!(exchange.phase(), ExchangePhase::Failed);
        assert!(exchange.phase().is_terminal());
    }
}
