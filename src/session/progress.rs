//! クエリ進行状況の状態機械と通知先
//!
//! UI側へはpush-onlyで通知する。応答確認は取らない。

use std::sync::Arc;

use super::turn::Turn;

/// クエリ進行状況のフェーズ
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryProgress {
    /// プロンプト生成の準備中
    Analysing,
    /// 添付の読み取り中（completedは単調増加）
    ReadingAttachments { completed: usize, total: usize },
    /// モデル応答の生成中
    Generating,
    /// ツール指示の実行中
    ToolDispatch { tool: String },
    /// 完了（終端）
    Done,
    /// エラー（終端）
    Error { message: String },
    /// キャンセル（終端）
    Cancelled,
}

impl QueryProgress {
    /// 終端状態か（終端からの遷移は存在しない）
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryProgress::Done | QueryProgress::Error { .. } | QueryProgress::Cancelled
        )
    }
}

/// 進行状況とターンスナップショットの通知先
pub trait ProgressSink: Send + Sync {
    /// フェーズ遷移の通知
    fn on_progress(&self, progress: &QueryProgress);

    /// ストリーミング中・確定時のターンスナップショット通知
    fn on_turn(&self, _turn: &Turn) {}
}

/// 何もしない通知先
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn on_progress(&self, _progress: &QueryProgress) {}
}

/// 進行状況トラッカー
///
/// 終端状態に入った後の遷移と、添付カウンタの巻き戻りを拒否する。
pub struct ProgressTracker {
    current: Option<QueryProgress>,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressTracker {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            current: None,
            sink,
        }
    }

    pub fn current(&self) -> Option<&QueryProgress> {
        self.current.as_ref()
    }

    /// フェーズを進める。不正な遷移は無視して現状を維持する。
    pub fn advance(&mut self, next: QueryProgress) {
        if let Some(current) = &self.current {
            if current.is_terminal() {
                return;
            }
            if let (
                QueryProgress::ReadingAttachments { completed: prev, .. },
                QueryProgress::ReadingAttachments { completed, .. },
            ) = (current, &next)
            {
                if completed < prev {
                    return;
                }
            }
        }

        self.sink.on_progress(&next);
        self.current = Some(next);
    }

    /// ターンスナップショットを通知先へ中継
    pub fn publish_turn(&self, turn: &Turn) {
        self.sink.on_turn(turn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        seen: Mutex<Vec<QueryProgress>>,
    }

    impl ProgressSink for RecordingSink {
        fn on_progress(&self, progress: &QueryProgress) {
            self.seen.lock().unwrap().push(progress.clone());
        }
    }

    #[test]
    fn test_terminal_absorbs() {
        let sink = Arc::new(RecordingSink {
            seen: Mutex::new(Vec::new()),
        });
        let mut tracker = ProgressTracker::new(sink.clone());

        tracker.advance(QueryProgress::Analysing);
        tracker.advance(QueryProgress::Done);
        tracker.advance(QueryProgress::Generating); // 終端後は無視

        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(*tracker.current().unwrap(), QueryProgress::Done);
    }

    #[test]
    fn test_attachment_counter_monotonic() {
        let sink = Arc::new(RecordingSink {
            seen: Mutex::new(Vec::new()),
        });
        let mut tracker = ProgressTracker::new(sink.clone());

        tracker.advance(QueryProgress::ReadingAttachments {
            completed: 2,
            total: 3,
        });
        // 巻き戻りは拒否される
        tracker.advance(QueryProgress::ReadingAttachments {
            completed: 1,
            total: 3,
        });

        assert_eq!(
            *tracker.current().unwrap(),
            QueryProgress::ReadingAttachments {
                completed: 2,
                total: 3
            }
        );
        assert_eq!(sink.seen.lock().unwrap().len(), 1);
    }
}
