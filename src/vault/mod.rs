//! ホストリソースへのアクセス契約
//!
//! リソース解決（読み取り）とホスト操作（書き込み系）は外部協調者であり、
//! コアはこの契約だけを消費する。fsモジュールがファイルシステム実装を提供する。

pub mod fs;

use async_trait::async_trait;

use crate::error::ResolveError;

/// フォルダ列挙のエントリ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub name: String,
    /// コンテナ（フォルダ）かどうか
    pub is_container: bool,
}

/// リソース参照をテキストへ解決する契約
#[async_trait]
pub trait ResourceResolver: Send + Sync {
    /// リソースのテキスト内容を取得
    async fn resolve(&self, path: &str) -> Result<String, ResolveError>;

    /// フォルダ直下のエントリ一覧を取得
    async fn list_children(&self, path: &str) -> Result<Vec<ChildEntry>, ResolveError>;
}

/// ツールディスパッチャが消費するホスト操作の契約
#[async_trait]
pub trait HostActions: Send + Sync {
    /// 全文書き込み（新規作成または完全上書き）
    async fn write_full(&self, path: &str, content: &str) -> anyhow::Result<()>;

    /// 追記または行位置指定の挿入（positionは1始まり、Noneで末尾追記）
    async fn append_or_insert(
        &self,
        path: &str,
        content: &str,
        position: Option<usize>,
    ) -> anyhow::Result<()>;

    /// リテラル検索置換。置換した件数を返す。
    async fn search_and_replace(
        &self,
        path: &str,
        search: &str,
        replace: &str,
    ) -> anyhow::Result<usize>;

    /// 全文読み取り
    async fn read_full(&self, path: &str) -> anyhow::Result<String>;

    /// パス一覧（recursiveで配下全体）
    async fn list_tree(&self, path: &str, recursive: bool) -> anyhow::Result<Vec<String>>;
}

pub use fs::FsVault;
