//! ファイルシステムベースのボルト実装
//!
//! ルートディレクトリ配下の相対パスだけを扱い、ルート外への脱出を拒否する。

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use super::{ChildEntry, HostActions, ResourceResolver};
use crate::error::ResolveError;

/// 内容を直接読み取れる拡張子
const READABLE_EXTENSIONS: &[&str] = &["md", "txt", "js", "ts", "css", "html", "json"];

/// ルートディレクトリ配下をボルトとして扱うアダプタ
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 相対パスを検証してルート配下の絶対パスへ変換
    fn full_path(&self, path: &str) -> Result<PathBuf, ResolveError> {
        let rel = Path::new(path);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(ResolveError::Unsupported(path.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn is_readable_extension(path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => READABLE_EXTENSIONS.contains(&ext.to_lowercase().as_str()),
            None => true,
        }
    }

    fn walk(dir: &Path, base: &Path, recursive: bool, out: &mut Vec<String>) -> std::io::Result<()> {
        let mut entries: Vec<_> = std::fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            let rel = path
                .strip_prefix(base)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");

            if path.is_dir() {
                out.push(format!("{}/", rel));
                if recursive {
                    Self::walk(&path, base, recursive, out)?;
                }
            } else {
                out.push(rel);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceResolver for FsVault {
    async fn resolve(&self, path: &str) -> Result<String, ResolveError> {
        let full = self.full_path(path)?;

        if !full.exists() {
            return Err(ResolveError::NotFound(path.to_string()));
        }

        if full.is_dir() {
            return Err(ResolveError::Unsupported(format!(
                "{} is a folder, not a file",
                path
            )));
        }

        if !Self::is_readable_extension(&full) {
            // バイナリ系はプレースホルダに劣化させる
            let ext = full
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("unknown");
            return Ok(format!(
                "(File type {} not supported for reading content directly)",
                ext
            ));
        }

        fs::read_to_string(&full)
            .await
            .map_err(|e| ResolveError::Unreadable {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    async fn list_children(&self, path: &str) -> Result<Vec<ChildEntry>, ResolveError> {
        let full = self.full_path(path)?;

        if !full.is_dir() {
            return Err(ResolveError::NotFound(path.to_string()));
        }

        let mut read_dir = fs::read_dir(&full)
            .await
            .map_err(|e| ResolveError::Unreadable {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        let mut children = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let is_container = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            children.push(ChildEntry { name, is_container });
        }

        children.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(children)
    }
}

#[async_trait]
impl HostActions for FsVault {
    async fn write_full(&self, path: &str, content: &str) -> Result<()> {
        let full = self
            .full_path(path)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        // 親ディレクトリが存在しない場合は作成
        if let Some(parent) = full.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create parent directory")?;
            }
        }

        fs::write(&full, content)
            .await
            .with_context(|| format!("Failed to write file: {}", path))?;

        Ok(())
    }

    async fn append_or_insert(
        &self,
        path: &str,
        content: &str,
        position: Option<usize>,
    ) -> Result<()> {
        let existing = self.read_full(path).await.unwrap_or_default();

        let new_content = match position {
            None => {
                if existing.is_empty() {
                    content.to_string()
                } else if existing.ends_with('\n') {
                    format!("{}{}", existing, content)
                } else {
                    format!("{}\n{}", existing, content)
                }
            }
            Some(line) => {
                let mut lines: Vec<&str> = existing.lines().collect();
                let index = line.saturating_sub(1).min(lines.len());
                lines.insert(index, content);
                lines.join("\n")
            }
        };

        self.write_full(path, &new_content).await
    }

    async fn search_and_replace(&self, path: &str, search: &str, replace: &str) -> Result<usize> {
        let content = self.read_full(path).await?;

        let occurrences = content.matches(search).count();
        if occurrences == 0 {
            return Ok(0);
        }

        let new_content = content.replace(search, replace);
        self.write_full(path, &new_content).await?;

        Ok(occurrences)
    }

    async fn read_full(&self, path: &str) -> Result<String> {
        let full = self
            .full_path(path)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        fs::read_to_string(&full)
            .await
            .with_context(|| format!("Failed to read file: {}", path))
    }

    async fn list_tree(&self, path: &str, recursive: bool) -> Result<Vec<String>> {
        let full = self
            .full_path(path)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        if !full.is_dir() {
            anyhow::bail!("Not a folder: {}", path);
        }

        let mut out = Vec::new();
        Self::walk(&full, &full, recursive, &mut out)
            .with_context(|| format!("Failed to list folder: {}", path))?;

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup() -> (tempfile::TempDir, FsVault) {
        let dir = tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("notes/sub"))
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("notes/today.md"), "line one\nline two\n")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("notes/sub/deep.md"), "deep note")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("image.png"), [0u8, 1, 2])
            .await
            .unwrap();
        let vault = FsVault::new(dir.path().to_path_buf());
        (dir, vault)
    }

    #[tokio::test]
    async fn test_resolve_file() {
        let (_dir, vault) = setup().await;
        let content = vault.resolve("notes/today.md").await.unwrap();
        assert!(content.contains("line one"));
    }

    #[tokio::test]
    async fn test_resolve_missing() {
        let (_dir, vault) = setup().await;
        let err = vault.resolve("missing.md").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_binary_degrades() {
        let (_dir, vault) = setup().await;
        let content = vault.resolve("image.png").await.unwrap();
        assert!(content.contains("not supported for reading"));
    }

    #[tokio::test]
    async fn test_rejects_escape() {
        let (_dir, vault) = setup().await;
        assert!(vault.resolve("../outside.md").await.is_err());
        assert!(vault.resolve("/etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_write_creates_parents() {
        let (_dir, vault) = setup().await;
        vault.write_full("new/dir/file.md", "content").await.unwrap();
        assert_eq!(vault.read_full("new/dir/file.md").await.unwrap(), "content");
    }

    #[tokio::test]
    async fn test_append_and_insert() {
        let (_dir, vault) = setup().await;

        vault
            .append_or_insert("notes/today.md", "line three", None)
            .await
            .unwrap();
        let content = vault.read_full("notes/today.md").await.unwrap();
        assert!(content.ends_with("line three"));

        vault
            .append_or_insert("notes/today.md", "inserted", Some(1))
            .await
            .unwrap();
        let content = vault.read_full("notes/today.md").await.unwrap();
        assert!(content.starts_with("inserted\n"));
    }

    #[tokio::test]
    async fn test_search_and_replace_counts() {
        let (_dir, vault) = setup().await;
        vault
            .write_full("notes/repeat.md", "foo bar foo baz foo")
            .await
            .unwrap();

        let count = vault
            .search_and_replace("notes/repeat.md", "foo", "qux")
            .await
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(
            vault.read_full("notes/repeat.md").await.unwrap(),
            "qux bar qux baz qux"
        );

        let none = vault
            .search_and_replace("notes/repeat.md", "absent", "x")
            .await
            .unwrap();
        assert_eq!(none, 0);
    }

    #[tokio::test]
    async fn test_list_tree() {
        let (_dir, vault) = setup().await;

        let shallow = vault.list_tree("notes", false).await.unwrap();
        assert!(shallow.contains(&"sub/".to_string()));
        assert!(shallow.contains(&"today.md".to_string()));
        assert!(!shallow.iter().any(|p| p.contains("deep.md")));

        let deep = vault.list_tree("notes", true).await.unwrap();
        assert!(deep.iter().any(|p| p == "sub/deep.md"));
    }

    #[tokio::test]
    async fn test_list_children_sorted() {
        let (_dir, vault) = setup().await;
        let children = vault.list_children("notes").await.unwrap();
        let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["sub", "today.md"]);
        assert!(children[0].is_container);
        assert!(!children[1].is_container);
    }
}
