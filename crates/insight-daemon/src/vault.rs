//! Directory-walking vault reader.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use insight_pipeline::{PipelineError, VaultSource};
use insight_types::RawDocument;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

const NOTE_EXTENSIONS: &[&str] = &["md", "markdown"];

/// Every markdown note under a directory, in file-name order.
///
/// Hidden files and directories (`.obsidian`, `.git`, `.insights`, ...) are
/// skipped. Paths are reported relative to the root with `/` separators and
/// YAML front matter is removed from the content.
#[derive(Debug, Clone)]
pub struct DirVault {
    root: PathBuf,
}

impl DirVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    async fn load(&self, path: PathBuf) -> Result<RawDocument, PipelineError> {
        let rel = self.relative(&path);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| PipelineError::Vault(format!("{}: {}", rel, e)))?;
        let modified = tokio::fs::metadata(&path)
            .await
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        debug!(path = %rel, bytes = content.len(), "Read note");
        Ok(RawDocument::new(rel, strip_front_matter(&content), modified))
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

fn is_note(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| NOTE_EXTENSIONS.iter().any(|n| ext.eq_ignore_ascii_case(n)))
        .unwrap_or(false)
}

impl VaultSource for DirVault {
    fn documents(&self) -> BoxStream<'_, Result<RawDocument, PipelineError>> {
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

        stream::iter(walker)
            .filter_map(|entry| async move {
                match entry {
                    Ok(e) if e.file_type().is_file() && is_note(e.path()) => Some(Ok(e.into_path())),
                    Ok(_) => None,
                    Err(e) => Some(Err(PipelineError::Vault(e.to_string()))),
                }
            })
            .then(move |path| async move {
                match path {
                    Ok(path) => self.load(path).await,
                    Err(e) => Err(e),
                }
            })
            .boxed()
    }
}

/// Content after a leading `---` YAML block; unchanged if there is none or
/// it is never closed.
pub fn strip_front_matter(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("---") else {
        return content;
    };
    let Some(rest) = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n')) else {
        return content;
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        let marker = line.trim_end_matches(['\r', '\n']);
        if marker == "---" || marker == "..." {
            return &rest[offset..];
        }
    }
    content
}
