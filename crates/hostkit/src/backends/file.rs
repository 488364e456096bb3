//! Local file tools: read, list and stat inside the sandbox roots.
//!
//! Paths arrive already resolved and contained by the validator. Nothing here
//! writes to disk.

use std::path::Path;

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use crate::backends::{Backend, BackendFuture, CallContext};
use crate::error::ExecError;
use crate::tools::args::NormalizedArgs;
use crate::tools::names::{BackendKind, ToolName};
use crate::tools::result::{
    DirEntry, DirectoryListing, EntryType, FileContent, FileInfo, Output,
};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    pub file_path: String,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListDirectoryArgs {
    pub directory_path: String,
    pub show_hidden: bool,
    pub max_items: usize,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FileInfoArgs {
    pub file_path: String,
}

pub struct FileBackend {
    max_read_bytes: u64,
}

impl FileBackend {
    pub fn new(max_read_bytes: u64) -> Self {
        Self { max_read_bytes }
    }

    async fn read_file(&self, args: ReadFileArgs) -> Result<Output, ExecError> {
        let path = Path::new(&args.file_path);
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| ExecError::io(format!("cannot read {}", path.display()), e))?;
        if meta.is_dir() {
            return Err(ExecError::Backend(format!(
                "{} is a directory; use list_directory instead",
                path.display()
            )));
        }
        if meta.len() > self.max_read_bytes {
            return Err(ExecError::Backend(format!(
                "{} is {} bytes, above the {}-byte read limit",
                path.display(),
                meta.len(),
                self.max_read_bytes
            )));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ExecError::io(format!("cannot read {}", path.display()), e))?;
        let text = String::from_utf8(bytes).map_err(|_| {
            ExecError::Backend(format!("{} is not valid UTF-8 text", path.display()))
        })?;

        let lines: Vec<&str> = text.lines().collect();
        let total = lines.len();
        let start = args.start_line.unwrap_or(1).max(1);
        let end = args.end_line.unwrap_or(total).min(total);

        let (content, returned) = if args.start_line.is_none() && args.end_line.is_none() {
            (text.clone(), total)
        } else if start > end {
            (String::new(), 0)
        } else {
            let window = &lines[start - 1..end];
            let mut content = window.join("\n");
            if !content.is_empty() {
                content.push('\n');
            }
            (content, window.len())
        };

        debug!(
            "[file] read {} ({returned}/{total} lines)",
            path.display()
        );
        Ok(Output::FileContent(FileContent {
            path: path.display().to_string(),
            content,
            total_lines: total,
            start_line: start,
            end_line: if returned == 0 { start.saturating_sub(1) } else { start + returned - 1 },
            lines_returned: returned,
        }))
    }

    async fn list_directory(&self, args: ListDirectoryArgs) -> Result<Output, ExecError> {
        let path = Path::new(&args.directory_path);
        let mut dir = tokio::fs::read_dir(path)
            .await
            .map_err(|e| ExecError::io(format!("cannot list {}", path.display()), e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| ExecError::io(format!("cannot list {}", path.display()), e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !args.show_hidden && name.starts_with('.') {
                continue;
            }
            let entry_type = match entry.file_type().await {
                Ok(ft) => EntryType::of(ft),
                Err(_) => EntryType::Other,
            };
            let size = match entry_type {
                EntryType::File => entry.metadata().await.ok().map(|m| m.len()),
                _ => None,
            };
            entries.push(DirEntry {
                name,
                entry_type,
                size,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let total = entries.len();
        let truncated = total > args.max_items;
        entries.truncate(args.max_items);

        Ok(Output::DirectoryListing(DirectoryListing {
            path: path.display().to_string(),
            entries,
            total,
            truncated,
        }))
    }

    async fn file_info(&self, args: FileInfoArgs) -> Result<Output, ExecError> {
        let path = Path::new(&args.file_path);
        let meta = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|e| ExecError::io(format!("cannot stat {}", path.display()), e))?;

        let modified = meta
            .modified()
            .ok()
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339());
        let (permissions, uid, gid) = ownership(&meta);

        Ok(Output::FileInfo(FileInfo {
            path: path.display().to_string(),
            entry_type: EntryType::of(meta.file_type()),
            size: meta.len(),
            permissions,
            readonly: meta.permissions().readonly(),
            uid,
            gid,
            modified,
        }))
    }
}

#[cfg(unix)]
fn ownership(meta: &std::fs::Metadata) -> (String, Option<u32>, Option<u32>) {
    use std::os::unix::fs::MetadataExt;
    (
        format!("{:o}", meta.mode() & 0o7777),
        Some(meta.uid()),
        Some(meta.gid()),
    )
}

#[cfg(not(unix))]
fn ownership(meta: &std::fs::Metadata) -> (String, Option<u32>, Option<u32>) {
    let mode = if meta.permissions().readonly() { "444" } else { "644" };
    (mode.to_string(), None, None)
}

impl Backend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn execute<'a>(
        &'a self,
        tool: ToolName,
        args: &'a NormalizedArgs,
        ctx: &'a CallContext,
    ) -> BackendFuture<'a> {
        Box::pin(async move {
            let work = async {
                match tool {
                    ToolName::ReadFile => self.read_file(args.parse()?).await,
                    ToolName::ListDirectory => self.list_directory(args.parse()?).await,
                    ToolName::GetFileInfo => self.file_info(args.parse()?).await,
                    other => Err(ExecError::Backend(format!(
                        "{other} is not a file tool"
                    ))),
                }
            };
            tokio::time::timeout_at(ctx.deadline(), work)
                .await
                .map_err(|_| ctx.timed_out())?
        })
    }
}
