//! File tools
//!
//! Read, write and list files on the local filesystem.

use std::path::PathBuf;

use anyhow::{bail, Context};
use schemars::JsonSchema;
use serde::Deserialize;

use crate::tools::descriptor::ToolDescriptor;
use crate::tools::registry::ToolError;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    /// Path to the file to read
    pub file_path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteFileArgs {
    /// Path to the file to write
    pub file_path: String,
    /// Content to write to the file
    pub content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListFilesArgs {
    /// Path to the directory
    pub directory: String,
}

/// Descriptors for `read_file`, `write_file` and `list_files`
pub fn file_tools() -> Result<Vec<ToolDescriptor>, ToolError> {
    Ok(vec![
        ToolDescriptor::from_typed_async("read_file", "Read contents from a file", read_file)?,
        ToolDescriptor::from_typed_async(
            "write_file",
            "Write content to a file, creating parent directories",
            write_file,
        )?,
        ToolDescriptor::from_typed_async(
            "list_files",
            "List files and directories in a directory",
            list_files,
        )?,
    ])
}

/// Expand a leading `~` to the home directory
fn expand_path(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(raw)),
        None => PathBuf::from(raw),
    }
}

async fn read_file(args: ReadFileArgs) -> anyhow::Result<String> {
    let path = expand_path(&args.file_path);
    let metadata = tokio::fs::metadata(&path)
        .await
        .with_context(|| format!("file '{}' does not exist", args.file_path))?;
    if !metadata.is_file() {
        bail!("'{}' is not a file", args.file_path);
    }

    tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading '{}'", args.file_path))
}

async fn write_file(args: WriteFileArgs) -> anyhow::Result<String> {
    let path = expand_path(&args.file_path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating directory '{}'", parent.display()))?;
    }

    tokio::fs::write(&path, &args.content)
        .await
        .with_context(|| format!("writing '{}'", args.file_path))?;

    Ok(format!(
        "Wrote {} characters to '{}'",
        args.content.chars().count(),
        args.file_path
    ))
}

async fn list_files(args: ListFilesArgs) -> anyhow::Result<String> {
    let path = expand_path(&args.directory);
    let metadata = tokio::fs::metadata(&path)
        .await
        .with_context(|| format!("directory '{}' does not exist", args.directory))?;
    if !metadata.is_dir() {
        bail!("'{}' is not a directory", args.directory);
    }

    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(&path)
        .await
        .with_context(|| format!("listing '{}'", args.directory))?;
    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let meta = entry.metadata().await?;
        let line = if meta.is_dir() {
            format!("[DIR] {}", name)
        } else {
            format!("[FILE] {} ({} bytes)", name, meta.len())
        };
        entries.push((name, line));
    }

    if entries.is_empty() {
        return Ok("Directory is empty".to_string());
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries
        .into_iter()
        .map(|(_, line)| line)
        .collect::<Vec<_>>()
        .join("\n"))
}
