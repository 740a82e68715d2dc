//! `local_files` entry point: plain file I/O relative to the process
//! working directory, plus `getdate`.

use super::decode_args;
use crate::directive::Arguments;
use crate::skills::{ArgKind, Capability, CapabilityError, CapabilityTable, LoadContext, ParamSpec};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

const DEFAULT_EXCLUDES: &[&str] = &["mcp_server", ".venv", "__pycache__", ".git", "target"];
const NO_FILES: &str = "no files found";

pub fn local_files(_ctx: &LoadContext) -> CapabilityTable {
    let mut table = CapabilityTable::new();
    table.insert("read_local_file".to_string(), Arc::new(ReadLocalFile::new()));
    table.insert("write_local_file".to_string(), Arc::new(WriteLocalFile::new()));
    table.insert("append_to_local_file".to_string(), Arc::new(AppendToLocalFile::new()));
    table.insert("create_local_dir".to_string(), Arc::new(CreateLocalDir::new()));
    table.insert("list_files_recursive".to_string(), Arc::new(ListFilesRecursive::new()));
    table.insert("getdate".to_string(), Arc::new(GetDate));
    table
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn io_error(what: &str, path: &str, e: std::io::Error) -> CapabilityError {
    CapabilityError::execution(format!("failed to {} '{}': {}", what, path, e))
}

#[derive(Debug, Deserialize)]
struct PathArgs {
    file_path: String,
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    file_path: String,
    content: String,
}

struct ReadLocalFile {
    params: Vec<ParamSpec>,
}

impl ReadLocalFile {
    fn new() -> Self {
        Self {
            params: vec![ParamSpec::required("file_path", ArgKind::String)],
        }
    }
}

#[async_trait]
impl Capability for ReadLocalFile {
    fn description(&self) -> &str {
        "Read a UTF-8 text file and return its contents"
    }

    fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    async fn invoke(&self, args: Arguments) -> Result<String, CapabilityError> {
        let args: PathArgs = decode_args("read_local_file", args)?;
        if Path::new(&args.file_path).is_dir() {
            return Err(CapabilityError::execution(format!(
                "'{}' is a directory; use list_files_recursive to see its contents",
                args.file_path
            )));
        }
        tokio::fs::read_to_string(&args.file_path)
            .await
            .map_err(|e| io_error("read", &args.file_path, e))
    }
}

struct WriteLocalFile {
    params: Vec<ParamSpec>,
}

impl WriteLocalFile {
    fn new() -> Self {
        Self {
            params: vec![
                ParamSpec::required("file_path", ArgKind::String),
                ParamSpec::required("content", ArgKind::String),
            ],
        }
    }
}

#[async_trait]
impl Capability for WriteLocalFile {
    fn description(&self) -> &str {
        "Write text to a file, creating parent directories and replacing existing content"
    }

    fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    async fn invoke(&self, args: Arguments) -> Result<String, CapabilityError> {
        let args: WriteArgs = decode_args("write_local_file", args)?;
        let path = Path::new(&args.file_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create directory for", &args.file_path, e))?;
        }
        tokio::fs::write(path, &args.content)
            .await
            .map_err(|e| io_error("write", &args.file_path, e))?;
        Ok(format!(
            "wrote {} bytes to {}",
            args.content.len(),
            absolute(path).display()
        ))
    }
}

struct AppendToLocalFile {
    params: Vec<ParamSpec>,
}

impl AppendToLocalFile {
    fn new() -> Self {
        Self {
            params: vec![
                ParamSpec::required("file_path", ArgKind::String),
                ParamSpec::required("content", ArgKind::String),
            ],
        }
    }
}

#[async_trait]
impl Capability for AppendToLocalFile {
    fn description(&self) -> &str {
        "Append text to the end of an existing file"
    }

    fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    async fn invoke(&self, args: Arguments) -> Result<String, CapabilityError> {
        use tokio::io::AsyncWriteExt;

        let args: WriteArgs = decode_args("append_to_local_file", args)?;
        let path = Path::new(&args.file_path);
        if !path.is_file() {
            return Err(CapabilityError::execution(format!(
                "file '{}' does not exist; use write_local_file to create it",
                args.file_path
            )));
        }

        let text = if args.content.starts_with('\n') {
            args.content
        } else {
            format!("\n{}", args.content)
        };

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .await
            .map_err(|e| io_error("open", &args.file_path, e))?;
        file.write_all(text.as_bytes())
            .await
            .map_err(|e| io_error("append to", &args.file_path, e))?;
        file.flush()
            .await
            .map_err(|e| io_error("append to", &args.file_path, e))?;

        Ok(format!("appended to {}", absolute(path).display()))
    }
}

struct CreateLocalDir {
    params: Vec<ParamSpec>,
}

impl CreateLocalDir {
    fn new() -> Self {
        Self {
            params: vec![ParamSpec::required("file_path", ArgKind::String)],
        }
    }
}

#[async_trait]
impl Capability for CreateLocalDir {
    fn description(&self) -> &str {
        "Create the parent directory of a file path (the file itself is not created)"
    }

    fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    async fn invoke(&self, args: Arguments) -> Result<String, CapabilityError> {
        let args: PathArgs = decode_args("create_local_dir", args)?;
        let path = Path::new(&args.file_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create directory for", &args.file_path, e))?;
        }
        Ok(format!("prepared {}", absolute(path).display()))
    }
}

#[derive(Debug, Deserialize)]
struct ListArgs {
    #[serde(default = "default_directory")]
    directory: String,
    #[serde(default)]
    exclude_dirs: Option<Vec<String>>,
    #[serde(default, alias = "exsion")]
    extension: Option<String>,
}

fn default_directory() -> String {
    ".".to_string()
}

struct ListFilesRecursive {
    params: Vec<ParamSpec>,
}

impl ListFilesRecursive {
    fn new() -> Self {
        Self {
            params: vec![
                ParamSpec::optional("directory", ArgKind::String),
                ParamSpec::optional("exclude_dirs", ArgKind::List),
                ParamSpec::optional("extension", ArgKind::String),
            ],
        }
    }
}

/// Relative paths of files under `root` ending in `extension`, sorted
fn list_files(root: &Path, excludes: &[String], extension: &str) -> Result<Vec<String>, String> {
    if !root.is_dir() {
        return Err(format!("'{}' is not a directory", root.display()));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !entry.file_type().is_dir()
            || !excludes
                .iter()
                .any(|ex| entry.file_name().to_str() == Some(ex.as_str()))
    });

    for entry in walker {
        let entry = entry.map_err(|e| e.to_string())?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name.ends_with(extension) {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            files.push(rel.to_string_lossy().into_owned());
        }
    }

    files.sort();
    Ok(files)
}

#[async_trait]
impl Capability for ListFilesRecursive {
    fn description(&self) -> &str {
        "List files under a directory recursively (args: directory, exclude_dirs, extension)"
    }

    fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    async fn invoke(&self, args: Arguments) -> Result<String, CapabilityError> {
        let args: ListArgs = decode_args("list_files_recursive", args)?;
        let excludes = args
            .exclude_dirs
            .unwrap_or_else(|| DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect());
        let extension = args.extension.unwrap_or_default();
        let root = PathBuf::from(&args.directory);

        let files = tokio::task::spawn_blocking(move || list_files(&root, &excludes, &extension))
            .await
            .map_err(|e| CapabilityError::execution(format!("directory scan aborted: {}", e)))?
            .map_err(|e| CapabilityError::execution(format!("failed to scan directory: {}", e)))?;

        if files.is_empty() {
            Ok(NO_FILES.to_string())
        } else {
            Ok(files.join("\n"))
        }
    }
}

struct GetDate;

#[async_trait]
impl Capability for GetDate {
    fn description(&self) -> &str {
        "Today's date as YYYY-MM-DD"
    }

    async fn invoke(&self, _args: Arguments) -> Result<String, CapabilityError> {
        Ok(chrono::Local::now().format("%Y-%m-%d").to_string())
    }
}
