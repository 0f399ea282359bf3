//! 文件工具集（Coder Agent）
//!
//! Workspace 绑定工作目录：相对路径相对工作目录解析，绝对路径与 `~/` 按原样使用。
//! 工具：read_file / write_file / list_directory / search_files / delete_file /
//! create_directory / get_file_info。delete_file 标记为 destructive，执行前经安全策略分类。

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::core::ToolError;
use crate::tools::registry::ToolResult;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::Tool;

/// 递归遍历时跳过的目录
const SKIP_DIRS: &[&str] = &["node_modules", "target", ".git"];

/// 单次列举 / 搜索的最大条目数
const MAX_ENTRIES: usize = 500;

/// 工作目录：解析工具给出的路径
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = path.trim();
        if path.is_empty() || path == "." {
            return self.root.clone();
        }
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> ToolError {
    ToolError::execution(format!("{action} '{}': {e}", path.display()))
}

fn format_time(t: std::io::Result<SystemTime>) -> Value {
    t.ok()
        .map(|t| json!(DateTime::<Utc>::from(t).to_rfc3339()))
        .unwrap_or(Value::Null)
}

fn is_skipped(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    entry.depth() > 0 && (name.starts_with('.') || SKIP_DIRS.contains(&name.as_ref()))
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct FilePathArgs {
    /// File path, relative to the workspace or absolute
    file_path: String,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct WriteFileArgs {
    /// File path, relative to the workspace or absolute
    file_path: String,
    /// Full content to write (replaces the file)
    content: String,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ListDirectoryArgs {
    /// Directory path
    dir_path: String,
    /// Include subdirectories
    #[serde(default)]
    recursive: bool,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct SearchFilesArgs {
    /// Directory to search from
    dir_path: String,
    /// File name glob, e.g. `*.rs`
    pattern: String,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct DirPathArgs {
    /// Directory path
    dir_path: String,
}

/// read_file：读取文本文件
pub struct ReadFileTool {
    ws: Workspace,
}

impl ReadFileTool {
    pub fn new(ws: Workspace) -> Self {
        Self { ws }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<FilePathArgs>()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let args: FilePathArgs = parse_args(args)?;
        let path = self.ws.resolve(&args.file_path);
        tracing::info!(path = %path.display(), "read_file");
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_error("Failed to read", &path, e))?;
        Ok(json!({
            "path": path.display().to_string(),
            "size": content.len(),
            "content": content,
        }))
    }
}

/// write_file：写入（覆盖）文件，自动创建父目录
pub struct WriteFileTool {
    ws: Workspace,
}

impl WriteFileTool {
    pub fn new(ws: Workspace) -> Self {
        Self { ws }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories and overwriting any existing file."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<WriteFileArgs>()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let args: WriteFileArgs = parse_args(args)?;
        let path = self.ws.resolve(&args.file_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("Failed to create directory", parent, e))?;
        }
        tokio::fs::write(&path, args.content.as_bytes())
            .await
            .map_err(|e| io_error("Failed to write", &path, e))?;
        tracing::info!(path = %path.display(), bytes = args.content.len(), "write_file");
        Ok(json!({
            "path": path.display().to_string(),
            "bytesWritten": args.content.len(),
        }))
    }
}

/// list_directory：列出目录，可递归
pub struct ListDirectoryTool {
    ws: Workspace,
}

impl ListDirectoryTool {
    pub fn new(ws: Workspace) -> Self {
        Self { ws }
    }
}

fn list_entries(dir: &Path, recursive: bool) -> Result<(Vec<Value>, bool), ToolError> {
    let meta = std::fs::metadata(dir).map_err(|e| io_error("Failed to list", dir, e))?;
    if !meta.is_dir() {
        return Err(ToolError::execution(format!("Not a directory: {}", dir.display())));
    }
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut entries = Vec::new();
    let mut truncated = false;
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !recursive || !is_skipped(e));
    for entry in walker.filter_map(|e| e.ok()) {
        if entries.len() >= MAX_ENTRIES {
            truncated = true;
            break;
        }
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let is_dir = entry.file_type().is_dir();
        entries.push(json!({
            "name": rel.display().to_string(),
            "type": if is_dir { "directory" } else { "file" },
            "size": if is_dir { Value::Null } else { json!(entry.metadata().map(|m| m.len()).unwrap_or(0)) },
        }));
    }
    Ok((entries, truncated))
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List files and directories in a directory. Set recursive=true to include subdirectories."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ListDirectoryArgs>()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let args: ListDirectoryArgs = parse_args(args)?;
        let dir = self.ws.resolve(&args.dir_path);
        tracing::info!(path = %dir.display(), recursive = args.recursive, "list_directory");
        let dir_clone = dir.clone();
        let (entries, truncated) =
            tokio::task::spawn_blocking(move || list_entries(&dir_clone, args.recursive))
                .await
                .map_err(|e| ToolError::execution(e.to_string()))??;
        Ok(json!({
            "path": dir.display().to_string(),
            "count": entries.len(),
            "truncated": truncated,
            "entries": entries,
        }))
    }
}

/// search_files：按文件名 glob 递归搜索
pub struct SearchFilesTool {
    ws: Workspace,
}

impl SearchFilesTool {
    pub fn new(ws: Workspace) -> Self {
        Self { ws }
    }
}

fn search_by_name(dir: &Path, pattern: &glob::Pattern) -> Vec<String> {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .filter_map(|e| e.ok())
        .filter(|e| pattern.matches(&e.file_name().to_string_lossy()))
        .take(MAX_ENTRIES)
        .map(|e| e.path().display().to_string())
        .collect()
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Recursively search for files whose name matches a glob pattern (e.g. \"*.rs\")."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<SearchFilesArgs>()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let args: SearchFilesArgs = parse_args(args)?;
        let pattern = glob::Pattern::new(&args.pattern)
            .map_err(|e| ToolError::validation("pattern", e.to_string()))?;
        let dir = self.ws.resolve(&args.dir_path);
        tracing::info!(path = %dir.display(), pattern = %args.pattern, "search_files");
        let dir_clone = dir.clone();
        let matches = tokio::task::spawn_blocking(move || search_by_name(&dir_clone, &pattern))
            .await
            .map_err(|e| ToolError::execution(e.to_string()))?;
        Ok(json!({
            "path": dir.display().to_string(),
            "pattern": args.pattern,
            "count": matches.len(),
            "matches": matches,
        }))
    }
}

/// delete_file：删除单个文件（不删除目录）
pub struct DeleteFileTool {
    ws: Workspace,
}

impl DeleteFileTool {
    pub fn new(ws: Workspace) -> Self {
        Self { ws }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a single file. Directories are not removed."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<FilePathArgs>()
    }

    fn is_destructive(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let args: FilePathArgs = parse_args(args)?;
        let path = self.ws.resolve(&args.file_path);
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| io_error("Failed to delete", &path, e))?;
        tracing::info!(path = %path.display(), "delete_file");
        Ok(json!({ "path": path.display().to_string(), "deleted": true }))
    }
}

/// create_directory：递归创建目录
pub struct CreateDirectoryTool {
    ws: Workspace,
}

impl CreateDirectoryTool {
    pub fn new(ws: Workspace) -> Self {
        Self { ws }
    }
}

#[async_trait]
impl Tool for CreateDirectoryTool {
    fn name(&self) -> &str {
        "create_directory"
    }

    fn description(&self) -> &str {
        "Create a directory, including any missing parents."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<DirPathArgs>()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let args: DirPathArgs = parse_args(args)?;
        let path = self.ws.resolve(&args.dir_path);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| io_error("Failed to create directory", &path, e))?;
        Ok(json!({ "path": path.display().to_string(), "created": true }))
    }
}

/// get_file_info：大小、类型、时间戳
pub struct GetFileInfoTool {
    ws: Workspace,
}

impl GetFileInfoTool {
    pub fn new(ws: Workspace) -> Self {
        Self { ws }
    }
}

#[async_trait]
impl Tool for GetFileInfoTool {
    fn name(&self) -> &str {
        "get_file_info"
    }

    fn description(&self) -> &str {
        "Get metadata for a file or directory: size, type, created and modified times."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<FilePathArgs>()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let args: FilePathArgs = parse_args(args)?;
        let path = self.ws.resolve(&args.file_path);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| io_error("Failed to stat", &path, e))?;
        Ok(json!({
            "path": path.display().to_string(),
            "size": meta.len(),
            "isFile": meta.is_file(),
            "isDirectory": meta.is_dir(),
            "readonly": meta.permissions().readonly(),
            "created": format_time(meta.created()),
            "modified": format_time(meta.modified()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ws() -> (TempDir, Workspace) {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        (dir, ws)
    }

    #[tokio::test]
    async fn write_then_read_relative_path() {
        let (_dir, ws) = ws();
        WriteFileTool::new(ws.clone())
            .execute(json!({ "filePath": "notes/a.txt", "content": "hello" }))
            .await
            .unwrap();
        let out = ReadFileTool::new(ws.clone())
            .execute(json!({ "filePath": "notes/a.txt" }))
            .await
            .unwrap();
        assert_eq!(out["content"], "hello");
        assert_eq!(out["size"], 5);
    }

    #[tokio::test]
    async fn list_directory_recursive_skips_hidden() {
        let (dir, ws) = ws();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::write(dir.path().join("src/nested/lib.rs"), "x").unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();

        let flat = ListDirectoryTool::new(ws.clone())
            .execute(json!({ "dirPath": "." }))
            .await
            .unwrap();
        let names: Vec<&str> = flat["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"src"));
        assert!(!names.iter().any(|n| n.contains("lib.rs")));

        let deep = ListDirectoryTool::new(ws)
            .execute(json!({ "dirPath": ".", "recursive": true }))
            .await
            .unwrap();
        let text = deep["entries"].to_string();
        assert!(text.contains("lib.rs"));
        assert!(!text.contains("HEAD"));
    }

    #[tokio::test]
    async fn list_missing_directory_fails() {
        let (_dir, ws) = ws();
        let err = ListDirectoryTool::new(ws)
            .execute(json!({ "dirPath": "nope" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailure { .. }));
    }

    #[tokio::test]
    async fn search_files_by_glob() {
        let (dir, ws) = ws();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/main.rs"), "").unwrap();
        std::fs::write(dir.path().join("a/readme.md"), "").unwrap();
        let out = SearchFilesTool::new(ws)
            .execute(json!({ "dirPath": ".", "pattern": "*.rs" }))
            .await
            .unwrap();
        assert_eq!(out["count"], 1);
        assert!(out["matches"][0].as_str().unwrap().ends_with("main.rs"));
    }

    #[tokio::test]
    async fn delete_create_and_info() {
        let (dir, ws) = ws();
        CreateDirectoryTool::new(ws.clone())
            .execute(json!({ "dirPath": "x/y" }))
            .await
            .unwrap();
        assert!(dir.path().join("x/y").is_dir());

        std::fs::write(dir.path().join("x/f.txt"), "abc").unwrap();
        let info = GetFileInfoTool::new(ws.clone())
            .execute(json!({ "filePath": "x/f.txt" }))
            .await
            .unwrap();
        assert_eq!(info["size"], 3);
        assert_eq!(info["isFile"], true);

        DeleteFileTool::new(ws)
            .execute(json!({ "filePath": "x/f.txt" }))
            .await
            .unwrap();
        assert!(!dir.path().join("x/f.txt").exists());
    }
}
