//! Filesystem tools: list, read, write, search.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use super::ToolError;

#[derive(Debug, Deserialize)]
pub(super) struct ListFilesParams {
    path: String,
    #[serde(default)]
    recursive: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct ReadFileParams {
    path: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WriteFileParams {
    path: String,
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SearchFilesParams {
    path: String,
    pattern: String,
    #[serde(default)]
    content_search: bool,
}

#[derive(Debug, Serialize)]
struct FileEntry {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: &'static str,
    size: Option<u64>,
}

/// List a directory (optionally recursive), or describe a single file.
pub(super) async fn list_files(params: ListFilesParams) -> Result<Value, ToolError> {
    let target = expand_user(&params.path);
    if !target.exists() {
        return Err(ToolError::failed(format!(
            "Path does not exist: {}",
            params.path
        )));
    }

    if target.is_file() {
        let size = file_size(&target).await;
        return Ok(json!({
            "type": "file",
            "path": target.display().to_string(),
            "size": size,
        }));
    }

    let max_depth = if params.recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();
    for entry in WalkDir::new(&target)
        .min_depth(1)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let is_file = entry.file_type().is_file();
        files.push(FileEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            path: entry.path().display().to_string(),
            kind: if is_file { "file" } else { "directory" },
            size: if is_file {
                entry.metadata().ok().map(|m| m.len())
            } else {
                None
            },
        });
    }

    Ok(json!({ "count": files.len(), "files": files }))
}

/// Read a UTF-8 text file.
pub(super) async fn read_file(params: ReadFileParams) -> Result<Value, ToolError> {
    check_encoding(params.encoding.as_deref())?;
    let target = expand_user(&params.path);
    if !target.exists() {
        return Err(ToolError::failed(format!(
            "File does not exist: {}",
            params.path
        )));
    }
    if !target.is_file() {
        return Err(ToolError::failed(format!(
            "Path is not a file: {}",
            params.path
        )));
    }

    let content = tokio::fs::read_to_string(&target)
        .await
        .map_err(|err| ToolError::failed(err.to_string()))?;
    Ok(json!({
        "path": target.display().to_string(),
        "size": content.len(),
        "content": content,
    }))
}

/// Write a UTF-8 text file, creating parent directories as needed.
pub(super) async fn write_file(params: WriteFileParams) -> Result<Value, ToolError> {
    check_encoding(params.encoding.as_deref())?;
    let target = expand_user(&params.path);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| ToolError::failed(err.to_string()))?;
    }
    tokio::fs::write(&target, params.content.as_bytes())
        .await
        .map_err(|err| ToolError::failed(err.to_string()))?;

    Ok(json!({
        "path": target.display().to_string(),
        "size": params.content.len(),
        "success": true,
    }))
}

/// Search a tree by file-name glob, or by file content when
/// `content_search` is set.
pub(super) async fn search_files(params: SearchFilesParams) -> Result<Value, ToolError> {
    let target = expand_user(&params.path);
    if !target.exists() {
        return Err(ToolError::failed(format!(
            "Path does not exist: {}",
            params.path
        )));
    }

    let matcher = glob_to_regex(&params.pattern)?;
    let mut results = Vec::new();
    for entry in WalkDir::new(&target)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if params.content_search {
            if !entry.file_type().is_file() {
                continue;
            }
            // Unreadable or non-text files are skipped, not errors.
            match tokio::fs::read_to_string(entry.path()).await {
                Ok(content) if content.contains(&params.pattern) => {
                    results.push(entry.path().display().to_string());
                }
                Ok(_) => {}
                Err(err) => debug!(path = %entry.path().display(), %err, "skipping unreadable file"),
            }
        } else if matcher.is_match(&entry.file_name().to_string_lossy()) {
            results.push(entry.path().display().to_string());
        }
    }

    Ok(json!({ "count": results.len(), "results": results }))
}

/// Expand a leading `~` to the user's home directory.
fn expand_user(path: &str) -> PathBuf {
    if let Some(home) = home_dir() {
        if path == "~" {
            return PathBuf::from(home);
        }
        if let Some(rest) = path.strip_prefix("~/") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(path)
}

fn home_dir() -> Option<String> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()
        .filter(|s| !s.is_empty())
}

async fn file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

/// Only UTF-8 is supported; anything else is a per-request error.
fn check_encoding(encoding: Option<&str>) -> Result<(), ToolError> {
    match encoding {
        None => Ok(()),
        Some(enc) => {
            let normalized = enc.trim().to_ascii_lowercase().replace('_', "-");
            if normalized == "utf-8" || normalized == "utf8" {
                Ok(())
            } else {
                Err(ToolError::failed(format!("Unsupported encoding: {enc}")))
            }
        }
    }
}

/// Translate a file-name glob (`*`, `?`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, ToolError> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            _ => expr.push_str(&regex::escape(&ch.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr)
        .map_err(|_| ToolError::failed(format!("Invalid search pattern: {pattern}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Fresh scratch directory for one test; removed by the OS eventually,
    /// and unique so tests never collide.
    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tether-{tag}-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_list_files_flat_and_recursive() {
        let dir = scratch_dir("list");
        fs::write(dir.join("a.txt"), "alpha").unwrap();
        fs::create_dir(dir.join("sub")).unwrap();
        fs::write(dir.join("sub").join("b.txt"), "beta").unwrap();

        let flat = list_files(ListFilesParams {
            path: dir.display().to_string(),
            recursive: false,
        })
        .await
        .unwrap();
        assert_eq!(flat["count"], 2);

        let deep = list_files(ListFilesParams {
            path: dir.display().to_string(),
            recursive: true,
        })
        .await
        .unwrap();
        assert_eq!(deep["count"], 3);

        let names: Vec<&str> = deep["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"a.txt"));
        assert!(names.contains(&"sub"));
        assert!(names.contains(&"b.txt"));
    }

    #[tokio::test]
    async fn test_list_files_is_idempotent() {
        let dir = scratch_dir("idem");
        fs::write(dir.join("one"), "1").unwrap();
        fs::write(dir.join("two"), "2").unwrap();

        let params = || ListFilesParams {
            path: dir.display().to_string(),
            recursive: false,
        };
        let first = list_files(params()).await.unwrap();
        let second = list_files(params()).await.unwrap();
        assert_eq!(first["count"], second["count"]);

        let names = |v: &Value| {
            let mut names: Vec<String> = v["files"]
                .as_array()
                .unwrap()
                .iter()
                .map(|f| f["name"].as_str().unwrap().to_string())
                .collect();
            names.sort();
            names
        };
        assert_eq!(names(&first), names(&second));
    }

    #[tokio::test]
    async fn test_list_files_single_file_descriptor() {
        let dir = scratch_dir("single");
        fs::write(dir.join("f.bin"), b"12345").unwrap();

        let result = list_files(ListFilesParams {
            path: dir.join("f.bin").display().to_string(),
            recursive: false,
        })
        .await
        .unwrap();
        assert_eq!(result["type"], "file");
        assert_eq!(result["size"], 5);
    }

    #[tokio::test]
    async fn test_list_files_missing_path() {
        let err = list_files(ListFilesParams {
            path: "/nonexistent/tether-test".into(),
            recursive: false,
        })
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Path does not exist: /nonexistent/tether-test"
        );
    }

    #[tokio::test]
    async fn test_read_file_missing() {
        let err = read_file(ReadFileParams {
            path: "/nonexistent".into(),
            encoding: None,
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "File does not exist: /nonexistent");
    }

    #[tokio::test]
    async fn test_read_file_directory_rejected() {
        let dir = scratch_dir("readdir");
        let err = read_file(ReadFileParams {
            path: dir.display().to_string(),
            encoding: None,
        })
        .await
        .unwrap_err();
        assert!(err.to_string().starts_with("Path is not a file:"));
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let dir = scratch_dir("roundtrip");
        let path = dir.join("nested").join("note.txt").display().to_string();
        let content = "line one\nline two — ünïcôde\n";

        let written = write_file(WriteFileParams {
            path: path.clone(),
            content: content.to_string(),
            encoding: Some("utf-8".into()),
        })
        .await
        .unwrap();
        assert_eq!(written["success"], true);
        assert_eq!(written["size"], content.len());

        let read = read_file(ReadFileParams {
            path,
            encoding: None,
        })
        .await
        .unwrap();
        assert_eq!(read["content"].as_str().unwrap(), content);
    }

    #[tokio::test]
    async fn test_unsupported_encoding() {
        let err = read_file(ReadFileParams {
            path: "/etc/hosts".into(),
            encoding: Some("latin-1".into()),
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported encoding: latin-1");
    }

    #[tokio::test]
    async fn test_search_files_by_name() {
        let dir = scratch_dir("search");
        fs::write(dir.join("main.rs"), "fn main() {}").unwrap();
        fs::write(dir.join("lib.rs"), "pub fn lib() {}").unwrap();
        fs::write(dir.join("notes.md"), "readme").unwrap();

        let result = search_files(SearchFilesParams {
            path: dir.display().to_string(),
            pattern: "*.rs".into(),
            content_search: false,
        })
        .await
        .unwrap();
        assert_eq!(result["count"], 2);
    }

    #[tokio::test]
    async fn test_search_files_by_content() {
        let dir = scratch_dir("content");
        fs::write(dir.join("hit.txt"), "the needle is here").unwrap();
        fs::write(dir.join("miss.txt"), "nothing to see").unwrap();

        let result = search_files(SearchFilesParams {
            path: dir.display().to_string(),
            pattern: "needle".into(),
            content_search: true,
        })
        .await
        .unwrap();
        assert_eq!(result["count"], 1);
        let hit = result["results"][0].as_str().unwrap();
        assert!(hit.ends_with("hit.txt"));
    }

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("*.tar.gz").unwrap();
        assert!(re.is_match("backup.tar.gz"));
        assert!(!re.is_match("backup.tar"));
        // Dots are literal, not regex wildcards.
        assert!(!re.is_match("backupXtarXgz"));

        let q = glob_to_regex("file?.txt").unwrap();
        assert!(q.is_match("file1.txt"));
        assert!(!q.is_match("file12.txt"));
    }

    #[test]
    fn test_expand_user() {
        if let Some(home) = home_dir() {
            assert_eq!(expand_user("~/x"), Path::new(&home).join("x"));
        }
        assert_eq!(expand_user("/abs/x"), PathBuf::from("/abs/x"));
    }
}
