//! Filesystem primitives
//!
//! Every public operation validates its path arguments through
//! [`PathPolicy`] before touching the disk. The write primitive
//! ([`FileService::commit_write`]) trusts its caller to have done so, since
//! it is only reachable through the write managers.

use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use similar::TextDiff;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{BridgeError, Result};
use crate::path_policy::PathPolicy;
use crate::policy::PolicyConfig;

const MAX_LIST_DEPTH: usize = 8;
const MAX_LIST_ENTRIES: usize = 2_000;
const MAX_SEARCH_DEPTH: usize = 32;
const MAX_MATCH_LINE_CHARS: usize = 400;
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// How a write lands on the target file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Overwrite,
    Append,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Overwrite => "overwrite",
            WriteMode::Append => "append",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub path: String,
    pub entries: Vec<DirEntry>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    pub path: String,
    pub content: String,
    /// Size of the whole file on disk
    pub size: u64,
    /// Hash of the whole file, usable as an expected hash for writes
    pub sha256: String,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMatch {
    pub path: String,
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub matches: Vec<SearchMatch>,
    pub files_scanned: usize,
    pub truncated: bool,
}

/// What a search looks for
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub max_matches: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MkdirResult {
    pub path: String,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveResult {
    pub path: String,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveResult {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChmodResult {
    pub path: String,
    pub mode: String,
}

/// The right-hand side of a diff
#[derive(Debug, Clone)]
pub enum DiffAgainst {
    Content(String),
    Path(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    pub path: String,
    pub diff: String,
    pub changed: bool,
}

/// Result of the low-level write primitive
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutcome {
    pub path: String,
    pub sha256: String,
    pub bytes_written: u64,
    pub backup_path: Option<String>,
    /// The file did not exist before this write
    pub created: bool,
    /// Parent directories this write had to create, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created_dirs: Vec<String>,
}

/// Policy-checked filesystem operations
#[derive(Debug)]
pub struct FileService {
    policy: Arc<PolicyConfig>,
    paths: Arc<PathPolicy>,
    backup_dir: PathBuf,
}

impl FileService {
    pub fn new(policy: Arc<PolicyConfig>, paths: Arc<PathPolicy>, backup_dir: PathBuf) -> Self {
        Self {
            policy,
            paths,
            backup_dir,
        }
    }

    pub fn path_policy(&self) -> &PathPolicy {
        &self.paths
    }

    /// List a directory, `depth` levels deep
    pub async fn ls(&self, raw: &str, depth: usize) -> Result<Listing> {
        let root = self.paths.assert_allowed(raw)?;
        let meta = fs::metadata(&root)
            .await
            .map_err(|e| BridgeError::from_io(&root, e))?;
        if !meta.is_dir() {
            return Err(BridgeError::InvalidInput(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let paths = self.paths.clone();
        let walk_root = root.clone();
        let depth = depth.clamp(1, MAX_LIST_DEPTH);
        let (entries, truncated) =
            tokio::task::spawn_blocking(move || list_entries(&paths, &walk_root, depth))
                .await
                .map_err(|e| BridgeError::Internal(format!("listing task failed: {}", e)))?;

        Ok(Listing {
            path: root.to_string_lossy().to_string(),
            entries,
            truncated,
        })
    }

    pub async fn mkdir(&self, raw: &str, recursive: bool) -> Result<MkdirResult> {
        let path = self.paths.assert_allowed(raw)?;
        let display = path.to_string_lossy().to_string();

        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() && recursive => {
                return Ok(MkdirResult {
                    path: display,
                    created: false,
                })
            }
            Ok(_) => return Err(BridgeError::Conflict(format!("{} already exists", display))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(BridgeError::from_io(&path, e)),
        }

        let created = if recursive {
            fs::create_dir_all(&path).await
        } else {
            fs::create_dir(&path).await
        };
        created.map_err(|e| BridgeError::from_io(&path, e))?;

        Ok(MkdirResult {
            path: display,
            created: true,
        })
    }

    /// Read a file, truncating at the policy's file size cap
    pub async fn read(&self, raw: &str) -> Result<FileContent> {
        let path = self.paths.assert_allowed(raw)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| BridgeError::from_io(&path, e))?;
        if !meta.is_file() {
            return Err(BridgeError::InvalidInput(format!(
                "{} is not a file",
                path.display()
            )));
        }

        let max = self.policy.limits.max_file_bytes;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| BridgeError::from_io(&path, e))?;
        let mut buf = Vec::new();
        file.take(max).read_to_end(&mut buf).await?;

        let truncated = meta.len() > max;
        let sha256 = if truncated {
            sha256_of(&path).await?.unwrap_or_default()
        } else {
            hex::encode(Sha256::digest(&buf))
        };

        Ok(FileContent {
            path: path.to_string_lossy().to_string(),
            content: String::from_utf8_lossy(&buf).into_owned(),
            size: meta.len(),
            sha256,
            truncated,
        })
    }

    /// Search file contents below `raw` (or inside `raw` if it's a file)
    pub async fn search(&self, raw: &str, query: &SearchQuery) -> Result<SearchResult> {
        if query.query.is_empty() {
            return Err(BridgeError::InvalidInput("search query is empty".to_string()));
        }
        let root = self.paths.assert_allowed(raw)?;
        if fs::metadata(&root).await.is_err() {
            return Err(BridgeError::NotFound(root.to_string_lossy().to_string()));
        }

        let pattern = if query.regex {
            query.query.clone()
        } else {
            regex::escape(&query.query)
        };
        let matcher = RegexBuilder::new(&pattern)
            .case_insensitive(!query.case_sensitive)
            .build()
            .map_err(|e| BridgeError::InvalidInput(format!("invalid search pattern: {}", e)))?;

        let cap = self.policy.limits.max_search_matches;
        let limit = query.max_matches.map_or(cap, |m| m.clamp(1, cap));
        let max_file_bytes = self.policy.limits.max_file_bytes;
        let paths = self.paths.clone();

        tokio::task::spawn_blocking(move || {
            search_files(&paths, &root, &matcher, limit, max_file_bytes)
        })
        .await
        .map_err(|e| BridgeError::Internal(format!("search task failed: {}", e)))
    }

    pub async fn rm(&self, raw: &str, recursive: bool) -> Result<RemoveResult> {
        if !self.policy.mutations.rm_enabled {
            return Err(BridgeError::Forbidden("fs.rm is disabled by policy".to_string()));
        }
        let path = self.paths.assert_allowed(raw)?;
        if self.paths.is_root(&path) {
            return Err(BridgeError::PolicyBlocked(format!(
                "refusing to remove allowed root {}",
                path.display()
            )));
        }

        let meta = fs::symlink_metadata(&path)
            .await
            .map_err(|e| BridgeError::from_io(&path, e))?;
        let kind = kind_of(&meta.file_type());

        if meta.is_dir() {
            if recursive {
                self.assert_tree_allowed(&path).await?;
                fs::remove_dir_all(&path)
                    .await
                    .map_err(|e| BridgeError::from_io(&path, e))?;
            } else {
                let mut dir = fs::read_dir(&path)
                    .await
                    .map_err(|e| BridgeError::from_io(&path, e))?;
                if dir.next_entry().await?.is_some() {
                    return Err(BridgeError::Conflict(format!(
                        "{} is not empty; pass recursive to remove it",
                        path.display()
                    )));
                }
                fs::remove_dir(&path)
                    .await
                    .map_err(|e| BridgeError::from_io(&path, e))?;
            }
        } else {
            fs::remove_file(&path)
                .await
                .map_err(|e| BridgeError::from_io(&path, e))?;
        }

        debug!("Removed {}", path.display());
        Ok(RemoveResult {
            path: path.to_string_lossy().to_string(),
            kind,
        })
    }

    pub async fn mv(&self, from_raw: &str, to_raw: &str, overwrite: bool) -> Result<MoveResult> {
        if !self.policy.mutations.mv_enabled {
            return Err(BridgeError::Forbidden("fs.mv is disabled by policy".to_string()));
        }
        let from = self.paths.assert_allowed(from_raw)?;
        let to = self.paths.assert_allowed(to_raw)?;
        if self.paths.is_root(&from) {
            return Err(BridgeError::PolicyBlocked(format!(
                "refusing to move allowed root {}",
                from.display()
            )));
        }

        let from_meta = fs::symlink_metadata(&from)
            .await
            .map_err(|e| BridgeError::from_io(&from, e))?;
        if from_meta.is_dir() {
            self.assert_tree_allowed(&from).await?;
        }

        match fs::symlink_metadata(&to).await {
            Ok(meta) if meta.is_dir() => {
                return Err(BridgeError::Conflict(format!(
                    "destination {} is a directory",
                    to.display()
                )))
            }
            Ok(_) if !overwrite => {
                return Err(BridgeError::Conflict(format!(
                    "destination {} already exists",
                    to.display()
                )))
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(BridgeError::from_io(&to, e)),
        }

        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BridgeError::from_io(parent, e))?;
        }
        fs::rename(&from, &to)
            .await
            .map_err(|e| BridgeError::from_io(&from, e))?;

        debug!("Moved {} -> {}", from.display(), to.display());
        Ok(MoveResult {
            from: from.to_string_lossy().to_string(),
            to: to.to_string_lossy().to_string(),
        })
    }

    pub async fn chmod(&self, raw: &str, mode: &str) -> Result<ChmodResult> {
        if !self.policy.mutations.chmod_enabled {
            return Err(BridgeError::Forbidden("fs.chmod is disabled by policy".to_string()));
        }
        let path = self.paths.assert_allowed(raw)?;
        let bits = parse_mode(mode)?;
        set_mode(&path, bits).await?;

        Ok(ChmodResult {
            path: path.to_string_lossy().to_string(),
            mode: format!("{:o}", bits),
        })
    }

    /// Unified diff of a file against new content or another file
    pub async fn diff(&self, raw: &str, against: DiffAgainst) -> Result<DiffResult> {
        let path = self.paths.assert_allowed(raw)?;
        let current = self.read_text_or_empty(&path).await?;

        let (other, other_label) = match against {
            DiffAgainst::Content(content) => {
                if content.len() as u64 > self.policy.limits.max_file_bytes {
                    return Err(BridgeError::LimitExceeded(
                        "diff content exceeds max_file_bytes".to_string(),
                    ));
                }
                (content, format!("b/{}", path.display()))
            }
            DiffAgainst::Path(other_raw) => {
                let other_path = self.paths.assert_allowed(&other_raw)?;
                let text = self.read_text_or_empty(&other_path).await?;
                (text, format!("b/{}", other_path.display()))
            }
        };

        let diff = TextDiff::from_lines(&current, &other)
            .unified_diff()
            .context_radius(3)
            .header(&format!("a/{}", path.display()), &other_label)
            .to_string();

        Ok(DiffResult {
            path: path.to_string_lossy().to_string(),
            changed: current != other,
            diff,
        })
    }

    /// Write `content` to an already-validated path.
    ///
    /// Overwrites go through a sibling temp file and a rename, so readers
    /// never observe a half-written file. With `backup` set and the target
    /// present, a copy is taken first.
    pub async fn commit_write(
        &self,
        path: &Path,
        mode: WriteMode,
        content: &[u8],
        backup: bool,
    ) -> Result<WriteOutcome> {
        let existing = match fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => {
                return Err(BridgeError::InvalidInput(format!(
                    "{} is a directory",
                    path.display()
                )))
            }
            Ok(meta) => Some(meta),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(BridgeError::from_io(path, e)),
        };

        let mut created_dirs = Vec::new();
        if let Some(parent) = path.parent() {
            created_dirs = missing_ancestors(parent).await;
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BridgeError::from_io(parent, e))?;
        }

        let backup_path = match (&existing, backup) {
            (Some(_), true) => Some(self.backup(path).await?),
            _ => None,
        };

        match mode {
            WriteMode::Overwrite => {
                let tmp = temp_sibling(path);
                fs::write(&tmp, content)
                    .await
                    .map_err(|e| BridgeError::from_io(&tmp, e))?;
                if let Some(meta) = &existing {
                    fs::set_permissions(&tmp, meta.permissions()).await.ok();
                }
                if let Err(e) = fs::rename(&tmp, path).await {
                    fs::remove_file(&tmp).await.ok();
                    return Err(BridgeError::from_io(path, e));
                }
            }
            WriteMode::Append => {
                let mut options = fs::OpenOptions::new();
                options.create(true).append(true);
                #[cfg(unix)]
                options.custom_flags(libc::O_NOFOLLOW);
                let mut file = options
                    .open(path)
                    .await
                    .map_err(|e| BridgeError::from_io(path, e))?;
                file.write_all(content).await?;
                file.flush().await?;
            }
        }

        let sha256 = sha256_of(path).await?.unwrap_or_default();
        debug!("Wrote {} bytes to {} ({})", content.len(), path.display(), mode.as_str());

        Ok(WriteOutcome {
            path: path.to_string_lossy().to_string(),
            sha256,
            bytes_written: content.len() as u64,
            backup_path: backup_path.map(|p| p.to_string_lossy().to_string()),
            created: existing.is_none(),
            created_dirs: created_dirs
                .iter()
                .map(|d| d.to_string_lossy().to_string())
                .collect(),
        })
    }

    /// Copy `path` into the backup directory
    pub async fn backup(&self, path: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(|e| BridgeError::from_io(&self.backup_dir, e))?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let id = Uuid::new_v4().simple().to_string();
        let dest = self.backup_dir.join(format!(
            "{}-{}-{}.bak",
            Utc::now().format("%Y%m%dT%H%M%S"),
            &id[..8],
            name
        ));

        fs::copy(path, &dest)
            .await
            .map_err(|e| BridgeError::from_io(path, e))?;
        Ok(dest)
    }

    /// Put a backup copy back over `target`
    pub async fn restore_backup(&self, backup: &Path, target: &Path) -> Result<()> {
        fs::copy(backup, target)
            .await
            .map_err(|e| BridgeError::from_io(target, e))?;
        Ok(())
    }

    async fn read_text_or_empty(&self, path: &Path) -> Result<String> {
        match fs::metadata(path).await {
            Ok(meta) if meta.len() > self.policy.limits.max_file_bytes => {
                Err(BridgeError::LimitExceeded(format!(
                    "{} exceeds max_file_bytes",
                    path.display()
                )))
            }
            Ok(_) => {
                let bytes = fs::read(path)
                    .await
                    .map_err(|e| BridgeError::from_io(path, e))?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(BridgeError::from_io(path, e)),
        }
    }

    /// Refuse recursive operations on trees that contain denied paths
    async fn assert_tree_allowed(&self, root: &Path) -> Result<()> {
        let paths = self.paths.clone();
        let walk_root = root.to_path_buf();
        let denied = tokio::task::spawn_blocking(move || first_denied(&paths, &walk_root))
            .await
            .map_err(|e| BridgeError::Internal(format!("tree check failed: {}", e)))?;

        match denied {
            Some(path) => Err(BridgeError::PolicyBlocked(format!(
                "{} contains protected path {}",
                root.display(),
                path
            ))),
            None => Ok(()),
        }
    }
}

/// Streaming SHA-256 of a file; `None` when it doesn't exist
pub async fn sha256_of(path: &Path) -> Result<Option<String>> {
    let mut file = match fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(BridgeError::from_io(path, e)),
    };

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Some(hex::encode(hasher.finalize())))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Ancestors of `dir` that do not exist yet, outermost first
async fn missing_ancestors(dir: &Path) -> Vec<PathBuf> {
    let mut missing = Vec::new();
    for ancestor in dir.ancestors() {
        if fs::symlink_metadata(ancestor).await.is_ok() {
            break;
        }
        missing.push(ancestor.to_path_buf());
    }
    missing.reverse();
    missing
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let id = Uuid::new_v4().simple().to_string();
    path.with_file_name(format!(".{}.{}.tmp", name, &id[..8]))
}

fn kind_of(file_type: &std::fs::FileType) -> EntryKind {
    if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_dir() {
        EntryKind::Dir
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    }
}

fn list_entries(paths: &PathPolicy, root: &Path, depth: usize) -> (Vec<DirEntry>, bool) {
    let mut entries = Vec::new();
    let mut truncated = false;

    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(depth)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let Ok(entry) = entry else { continue };
        let path = entry.path().to_string_lossy().to_string();

        if !paths.is_allowed(&path) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }
        if entries.len() >= MAX_LIST_ENTRIES {
            truncated = true;
            break;
        }

        let meta = entry.metadata().ok();
        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            path,
            kind: kind_of(&entry.file_type()),
            size: meta.as_ref().map_or(0, |m| m.len()),
            modified: meta
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from),
        });
    }

    (entries, truncated)
}

fn search_files(
    paths: &PathPolicy,
    root: &Path,
    matcher: &regex::Regex,
    limit: usize,
    max_file_bytes: u64,
) -> SearchResult {
    let mut matches = Vec::new();
    let mut files_scanned = 0;
    let mut truncated = false;

    let mut walker = WalkDir::new(root)
        .max_depth(MAX_SEARCH_DEPTH)
        .sort_by_file_name()
        .into_iter();

    'files: while let Some(entry) = walker.next() {
        let Ok(entry) = entry else { continue };
        let path = entry.path().to_string_lossy().to_string();

        if !paths.is_allowed(&path) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.metadata().map_or(true, |m| m.len() > max_file_bytes) {
            continue;
        }

        let Ok(bytes) = std::fs::read(entry.path()) else { continue };
        let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
        if sniff.contains(&0) {
            continue;
        }
        let Ok(text) = std::str::from_utf8(&bytes) else { continue };
        files_scanned += 1;

        for (index, line) in text.lines().enumerate() {
            if !matcher.is_match(line) {
                continue;
            }
            if matches.len() >= limit {
                truncated = true;
                break 'files;
            }
            matches.push(SearchMatch {
                path: path.clone(),
                line: index + 1,
                text: line.chars().take(MAX_MATCH_LINE_CHARS).collect(),
            });
        }
    }

    SearchResult {
        matches,
        files_scanned,
        truncated,
    }
}

fn first_denied(paths: &PathPolicy, root: &Path) -> Option<String> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.path().to_string_lossy().to_string())
        .find(|p| !paths.is_allowed(p))
}

fn parse_mode(mode: &str) -> Result<u32> {
    let digits = mode.trim();
    let digits = digits.strip_prefix("0o").unwrap_or(digits);
    let bits = u32::from_str_radix(digits, 8)
        .map_err(|_| BridgeError::InvalidInput(format!("invalid octal mode '{}'", mode)))?;
    if bits > 0o7777 {
        return Err(BridgeError::InvalidInput(format!("mode '{}' out of range", mode)));
    }
    Ok(bits)
}

#[cfg(unix)]
async fn set_mode(path: &Path, bits: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(bits))
        .await
        .map_err(|e| BridgeError::from_io(path, e))
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _bits: u32) -> Result<()> {
    Err(BridgeError::NotSupported(
        "fs.chmod is only available on Unix hosts".to_string(),
    ))
}
