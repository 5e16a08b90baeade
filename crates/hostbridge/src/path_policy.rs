//! Path policy enforcement
//!
//! Paths arrive from page content in whatever shape the chat produced:
//! quoted, `~`-relative, Windows drive paths on a WSL host, WSL mount paths
//! on a Windows host. Everything is normalized to one absolute form for the
//! runtime's flavor, then checked against the allowed roots and deny globs.

use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};
use crate::policy::PolicyConfig;

/// Path grammar of the runtime the daemon serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathFlavor {
    Posix,
    Windows,
}

impl PathFlavor {
    pub fn native() -> Self {
        if cfg!(windows) {
            PathFlavor::Windows
        } else {
            PathFlavor::Posix
        }
    }

    fn separator(&self) -> char {
        match self {
            PathFlavor::Posix => '/',
            PathFlavor::Windows => '\\',
        }
    }
}

/// Links followed while resolving one dangling chain
const MAX_LINK_HOPS: usize = 40;

const DENY_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compiled roots, deny globs and site allowlist
#[derive(Debug, Clone)]
pub struct PathPolicy {
    flavor: PathFlavor,
    home: Option<String>,
    cwd: String,
    roots: Vec<String>,
    deny: Vec<Pattern>,
    sites: Vec<String>,
    resolve_links: bool,
}

impl PathPolicy {
    pub fn new(policy: &PolicyConfig) -> Result<Self> {
        Self::with_flavor(policy, PathFlavor::native())
    }

    /// Build for an explicit flavor (lets both grammars be exercised on one host)
    pub fn with_flavor(policy: &PolicyConfig, flavor: PathFlavor) -> Result<Self> {
        let native = flavor == PathFlavor::native();
        let home = if native {
            dirs::home_dir().map(|h| h.to_string_lossy().to_string())
        } else {
            None
        };
        let cwd = match (native, std::env::current_dir()) {
            (true, Ok(dir)) => dir.to_string_lossy().to_string(),
            _ => match flavor {
                PathFlavor::Posix => "/".to_string(),
                PathFlavor::Windows => "C:\\".to_string(),
            },
        };

        let deny = policy
            .deny
            .iter()
            .map(|p| {
                Pattern::new(p)
                    .map_err(|e| BridgeError::InvalidInput(format!("deny pattern '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut built = Self {
            flavor,
            home,
            cwd,
            roots: Vec::new(),
            deny,
            sites: policy.sites.iter().map(|s| normalize_site(s)).collect(),
            resolve_links: cfg!(unix) && flavor == PathFlavor::Posix,
        };
        built.set_roots(&policy.roots)?;
        Ok(built)
    }

    /// Replace the home directory used for `~` expansion
    pub fn with_home(mut self, home: &str, roots: &[String]) -> Result<Self> {
        self.home = Some(home.to_string());
        self.set_roots(roots)?;
        Ok(self)
    }

    fn set_roots(&mut self, roots: &[String]) -> Result<()> {
        let mut normalized = Vec::with_capacity(roots.len());
        for root in roots {
            let root = self.normalize_input_path(root)?;
            normalized.push(self.resolve(&root)?);
        }
        self.roots = normalized;
        Ok(())
    }

    pub fn flavor(&self) -> PathFlavor {
        self.flavor
    }

    /// Normalized allowed roots
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Turn caller input into an absolute path in this runtime's grammar
    pub fn normalize_input_path(&self, raw: &str) -> Result<String> {
        let trimmed = strip_quotes(raw.trim()).trim();
        if trimmed.is_empty() {
            return Err(BridgeError::InvalidInput("path is empty".to_string()));
        }

        let expanded = self.expand_home(trimmed);

        let normalized = match self.flavor {
            PathFlavor::Posix => {
                let path = match split_drive(&expanded) {
                    Some((drive, rest)) => format!(
                        "/mnt/{}/{}",
                        drive.to_ascii_lowercase(),
                        rest.replace('\\', "/")
                    ),
                    None => expanded,
                };
                let absolute = if path.starts_with('/') {
                    path
                } else {
                    format!("{}/{}", self.cwd, path)
                };
                lexical_posix(&absolute)
            }
            PathFlavor::Windows => {
                let path = match split_wsl_mount(&expanded) {
                    Some((drive, rest)) => format!(
                        "{}:\\{}",
                        drive.to_ascii_uppercase(),
                        rest.replace('/', "\\")
                    ),
                    None => expanded.replace('/', "\\"),
                };
                let absolute = if split_drive(&path).is_some() || path.starts_with("\\\\") {
                    path
                } else if path.starts_with('\\') {
                    match split_drive(&self.cwd) {
                        Some((drive, _)) => format!("{}:{}", drive, path),
                        None => format!("C:{}", path),
                    }
                } else {
                    format!("{}\\{}", self.cwd, path)
                };
                lexical_windows(&absolute)
            }
        };

        Ok(normalized)
    }

    /// Normalized form of `raw` with symlinks resolved; no root check
    pub fn resolve_input_path(&self, raw: &str) -> Result<String> {
        let normalized = self.normalize_input_path(raw)?;
        self.resolve(&normalized)
    }

    /// Validate that `raw` lives under an allowed root and isn't denied
    pub fn assert_allowed(&self, raw: &str) -> Result<PathBuf> {
        let normalized = self.normalize_input_path(raw)?;
        let resolved = self.resolve(&normalized)?;

        let mut matched = false;
        for root in &self.roots {
            if let Some(relative) = self.relative_to(&resolved, root) {
                matched = true;
                if relative.is_empty() {
                    continue;
                }
                if let Some(pattern) = self
                    .deny
                    .iter()
                    .find(|p| p.matches_with(&relative, DENY_MATCH))
                {
                    return Err(BridgeError::PolicyBlocked(format!(
                        "{} matches deny pattern '{}'",
                        resolved,
                        pattern.as_str()
                    )));
                }
            }
        }

        if !matched {
            return Err(BridgeError::PolicyBlocked(format!(
                "{} is outside the allowed roots",
                resolved
            )));
        }

        Ok(PathBuf::from(resolved))
    }

    pub fn is_allowed(&self, raw: &str) -> bool {
        self.assert_allowed(raw).is_ok()
    }

    /// Whether `path` is exactly one of the allowed roots
    pub fn is_root(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.roots
            .iter()
            .any(|root| self.relative_to(&path, root).is_some_and(|rel| rel.is_empty()))
    }

    /// Whether normalized `path` equals or descends from normalized `dir`
    pub fn is_within(&self, path: &str, dir: &str) -> bool {
        self.relative_to(path, dir).is_some()
    }

    pub fn assert_site_allowed(&self, site: &str) -> Result<()> {
        let site = normalize_site(site);
        if !site.is_empty() && self.sites.iter().any(|s| *s == site) {
            Ok(())
        } else {
            Err(BridgeError::Forbidden(format!("site '{}' is not allowlisted", site)))
        }
    }

    fn expand_home(&self, path: &str) -> String {
        let Some(home) = &self.home else {
            return path.to_string();
        };
        if path == "~" {
            return home.clone();
        }
        match path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
            Some(rest) => format!(
                "{}{}{}",
                home.trim_end_matches(['/', '\\']),
                self.flavor.separator(),
                rest
            ),
            None => path.to_string(),
        }
    }

    /// Follow symlinks through the deepest existing ancestor. Dangling links
    /// resolve to their target.
    fn resolve(&self, normalized: &str) -> Result<String> {
        if !self.resolve_links {
            return Ok(normalized.to_string());
        }
        resolve_links(normalized, 0)
    }

    /// Root-relative path with `/` separators, if `path` is inside `root`
    fn relative_to(&self, path: &str, root: &str) -> Option<String> {
        let path_parts = components(path, self.flavor);
        let root_parts = components(root, self.flavor);
        if root_parts.len() > path_parts.len() {
            return None;
        }

        let same = root_parts.iter().zip(&path_parts).all(|(r, p)| match self.flavor {
            PathFlavor::Posix => r == p,
            PathFlavor::Windows => r.eq_ignore_ascii_case(p),
        });
        if !same {
            return None;
        }

        Some(path_parts[root_parts.len()..].join("/"))
    }
}

/// Lowercased host part of a site or origin
pub fn normalize_site(site: &str) -> String {
    let site = site.trim().to_ascii_lowercase();
    let without_scheme = site.split("://").last().unwrap_or("");
    without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .to_string()
}

fn resolve_links(normalized: &str, hops: usize) -> Result<String> {
    let path = Path::new(normalized);
    for ancestor in path.ancestors() {
        let Ok(meta) = std::fs::symlink_metadata(ancestor) else {
            continue;
        };
        let rest = path.strip_prefix(ancestor).unwrap_or(Path::new(""));

        let base = if meta.file_type().is_symlink() && !ancestor.exists() {
            if hops >= MAX_LINK_HOPS {
                return Err(BridgeError::PolicyBlocked(format!(
                    "{} has too many levels of symbolic links",
                    normalized
                )));
            }
            let target = std::fs::read_link(ancestor)
                .map_err(|e| BridgeError::from_io(ancestor, e))?;
            let dir = match ancestor.parent() {
                Some(parent) => parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf()),
                None => PathBuf::from("/"),
            };
            let target = lexical_posix(&dir.join(target).to_string_lossy());
            PathBuf::from(resolve_links(&target, hops + 1)?)
        } else {
            match ancestor.canonicalize() {
                Ok(canonical) => canonical,
                Err(_) => break,
            }
        };

        let joined = if rest.as_os_str().is_empty() {
            base
        } else {
            base.join(rest)
        };
        return Ok(joined.to_string_lossy().to_string());
    }
    Ok(normalized.to_string())
}

fn strip_quotes(s: &str) -> &str {
    for quote in ['"', '\'', '`'] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// `C:\rest` or `C:/rest` (or bare `C:`) split into drive letter and rest
fn split_drive(s: &str) -> Option<(char, &str)> {
    let bytes = s.as_bytes();
    if bytes.len() < 2 || !bytes[0].is_ascii_alphabetic() || bytes[1] != b':' {
        return None;
    }
    match bytes.get(2) {
        None => Some((bytes[0] as char, "")),
        Some(b'\\') | Some(b'/') => Some((bytes[0] as char, &s[3..])),
        _ => None,
    }
}

/// `/mnt/c/rest` (or bare `/mnt/c`) split into drive letter and rest
fn split_wsl_mount(s: &str) -> Option<(char, &str)> {
    let rest = s.strip_prefix("/mnt/")?;
    let bytes = rest.as_bytes();
    if bytes.is_empty() || !bytes[0].is_ascii_alphabetic() {
        return None;
    }
    match bytes.get(1) {
        None => Some((bytes[0] as char, "")),
        Some(b'/') => Some((bytes[0] as char, &rest[2..])),
        _ => None,
    }
}

fn components(path: &str, flavor: PathFlavor) -> Vec<&str> {
    let split: Vec<&str> = match flavor {
        PathFlavor::Posix => path.split('/').collect(),
        PathFlavor::Windows => path.split('\\').collect(),
    };
    split.into_iter().filter(|c| !c.is_empty()).collect()
}

fn collapse<'a>(parts: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::new();
    for part in parts {
        match part {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn lexical_posix(path: &str) -> String {
    let parts = collapse(path.split('/'));
    format!("/{}", parts.join("/"))
}

fn lexical_windows(path: &str) -> String {
    if let Some(unc) = path.strip_prefix("\\\\") {
        let mut parts = unc.split('\\').filter(|p| !p.is_empty());
        let server = parts.next().unwrap_or("");
        let share = parts.next().unwrap_or("");
        let rest = collapse(parts);
        let mut out = format!("\\\\{}\\{}", server, share);
        for part in rest {
            out.push('\\');
            out.push_str(part);
        }
        return out;
    }

    let (drive, rest) = match split_drive(path) {
        Some((drive, rest)) => (drive.to_ascii_uppercase(), rest),
        None => ('C', path),
    };
    let parts = collapse(rest.split('\\'));
    format!("{}:\\{}", drive, parts.join("\\"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_with(roots: &[&str]) -> PolicyConfig {
        PolicyConfig {
            roots: roots.iter().map(|r| r.to_string()).collect(),
            ..PolicyConfig::default()
        }
    }

    fn posix(roots: &[&str]) -> PathPolicy {
        PathPolicy::with_flavor(&policy_with(roots), PathFlavor::Posix).unwrap()
    }

    fn windows(roots: &[&str]) -> PathPolicy {
        PathPolicy::with_flavor(&policy_with(roots), PathFlavor::Windows).unwrap()
    }

    #[test]
    fn test_drive_path_becomes_wsl_mount_on_posix() {
        let p = posix(&[]);
        assert_eq!(
            p.normalize_input_path(r"C:\Users\dev\app\file.txt").unwrap(),
            "/mnt/c/Users/dev/app/file.txt"
        );
        assert_eq!(
            p.normalize_input_path("D:/data/x").unwrap(),
            "/mnt/d/data/x"
        );
    }

    #[test]
    fn test_wsl_mount_becomes_drive_path_on_windows() {
        let w = windows(&[]);
        assert_eq!(
            w.normalize_input_path("/mnt/c/Users/dev/app/file.txt").unwrap(),
            r"C:\Users\dev\app\file.txt"
        );
    }

    #[test]
    fn test_drive_roundtrip() {
        let original = r"C:\Users\dev\app\file.txt";
        let wsl = posix(&[]).normalize_input_path(original).unwrap();
        let back = windows(&[]).normalize_input_path(&wsl).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_trims_and_unquotes() {
        let p = posix(&[]);
        assert_eq!(p.normalize_input_path("  \"/srv/app/a b.txt\" ").unwrap(), "/srv/app/a b.txt");
        assert_eq!(p.normalize_input_path("'/srv/x'").unwrap(), "/srv/x");
    }

    #[test]
    fn test_empty_path_is_invalid() {
        let err = posix(&[]).normalize_input_path("   \"\" ").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidInput(_)));
    }

    #[test]
    fn test_home_expansion() {
        let p = posix(&[])
            .with_home("/home/dev", &["/home/dev/projects".to_string()])
            .unwrap();
        assert_eq!(p.normalize_input_path("~/notes.md").unwrap(), "/home/dev/notes.md");
        assert!(p.is_allowed("~/projects/app/main.rs"));
    }

    #[test]
    fn test_dot_segments_collapse() {
        let p = posix(&["/srv/app"]);
        assert_eq!(p.normalize_input_path("/srv/app/../../etc/passwd").unwrap(), "/etc/passwd");
        let err = p.assert_allowed("/srv/app/../../etc/passwd").unwrap_err();
        assert!(matches!(err, BridgeError::PolicyBlocked(_)));
    }

    #[test]
    fn test_outside_roots_blocked() {
        let p = posix(&["/srv/app"]);
        for path in ["/etc/passwd", "/srv/application/x", "/srv", "/"] {
            let err = p.assert_allowed(path).unwrap_err();
            assert!(matches!(err, BridgeError::PolicyBlocked(_)), "{}", path);
        }
    }

    #[test]
    fn test_denied_inside_root_blocked() {
        let p = posix(&["/srv/app"]);
        for path in [
            "/srv/app/.env",
            "/srv/app/config/.env",
            "/srv/app/.git/config",
            "/srv/app/.git",
            "/srv/app/certs/server.pem",
            "/srv/app/home/.ssh/id_rsa",
        ] {
            let err = p.assert_allowed(path).unwrap_err();
            assert!(matches!(err, BridgeError::PolicyBlocked(_)), "{}", path);
        }
    }

    #[test]
    fn test_allowed_inside_root() {
        let p = posix(&["/srv/app"]);
        for path in ["/srv/app", "/srv/app/src/main.rs", "/srv/app/.github/workflows/ci.yml"] {
            assert_eq!(p.assert_allowed(path).unwrap(), PathBuf::from(path));
        }
    }

    #[test]
    fn test_deny_is_case_sensitive() {
        let p = posix(&["/srv/app"]);
        assert!(p.is_allowed("/srv/app/CERT.PEM"));
        assert!(!p.is_allowed("/srv/app/cert.pem"));
    }

    #[test]
    fn test_every_matching_root_checks_deny() {
        let mut config = policy_with(&["/srv", "/srv/app"]);
        config.deny = vec!["secret/**".to_string()];
        let p = PathPolicy::with_flavor(&config, PathFlavor::Posix).unwrap();
        assert!(!p.is_allowed("/srv/app/secret/key"));
        assert!(!p.is_allowed("/srv/secret/key"));
        assert!(p.is_allowed("/srv/app/public/key"));
    }

    #[test]
    fn test_windows_roots_case_insensitive() {
        let w = windows(&[r"C:\Users\dev"]);
        assert!(w.is_allowed(r"c:\users\DEV\app\main.rs"));
        assert!(w.is_allowed("/mnt/c/Users/dev/app/main.rs"));
        assert!(!w.is_allowed(r"D:\Users\dev\app"));
    }

    #[test]
    fn test_is_root() {
        let p = posix(&["/srv/app"]);
        assert!(p.is_root(Path::new("/srv/app")));
        assert!(!p.is_root(Path::new("/srv/app/src")));
    }

    #[test]
    fn test_site_allowlist_case_insensitive() {
        let p = posix(&[]);
        assert!(p.assert_site_allowed("Claude.AI").is_ok());
        assert!(p.assert_site_allowed("https://chatgpt.com/c/123").is_ok());
        let err = p.assert_site_allowed("evil.example").unwrap_err();
        assert!(matches!(err, BridgeError::Forbidden(_)));
    }

    #[test]
    fn test_invalid_deny_pattern_rejected() {
        let mut config = policy_with(&["/srv"]);
        config.deny = vec!["a**b".to_string()];
        assert!(PathPolicy::with_flavor(&config, PathFlavor::Posix).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_blocked() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "x").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        let p = posix(&[root.path().to_str().unwrap()]);
        let escaped = root.path().join("link/secret.txt");
        assert!(!p.is_allowed(escaped.to_str().unwrap()));
        assert!(p.is_allowed(root.path().join("new-file.txt").to_str().unwrap()));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_escape_blocked() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let planted = outside.path().join("planted.txt");
        std::os::unix::fs::symlink(&planted, root.path().join("link")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("gone"), root.path().join("dirlink"))
            .unwrap();

        let p = posix(&[root.path().to_str().unwrap()]);
        let err = p
            .assert_allowed(root.path().join("link").to_str().unwrap())
            .unwrap_err();
        assert!(matches!(err, BridgeError::PolicyBlocked(_)));
        assert!(!p.is_allowed(root.path().join("dirlink/a/b.txt").to_str().unwrap()));
        assert!(!planted.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_inside_root_resolves_to_target() {
        let root = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("real.txt", root.path().join("alias")).unwrap();

        let p = posix(&[root.path().to_str().unwrap()]);
        let resolved = p
            .assert_allowed(root.path().join("alias").to_str().unwrap())
            .unwrap();
        assert_eq!(resolved.file_name().unwrap(), "real.txt");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_blocked() {
        let root = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(root.path().join("b"), root.path().join("a")).unwrap();
        std::os::unix::fs::symlink(root.path().join("a"), root.path().join("b")).unwrap();

        let p = posix(&[root.path().to_str().unwrap()]);
        assert!(!p.is_allowed(root.path().join("a").to_str().unwrap()));
    }

    #[test]
    fn test_rooted_windows_path_takes_cwd_drive() {
        let mut w = windows(&[]);
        w.cwd = r"D:\work".to_string();
        assert_eq!(w.normalize_input_path(r"\dir\f.txt").unwrap(), r"D:\dir\f.txt");

        w.cwd = "\u{e9}t\u{e9}".to_string();
        assert_eq!(w.normalize_input_path(r"\dir\f.txt").unwrap(), r"C:\dir\f.txt");
    }
}
