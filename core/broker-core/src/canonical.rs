//! Document name normalization for consistent cache keys.
//!
//! Handles the quirks of spreadsheet paths:
//! - Case-insensitive names (`C:/Data/A.xlsx` and `c:/data/a.xlsx` are one document)
//! - Backslash and forward slash separators
//! - `.` and `..` components
//! - Drive-letter vs. network-share spellings of the same location
//!
//! Nothing here touches the filesystem. A name canonicalizes the same way
//! whether or not a document exists behind it.

use std::env;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static DRIVE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z]):/*").unwrap());
static UNC_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^//[^/]+/[^/]+").unwrap());

/// Turns a document name into its cache key.
///
/// Relative names are resolved against the current directory first, then the
/// result is normalized and lowercased.
///
/// # Examples
///
/// ```ignore
/// canonicalize("C:\\Data\\Sub\\..\\Book.XLSX") -> "c:/data/book.xlsx"
/// canonicalize("//Server/Share/./a.xlsx")     -> "//server/share/a.xlsx"
/// ```
pub fn canonicalize(name: &str) -> String {
    normalize(&absolutize(name)).to_lowercase()
}

/// Normalizes separators and `.`/`..` components, keeping the original case.
pub fn normalize(name: &str) -> String {
    let slashed = name.replace('\\', "/");

    let (prefix, rest) = if let Some(caps) = DRIVE_PREFIX.captures(&slashed) {
        let whole = caps.get(0).map_or(0, |m| m.end());
        (format!("{}:/", &caps[1]), &slashed[whole..])
    } else if let Some(rest) = slashed.strip_prefix("//") {
        ("//".to_string(), rest)
    } else if let Some(rest) = slashed.strip_prefix('/') {
        ("/".to_string(), rest)
    } else {
        (String::new(), slashed.as_str())
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in rest.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if prefix.is_empty() {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    format!("{}{}", prefix, parts.join("/"))
}

/// Returns `name` unchanged when it is already absolute, otherwise joins it
/// onto the current directory.
pub fn absolutize(name: &str) -> String {
    if is_absolute(name) {
        return name.to_string();
    }
    match env::current_dir() {
        Ok(dir) => format!("{}/{}", dir.to_string_lossy().replace('\\', "/"), name),
        Err(_) => name.to_string(),
    }
}

/// Absolute means rooted (`/x`), a network share (`//host/share`), or a drive (`c:`).
pub fn is_absolute(name: &str) -> bool {
    let slashed = name.replace('\\', "/");
    slashed.starts_with('/') || DRIVE_PREFIX.is_match(&slashed)
}

/// Lowercased last component, the name the application itself uses to tell
/// open documents apart.
pub fn base_name(name: &str) -> String {
    let normalized = normalize(name);
    normalized
        .rsplit('/')
        .next()
        .unwrap_or(normalized.as_str())
        .to_lowercase()
}

/// Whether a canonical key points into a network share.
pub fn is_unc(key: &str) -> bool {
    UNC_PREFIX.is_match(key)
}

/// One mapped network drive, e.g. `Z:` -> `\\server\share`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveMapping {
    pub drive: String,
    pub unc: String,
}

/// Best-effort translation between drive-letter and network-share spellings.
///
/// Primary cache correctness never depends on this; it only runs when a key
/// has no entries of its own.
#[derive(Debug, Clone, Default)]
pub struct AliasResolver {
    /// (drive root, share root), both canonical without trailing slash.
    mappings: Vec<(String, String)>,
}

impl AliasResolver {
    pub fn new(mappings: &[DriveMapping]) -> Self {
        let mappings = mappings
            .iter()
            .filter_map(|m| {
                let drive = canonicalize(&m.drive);
                let unc = canonicalize(&m.unc);
                let drive = drive.trim_end_matches('/').to_string();
                if drive.len() != 2 || !is_unc(&unc) {
                    tracing::warn!(drive = %m.drive, unc = %m.unc, "Ignoring unusable drive mapping");
                    return None;
                }
                Some((drive, unc))
            })
            .collect();
        Self { mappings }
    }

    /// Other canonical keys that may name the same document as `key`.
    pub fn aliases(&self, key: &str) -> Vec<String> {
        let mut found = Vec::new();
        for (drive, unc) in &self.mappings {
            if let Some(rest) = strip_root(key, drive) {
                found.push(format!("{unc}{rest}"));
            }
            if let Some(rest) = strip_root(key, unc) {
                found.push(format!("{drive}{rest}"));
            }
        }
        found
    }

    pub fn equivalent(&self, a: &str, b: &str) -> bool {
        let a = canonicalize(a);
        let b = canonicalize(b);
        a == b || self.aliases(&a).contains(&b)
    }
}

fn strip_root<'a>(key: &'a str, root: &str) -> Option<&'a str> {
    key.strip_prefix(root)
        .filter(|rest| rest.is_empty() || rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_flips_backslashes() {
        assert_eq!(canonicalize("C:\\Data\\Book.XLSX"), "c:/data/book.xlsx");
    }

    #[test]
    fn resolves_dot_components() {
        assert_eq!(canonicalize("c:/data/./sub/../book.xlsx"), "c:/data/book.xlsx");
        assert_eq!(canonicalize("/data//sub///book.xlsx"), "/data/sub/book.xlsx");
    }

    #[test]
    fn parent_of_root_stays_at_root() {
        assert_eq!(canonicalize("c:/../book.xlsx"), "c:/book.xlsx");
        assert_eq!(canonicalize("/../book.xlsx"), "/book.xlsx");
    }

    #[test]
    fn keeps_share_prefix() {
        assert_eq!(
            canonicalize("\\\\Server\\Share\\Dir\\A.xlsx"),
            "//server/share/dir/a.xlsx"
        );
        assert!(is_unc("//server/share/dir/a.xlsx"));
        assert!(!is_unc("c:/dir/a.xlsx"));
    }

    #[test]
    fn canonicalize_is_idempotent() {
        for name in [
            "C:\\Data\\..\\x.xlsx",
            "//host/share/a/./b.xlsx",
            "/tmp/Data/book.xlsx",
            "relative/dir/../book.xlsx",
        ] {
            let once = canonicalize(name);
            assert_eq!(canonicalize(&once), once, "not idempotent for {name}");
        }
    }

    #[test]
    fn relative_names_become_absolute() {
        let key = canonicalize("some/book.xlsx");
        assert!(is_absolute(&key));
        assert!(key.ends_with("/some/book.xlsx"));
    }

    #[test]
    fn base_name_is_case_insensitive() {
        assert_eq!(base_name("C:/One/Book.xlsx"), "book.xlsx");
        assert_eq!(base_name("d:\\two\\BOOK.xlsx"), "book.xlsx");
    }

    #[test]
    fn drive_and_share_are_aliases() {
        let resolver = AliasResolver::new(&[DriveMapping {
            drive: "Z:".to_string(),
            unc: "\\\\Server\\Share".to_string(),
        }]);

        assert_eq!(
            resolver.aliases("z:/dir/a.xlsx"),
            vec!["//server/share/dir/a.xlsx".to_string()]
        );
        assert_eq!(
            resolver.aliases("//server/share/dir/a.xlsx"),
            vec!["z:/dir/a.xlsx".to_string()]
        );
        assert!(resolver.equivalent("Z:\\dir\\A.xlsx", "//SERVER/share/dir/a.xlsx"));
        assert!(!resolver.equivalent("y:/dir/a.xlsx", "//server/share/dir/a.xlsx"));
    }

    #[test]
    fn share_prefix_must_end_at_component_boundary() {
        let resolver = AliasResolver::new(&[DriveMapping {
            drive: "z:".to_string(),
            unc: "//server/share".to_string(),
        }]);
        assert!(resolver.aliases("//server/shared/a.xlsx").is_empty());
    }

    #[test]
    fn unusable_mappings_are_dropped() {
        let resolver = AliasResolver::new(&[DriveMapping {
            drive: "not-a-drive".to_string(),
            unc: "c:/local".to_string(),
        }]);
        assert!(resolver.aliases("c:/local/a.xlsx").is_empty());
    }
}
