use std::fmt;
use std::path::{Path, PathBuf};

/// Separator used to address entries inside an archive (`/x/lib.jar!/com/Foo.class`).
///
/// Only the on-disk prefix of such a path can be watched; see
/// [`WatchPath::strip_archive_suffix`].
pub const ARCHIVE_SEPARATOR: &str = "!/";

const SEPARATOR: char = '/';

/// An absolute filesystem path in system-independent (forward-slash) form.
///
/// `WatchPath` is the path currency of the watch layer: everything crossing the
/// registry/watcher/tree boundaries uses this form, and conversion to native
/// OS separators happens only at the watcher and filesystem boundary (see
/// [`WatchPath::to_native`]).
///
/// Construction normalizes backslashes to forward slashes and strips a single
/// trailing slash (except for the bare root `/`). No filesystem access or
/// symlink resolution happens here.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchPath(String);

impl WatchPath {
    pub fn new(path: impl AsRef<str>) -> Self {
        let mut normalized: String = path
            .as_ref()
            .chars()
            .map(|c| if c == '\\' { SEPARATOR } else { c })
            .collect();
        while normalized.len() > 1 && normalized.ends_with(SEPARATOR) {
            // Keep drive roots (`C:/`) intact; `C:` alone is not a usable root.
            if drive_prefix_len(&normalized) == normalized.len() {
                break;
            }
            normalized.pop();
        }
        Self(normalized)
    }

    /// Builds a `WatchPath` from a native OS path.
    pub fn from_native(path: &Path) -> Self {
        Self::new(path.to_string_lossy())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the path is absolute (`/...` or drive-letter form `C:/...`).
    pub fn is_absolute(&self) -> bool {
        self.0.starts_with(SEPARATOR) || drive_prefix_len(&self.0) > 0
    }

    /// Converts back to a native OS path. Separator conversion only.
    pub fn to_native(&self) -> PathBuf {
        #[cfg(windows)]
        {
            PathBuf::from(self.0.replace(SEPARATOR, "\\"))
        }
        #[cfg(not(windows))]
        {
            PathBuf::from(&self.0)
        }
    }

    /// Splits the path into ordered segments.
    ///
    /// The unix root `/` counts as its own first segment, and so does a drive
    /// prefix (`C:`), so that two absolute paths share a common trie ancestor
    /// exactly when one is a filesystem prefix of the other.
    pub fn split_segments(&self) -> Vec<&str> {
        let path = self.0.as_str();
        if path.is_empty() {
            return Vec::new();
        }
        if path == "/" {
            return vec!["/"];
        }

        let mut segments = Vec::new();
        let rest = if let Some(stripped) = path.strip_prefix(SEPARATOR) {
            segments.push("/");
            stripped
        } else {
            let drive = drive_prefix_len(path);
            if drive > 0 {
                // `C:/x` -> ["C:", "x"]; the trailing slash of the prefix is dropped.
                segments.push(&path[..drive.min(2)]);
                &path[drive..]
            } else {
                path
            }
        };
        segments.extend(rest.split(SEPARATOR).filter(|s| !s.is_empty()));
        segments
    }

    /// Truncates an embedded archive separator, returning the on-disk prefix.
    ///
    /// Paths without an archive separator are returned unchanged.
    pub fn strip_archive_suffix(&self) -> Self {
        match self.0.find(ARCHIVE_SEPARATOR) {
            Some(index) => Self::new(&self.0[..index]),
            None => self.clone(),
        }
    }
}

/// Length of a `C:` / `C:/` drive prefix, or 0 when the path has none.
fn drive_prefix_len(path: &str) -> usize {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        if bytes.get(2) == Some(&b'/') {
            3
        } else if bytes.len() == 2 {
            2
        } else {
            0
        }
    } else {
        0
    }
}

impl fmt::Debug for WatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WatchPath({:?})", self.0)
    }
}

impl fmt::Display for WatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WatchPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<&Path> for WatchPath {
    fn from(path: &Path) -> Self {
        Self::from_native(path)
    }
}
