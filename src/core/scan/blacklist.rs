//! Connect blacklist
//!
//! A plain-text keyword file that suppresses GATT connect attempts for
//! devices whose name contains one of the keywords. Matching is
//! case-insensitive substring ("resmed" matches "ResMed 027506"). Lines
//! starting with `#`, `;` or `//` are comments. The file may be edited
//! while the daemon runs; it is re-checked by mtime at most every 30 s.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

const STAT_EVERY: Duration = Duration::from_secs(30);

struct Inner {
    keywords: Vec<String>,
    mod_time: Option<SystemTime>,
    last_stat: Instant,
}

/// Keyword filter for connect scheduling.
pub struct ConnectBlacklist {
    path: PathBuf,
    inner: RwLock<Inner>,
}

impl ConnectBlacklist {
    /// Load the blacklist from a file. A missing file yields `None`.
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Option<Self>> {
        let path = path.as_ref();
        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let keywords = read_keywords(path)?;
        Ok(Some(Self {
            path: path.to_path_buf(),
            inner: RwLock::new(Inner {
                keywords,
                mod_time: meta.modified().ok(),
                last_stat: Instant::now(),
            }),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn keywords(&self) -> Vec<String> {
        self.inner.read().keywords.clone()
    }

    /// True when the device name matches a keyword and the connect attempt
    /// should be skipped. Reloads the file when its mtime changed.
    pub fn matches(&self, device_name: &str) -> bool {
        let name = device_name.trim().to_lowercase();
        if name.is_empty() {
            return false;
        }
        self.maybe_reload();
        self.inner
            .read()
            .keywords
            .iter()
            .any(|kw| !kw.is_empty() && name.contains(kw))
    }

    fn maybe_reload(&self) {
        {
            let inner = self.inner.read();
            if inner.last_stat.elapsed() < STAT_EVERY {
                return;
            }
        }
        let mut inner = self.inner.write();
        inner.last_stat = Instant::now();
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return;
        };
        let modified = meta.modified().ok();
        if modified == inner.mod_time {
            return;
        }
        if let Ok(keywords) = read_keywords(&self.path) {
            tracing::info!(
                "reloaded connect blacklist {} ({} keywords)",
                self.path.display(),
                keywords.len()
            );
            inner.keywords = keywords;
            inner.mod_time = modified;
        }
    }
}

fn read_keywords(path: &Path) -> std::io::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !l.starts_with('#') && !l.starts_with(';') && !l.starts_with("//"))
        .map(|l| l.to_lowercase())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn substring_match_is_case_insensitive() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# medical devices we must not probe").unwrap();
        writeln!(file, "ResMed").unwrap();
        writeln!(file, "; another comment").unwrap();
        writeln!(file, "insulin").unwrap();
        file.flush().unwrap();

        let bl = ConnectBlacklist::load(file.path()).unwrap().unwrap();
        assert!(bl.matches("ResMed 027506"));
        assert!(bl.matches("resmed027506"));
        assert!(bl.matches("MiniMed Insulin Pump"));
        assert!(!bl.matches("Pixel 8"));
        assert!(!bl.matches(""));
        assert_eq!(bl.keywords().len(), 2);
    }

    #[test]
    fn missing_file_is_none() {
        assert!(ConnectBlacklist::load("/nonexistent/blacklist.txt")
            .unwrap()
            .is_none());
    }
}
