use crate::error::Result;
use std::path::{Path, PathBuf};

/// Owns the session directory tree and performs idempotent create/delete of per-testcase
/// directories. Each test case owns its own directory; operations here are safe to call
/// concurrently from different threads for different names (the filesystem itself serializes
/// conflicting operations on the same name).
pub struct FileManager {
    session_dir: PathBuf,
}

const SOURCE_EXT: &str = "source";

impl FileManager {
    pub fn new(session_dir: impl Into<PathBuf>) -> Result<Self> {
        let session_dir = session_dir.into();
        std::fs::create_dir_all(session_dir.join("testcases"))?;
        std::fs::create_dir_all(session_dir.join("bugs"))?;
        std::fs::create_dir_all(session_dir.join("failing"))?;
        Ok(Self { session_dir })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn source_path(&self, name: &str) -> PathBuf {
        self.session_dir
            .join("testcases")
            .join(name)
            .join(format!("{name}.{SOURCE_EXT}"))
    }

    /// Idempotently writes `source` to the test case's directory, creating it if needed.
    pub fn write_source(&self, name: &str, source: &str) -> Result<PathBuf> {
        let path = self.source_path(name);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, source)?;
        Ok(path)
    }

    pub fn read_source(&self, name: &str) -> Result<String> {
        Ok(std::fs::read_to_string(self.source_path(name))?)
    }

    /// Idempotently removes a test case's entire directory under `testcases/`.
    pub fn delete_testcase(&self, name: &str) {
        let dir = self.session_dir.join("testcases").join(name);
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to delete test case directory {dir:?}: {e}");
            }
        }
    }

    fn persist_artifact(&self, subdir: &str, name: &str, stdout: &[u8], stderr: &[u8]) -> Result<PathBuf> {
        let dir = self.session_dir.join(subdir).join(name);
        std::fs::create_dir_all(&dir)?;
        if let Ok(source) = self.read_source(name) {
            std::fs::write(dir.join(format!("{name}.{SOURCE_EXT}")), source)?;
        }
        std::fs::write(dir.join("stdout.txt"), stdout)?;
        std::fs::write(dir.join("stderr.txt"), stderr)?;
        Ok(dir)
    }

    pub fn persist_bug(&self, name: &str, stdout: &[u8], stderr: &[u8], reason: &str) -> Result<PathBuf> {
        let dir = self.persist_artifact("bugs", name, stdout, stderr)?;
        std::fs::write(dir.join("reason.txt"), reason)?;
        Ok(dir)
    }

    pub fn persist_failing(&self, name: &str, stdout: &[u8], stderr: &[u8], reason: &str) -> Result<PathBuf> {
        let dir = self.persist_artifact("failing", name, stdout, stderr)?;
        std::fs::write(dir.join("reason.txt"), reason)?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();
        fm.write_source("tc_1", "fn main() {}").unwrap();
        assert_eq!(fm.read_source("tc_1").unwrap(), "fn main() {}");
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();
        fm.write_source("tc_1", "x").unwrap();
        fm.delete_testcase("tc_1");
        fm.delete_testcase("tc_1"); // second delete must not error
        assert!(!fm.source_path("tc_1").exists());
    }
}
