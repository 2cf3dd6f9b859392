//! JSON-file driver: one pretty-printed file per storage key.
//!
//! Directory layout:
//! ```text
//! root/
//!   support-bot_ticket-42%3Achat%255Fhistory.json
//!   support-bot%3Aidentities.json
//! ```

use super::StorageDriver;
use crate::error::Result;
use crate::identity::SessionIdentity;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stores each blob in `{root}/{sanitized key}.json`.
#[derive(Debug, Clone)]
pub struct FileDriver {
    root: PathBuf,
}

impl FileDriver {
    /// The directory is created lazily on the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding `identity`'s blob.
    pub fn path_for(&self, identity: &SessionIdentity) -> PathBuf {
        self.root
            .join(format!("{}.json", sanitize_file_stem(&identity.key())))
    }
}

impl StorageDriver for FileDriver {
    fn name(&self) -> &str {
        "file"
    }

    fn read(&self, identity: &SessionIdentity) -> Result<Option<Value>> {
        let path = self.path_for(identity);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    fn write(&self, identity: &SessionIdentity, data: &Value) -> Result<bool> {
        std::fs::create_dir_all(&self.root)?;
        let final_path = self.path_for(identity);
        let tmp_path = final_path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(data)?;
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &final_path)?;
        debug!("Wrote {}", final_path.display());
        Ok(true)
    }

    fn remove(&self, identity: &SessionIdentity) -> Result<bool> {
        let path = self.path_for(identity);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)?;
        Ok(true)
    }
}

/// Keep `[A-Za-z0-9._-]`, percent-encode every other byte. Injective, so two
/// keys never share a file.
fn sanitize_file_stem(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FileDriver::new(dir.path());
        assert!(driver.read(&SessionIdentity::new("bot")).unwrap().is_none());
    }

    #[test]
    fn write_creates_pretty_json_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FileDriver::new(dir.path().join("nested"));
        let id = SessionIdentity::new("bot").with_chat("c1");
        let data = json!([{"role": "user", "content": "hi"}]);

        assert!(driver.write(&id, &data).unwrap());
        let raw = std::fs::read_to_string(driver.path_for(&id)).unwrap();
        assert!(raw.contains('\n'), "expected pretty-printed output");
        assert_eq!(driver.read(&id).unwrap(), Some(data));
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FileDriver::new(dir.path());
        let id = SessionIdentity::new("bot");
        driver.write(&id, &json!([])).unwrap();
        assert!(!driver.path_for(&id).with_extension("json.tmp").exists());
    }

    #[test]
    fn remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FileDriver::new(dir.path());
        let id = SessionIdentity::new("bot");
        assert!(!driver.remove(&id).unwrap());
        driver.write(&id, &json!([])).unwrap();
        assert!(driver.remove(&id).unwrap());
        assert!(!driver.path_for(&id).exists());
    }

    #[test]
    fn hostile_keys_stay_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FileDriver::new(dir.path());
        let id = SessionIdentity::new("../../etc").with_chat("passwd/");
        let path = driver.path_for(&id);
        assert_eq!(path.parent(), Some(dir.path()));
        assert!(!path.file_name().unwrap().to_string_lossy().contains('/'));
    }

    #[test]
    fn corrupt_file_is_an_error_not_none() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FileDriver::new(dir.path());
        let id = SessionIdentity::new("bot");
        std::fs::write(driver.path_for(&id), "{not json").unwrap();
        assert!(driver.read(&id).is_err());
    }

    #[test]
    fn sanitize_is_injective_for_percent() {
        assert_ne!(sanitize_file_stem("a%2F"), sanitize_file_stem("a/"));
    }
}
