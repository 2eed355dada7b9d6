use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::StoreError;

/// Reads a whole state file. A missing or empty file is an empty store.
pub(crate) fn load_json<T>(path: &Path) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }

    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Rewrites the whole state file through a sibling temp file and a rename.
pub(crate) fn write_json_atomic<T>(path: &Path, value: &T) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec_pretty(value)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let tmp = tmp_path(path);
    fs::write(&tmp, bytes).map_err(|source| StoreError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Puts a FIFO where the next write of `path` lands, so that write blocks until drained.
#[cfg(all(test, unix))]
pub(crate) struct StalledWrite {
    fifo: PathBuf,
}

#[cfg(all(test, unix))]
impl StalledWrite {
    pub(crate) fn install(path: &Path) -> Self {
        let fifo = tmp_path(path);
        let status = std::process::Command::new("mkfifo")
            .arg(&fifo)
            .status()
            .expect("run mkfifo");
        assert!(status.success(), "mkfifo failed for {}", fifo.display());
        Self { fifo }
    }

    /// Reads the pending write to the end, letting the writer finish.
    pub(crate) fn drain(&self) {
        let _ = fs::read(&self.fifo);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{load_json, tmp_path, write_json_atomic};
    use crate::store::StoreError;

    #[test]
    fn missing_file_loads_as_default() {
        let dir = tempfile::tempdir().expect("temp dir");
        let loaded: BTreeMap<String, String> =
            load_json(&dir.path().join("absent.json")).expect("missing file is empty");
        assert!(loaded.is_empty());
    }

    #[test]
    fn whitespace_file_loads_as_default() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("blank.json");
        std::fs::write(&path, "\n  ").expect("write blank file");

        let loaded: BTreeMap<String, String> = load_json(&path).expect("blank file is empty");
        assert!(loaded.is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").expect("write broken file");

        let err = load_json::<BTreeMap<String, String>>(&path).expect_err("corrupt file");
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn write_creates_directories_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("state").join("data.json");
        let mut value = BTreeMap::new();
        value.insert("k".to_string(), "v".to_string());

        write_json_atomic(&path, &value).expect("write state");

        let loaded: BTreeMap<String, String> = load_json(&path).expect("reload state");
        assert_eq!(loaded, value);
        assert!(!tmp_path(&path).exists());
    }
}
