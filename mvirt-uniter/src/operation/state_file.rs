//! JSON file holding the durable operation state.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::State;
use crate::error::StateFileError;

/// On-disk location of a unit's operation state.
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so a crash never leaves a half-written state behind.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored state. Returns `None` if nothing was written yet.
    pub fn read(&self) -> Result<Option<State>, StateFileError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StateFileError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let state = serde_json::from_slice(&data).map_err(|source| StateFileError::Decode {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(state))
    }

    pub fn write(&self, state: &State) -> Result<(), StateFileError> {
        let data = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("tmp");
        let write_err = |source: io::Error| StateFileError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let mut file = fs::File::create(&tmp).map_err(write_err)?;
        file.write_all(&data).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        fs::rename(&tmp, &self.path).map_err(write_err)?;

        debug!("Wrote {} {} state to {}", state.kind, state.step, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{HookInfo, HookKind, Kind, Step};
    use tempfile::TempDir;

    #[test]
    fn missing_file_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        assert!(file.read().unwrap().is_none());
    }

    #[test]
    fn write_then_read() {
        let dir = TempDir::new().unwrap();
        let file = StateFile::new(dir.path().join("nested/state.json"));
        let state = State::running_action(
            Step::Done,
            "a7",
            Some(HookInfo::new(HookKind::UpdateStatus)),
        )
        .unwrap()
        .with_completed(["a1", "a2"]);

        file.write(&state).unwrap();
        let back = file.read().unwrap().unwrap();

        assert_eq!(back, state);
        assert_eq!(back.kind, Kind::RunAction);
        assert!(!dir.path().join("nested/state.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{ not json").unwrap();

        let err = StateFile::new(&path).read().unwrap_err();
        assert!(matches!(err, StateFileError::Decode { .. }));
    }
}
