//! Batch sandbox persistence between process runs

use super::rebuild::RebuildState;
use super::regenerate::RegenerateState;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Saved state of an unfinished batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum BatchCheckpoint {
    Regenerate(RegenerateState),
    Rebuild(RebuildState),
}

impl BatchCheckpoint {
    pub fn operation(&self) -> &'static str {
        match self {
            BatchCheckpoint::Regenerate(_) => "regenerate",
            BatchCheckpoint::Rebuild(_) => "rebuild",
        }
    }
}

/// JSON file holding at most one checkpoint
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<BatchCheckpoint>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save(&self, checkpoint: &BatchCheckpoint) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, serde_json::to_string_pretty(checkpoint)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "Saved {} checkpoint", checkpoint.operation());
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::RebuildOptions;
    use tempfile::TempDir;

    #[test]
    fn test_save_load_clear() {
        let tmp = TempDir::new().unwrap();
        let file = CheckpointFile::new(tmp.path().join("state").join("batch.json"));
        assert!(file.load().unwrap().is_none());

        let mut state = RebuildState::new(vec!["node".to_string()], RebuildOptions::default());
        state.resync[0].last_id = 42;
        let checkpoint = BatchCheckpoint::Rebuild(state);
        file.save(&checkpoint).unwrap();

        let raw = fs::read_to_string(file.path()).unwrap();
        assert!(raw.contains(r#""operation": "rebuild""#));
        assert_eq!(file.load().unwrap(), Some(checkpoint));

        file.clear().unwrap();
        file.clear().unwrap();
        assert!(file.load().unwrap().is_none());
    }

    #[test]
    fn test_regenerate_checkpoint_round_trip() {
        let tmp = TempDir::new().unwrap();
        let file = CheckpointFile::new(tmp.path().join("batch.json"));
        let checkpoint = BatchCheckpoint::Regenerate(RegenerateState::new(vec!["abc".to_string()]));
        file.save(&checkpoint).unwrap();
        let loaded = file.load().unwrap().unwrap();
        assert_eq!(loaded.operation(), "regenerate");
        assert_eq!(loaded, checkpoint);
    }
}
