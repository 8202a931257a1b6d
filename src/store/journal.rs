//! Durable position journal.
//!
//! The store persists its full position set through a `PositionJournal`
//! before a mutation becomes visible to readers. The JSON file variant keeps
//! a human-inspectable `positions.json` that survives restarts.

use std::path::{Path, PathBuf};

use crate::domain::Position;
use crate::error::{Result, StoreError};

/// Persistence hook for the position store. Called synchronously under the
/// store's write lock, so implementations must not block on anything slow
/// beyond local IO.
pub trait PositionJournal: Send + Sync {
    /// Persist the complete position set.
    fn persist(&self, positions: &[Position]) -> Result<()>;

    /// Load the persisted set, or an empty set when nothing exists yet.
    fn load(&self) -> Result<Vec<Position>>;
}

/// JSON-file journal with atomic replace (write temp, rename over).
pub struct JsonJournal {
    path: PathBuf,
}

impl JsonJournal {
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl PositionJournal for JsonJournal {
    fn persist(&self, positions: &[Position]) -> Result<()> {
        let json = serde_json::to_string_pretty(positions)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(StoreError::Journal)?;
        std::fs::rename(&tmp, &self.path).map_err(StoreError::Journal)?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<Position>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Journal(e).into()),
        };
        serde_json::from_str(&content)
            .map_err(|e| StoreError::CorruptJournal(e.to_string()).into())
    }
}

/// Journal that persists nothing. For tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct NullJournal;

impl PositionJournal for NullJournal {
    fn persist(&self, _positions: &[Position]) -> Result<()> {
        Ok(())
    }

    fn load(&self) -> Result<Vec<Position>> {
        Ok(Vec::new())
    }
}
