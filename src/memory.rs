//! Bounded conversation memory.
//!
//! Keeps the last N [`Turn`]s in order, evicting the oldest on overflow.
//! A persistent memory is bound to `<dir>/memory_<session>.json`: `save`
//! writes the whole window as a JSON array to a sibling temp file and
//! renames it into place, so a crash never leaves a half-written file behind.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::MemoryError;
use crate::models::Turn;

/// Turns kept for interactive context.
pub const INTERACTIVE_CAPACITY: usize = 10;
/// Turns kept in the persisted window.
pub const PERSISTED_CAPACITY: usize = 20;

/// Path of the memory file for `session` inside `dir`.
pub fn memory_file(dir: &Path, session: &str) -> Result<PathBuf, MemoryError> {
    validate_session(session)?;
    Ok(dir.join(format!("memory_{}.json", session)))
}

fn validate_session(session: &str) -> Result<(), MemoryError> {
    let valid = !session.is_empty()
        && session
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(MemoryError::InvalidSession(session.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: VecDeque<Turn>,
    capacity: usize,
    path: Option<PathBuf>,
}

impl ConversationMemory {
    /// In-memory only; `save` and `load` do nothing.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
            path: None,
        }
    }

    pub fn interactive() -> Self {
        Self::new(INTERACTIVE_CAPACITY)
    }

    /// Bound to `path`, empty until [`load`](Self::load) is called.
    pub fn persistent(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new(capacity)
        }
    }

    /// Bind to the file for `session` in `dir` and load it.
    pub fn open(dir: &Path, session: &str, capacity: usize) -> Result<Self, MemoryError> {
        let mut memory = Self::persistent(memory_file(dir, session)?, capacity);
        memory.load()?;
        Ok(memory)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn append(&mut self, turn: Turn) {
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// All retained turns, oldest first.
    pub fn history(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    /// The last `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).cloned().collect()
    }

    /// Forget every turn and delete the backing file.
    pub fn clear(&mut self) -> Result<(), MemoryError> {
        self.turns.clear();
        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(MemoryError::Io {
                        path: path.clone(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    /// Overwrite the backing file with the current window.
    pub fn save(&self) -> Result<(), MemoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source: std::io::Error| MemoryError::Io {
            path: path.clone(),
            source,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;

        let turns: Vec<&Turn> = self.turns.iter().collect();
        let json = serde_json::to_vec_pretty(&turns).map_err(|source| MemoryError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&json).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        std::fs::rename(&tmp, path).map_err(io_err)?;

        debug!(path = %path.display(), turns = turns.len(), "memory saved");
        Ok(())
    }

    /// Replace the window with the backing file's contents. A missing file
    /// gives an empty window; an unparseable one is an error.
    pub fn load(&mut self) -> Result<(), MemoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.turns.clear();
                return Ok(());
            }
            Err(source) => {
                return Err(MemoryError::Io {
                    path: path.clone(),
                    source,
                })
            }
        };

        let stored: Vec<Turn> =
            serde_json::from_slice(&bytes).map_err(|source| MemoryError::Corrupt {
                path: path.clone(),
                source,
            })?;

        let skip = stored.len().saturating_sub(self.capacity);
        self.turns = stored.into_iter().skip(skip).collect();
        debug!(path = %path.display(), turns = self.turns.len(), "memory loaded");
        Ok(())
    }
}
