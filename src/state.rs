use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

/// Durable set of listing ids that have already been notified.
///
/// Backed by a JSON array on disk. Missing or corrupt state is treated as
/// "nothing seen yet" so a damaged file can never wedge the monitor; ids are
/// never removed within a run.
#[derive(Debug, Default)]
pub struct NotifiedIds {
    ids: HashSet<String>,
}

impl NotifiedIds {
    /// Load the ledger from `path`. Never errors.
    pub fn load(path: &Path) -> Self {
        let ids = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Vec<String>>(&contents) {
                Ok(ids) => ids.into_iter().collect(),
                Err(err) => {
                    warn!("ignoring corrupt ledger {}: {err}", path.display());
                    HashSet::new()
                }
            },
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    warn!("ignoring unreadable ledger {}: {err}", path.display());
                }
                HashSet::new()
            }
        };
        Self { ids }
    }

    /// Overwrite `path` with the current set rendered as a JSON array.
    pub fn save(&self, path: &Path) -> Result<()> {
        let ids: Vec<&String> = self.ids.iter().collect();
        let contents = serde_json::to_string(&ids).context("failed to serialize ledger")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Record `id`; returns whether it was new.
    pub fn insert(&mut self, id: String) -> bool {
        self.ids.insert(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
