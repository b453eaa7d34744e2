use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Sync progress for one directed source/target pair.
///
/// `pulled` is the source's version already extracted; `applied` is the
/// target's version as of our last apply, used as the base anchor for
/// conflict detection on the next apply.
#[derive(Serialize, Deserialize, Default, Clone, Copy)]
pub struct PairAnchors {
    pub pulled: i64,
    pub applied: i64,
}

/// Anchors per directed database pair, persisted by the CLI between
/// runs.
#[derive(Serialize, Deserialize, Default)]
pub struct AnchorStore {
    pub pairs: HashMap<String, PairAnchors>,
}

impl AnchorStore {
    pub fn pair(&self, source: &str, target: &str) -> PairAnchors {
        self.pairs
            .get(&pair_key(source, target))
            .copied()
            .unwrap_or_default()
    }

    pub fn record(&mut self, source: &str, target: &str, anchors: PairAnchors) {
        self.pairs.insert(pair_key(source, target), anchors);
    }
}

fn pair_key(source: &str, target: &str) -> String {
    format!("{source}->{target}")
}

fn get_store_path() -> Result<PathBuf> {
    let home_dir =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
    let store_dir = home_dir.join(".sqlite-rowsync");
    if !store_dir.exists() {
        fs::create_dir_all(&store_dir)?;
    }
    Ok(store_dir.join("anchors.json"))
}

pub fn load() -> Result<AnchorStore> {
    let store_path = get_store_path()?;
    if !store_path.exists() {
        return Ok(AnchorStore::default());
    }
    let store_file = fs::File::open(store_path)?;
    let store = serde_json::from_reader(store_file)?;
    Ok(store)
}

pub fn save(store: &AnchorStore) -> Result<()> {
    let store_path = get_store_path()?;
    let store_file = fs::File::create(store_path)?;
    serde_json::to_writer_pretty(store_file, store)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_pair_defaults_to_zero() {
        let store = AnchorStore::default();
        let pair = store.pair("a.db", "b.db");
        assert_eq!(pair.pulled, 0);
        assert_eq!(pair.applied, 0);
    }

    #[test]
    fn records_are_directional() {
        let mut store = AnchorStore::default();
        store.record(
            "a.db",
            "b.db",
            PairAnchors {
                pulled: 7,
                applied: 3,
            },
        );
        assert_eq!(store.pair("a.db", "b.db").pulled, 7);
        assert_eq!(store.pair("b.db", "a.db").pulled, 0);
    }
}
