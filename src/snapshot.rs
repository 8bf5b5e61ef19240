//! Persistence of engine telemetry and tree structure. Writes are atomic
//! (write to a temp file in the same directory, `sync_all`, then `rename`)
//! so a reader never observes a partially written snapshot: it is either the
//! previous version or the complete new one.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::expert::TreeSnapshot;
use crate::quantities::Float;

/// `(tick_index, wall_clock, action, observed_state, per_region_error_list)`.
/// `errors` is `(leaf_id, mean_error)` for every leaf live at the time this
/// record was taken.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TickRecord {
    pub tick: u64,
    pub wall_clock: u64,
    pub action: Vec<Float>,
    pub state: Vec<Float>,
    pub leaf_count: usize,
    pub errors: Vec<(u64, Float)>,
}

fn write_file_atomic(path: &Path, content: &[u8]) -> Result<(), EngineError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("snapshot");
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", process::id()));

    let to_io_err = |reason: &str| EngineError::RegressionFailure {
        reason: reason.to_string(),
    };

    let mut file = File::create(&tmp_path).map_err(|_| to_io_err("create temp snapshot file"))?;
    file.write_all(content)
        .map_err(|_| to_io_err("write temp snapshot file"))?;
    file.sync_all().map_err(|_| to_io_err("fsync temp snapshot file"))?;
    fs::rename(&tmp_path, path).map_err(|_| to_io_err("rename temp snapshot file"))?;
    Ok(())
}

/// Append-only log of per-tick records, flushed to disk atomically on each
/// `record` (bounded by how often the engine calls it — see
/// `EngineConfig::snapshot_period`) and once more, unconditionally, when the
/// engine stops.
pub struct SnapshotSink {
    dir: PathBuf,
    records: Mutex<Vec<TickRecord>>,
}

impl SnapshotSink {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> SnapshotSink {
        SnapshotSink {
            dir: dir.into(),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, record: TickRecord) -> Result<(), EngineError> {
        self.records.lock().push(record);
        Ok(())
    }

    fn path_for(&self, engine_id: &str) -> PathBuf {
        self.dir.join(format!("{engine_id}.snapshot.json"))
    }

    /// Flush every buffered record to disk for `engine_id`, atomically.
    pub fn flush_final(&self, engine_id: &str) -> Result<(), EngineError> {
        let records = self.records.lock();
        let json = serde_json::to_vec_pretty(&*records).map_err(|_| EngineError::RegressionFailure {
            reason: "serialize snapshot".to_string(),
        })?;
        write_file_atomic(&self.path_for(engine_id), &json)
    }

    fn tree_path_for(&self, engine_id: &str) -> PathBuf {
        self.dir.join(format!("{engine_id}.tree.json"))
    }

    /// Persist the `(structure, per_leaf_state)` pair, atomically, on the
    /// engine's `snapshot_period`. Separate from [`SnapshotSink::record`]'s
    /// per-tick telemetry: the tree is large and changes far less often.
    pub fn record_tree(&self, engine_id: &str, snapshot: &TreeSnapshot) -> Result<(), EngineError> {
        let json = serde_json::to_vec_pretty(snapshot).map_err(|_| EngineError::RegressionFailure {
            reason: "serialize tree snapshot".to_string(),
        })?;
        write_file_atomic(&self.tree_path_for(engine_id), &json)
    }

    /// Reload a previously persisted tree snapshot for `engine_id`.
    pub fn load_tree(&self, engine_id: &str) -> Result<TreeSnapshot, EngineError> {
        let contents = fs::read(self.tree_path_for(engine_id)).map_err(|_| EngineError::RegressionFailure {
            reason: "read tree snapshot".to_string(),
        })?;
        serde_json::from_slice(&contents).map_err(|_| EngineError::RegressionFailure {
            reason: "deserialize tree snapshot".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{SnapshotSink, TickRecord};
    use crate::config::ExpertConfig;
    use crate::expert::ExpertTree;

    #[test]
    fn flush_is_visible_as_a_complete_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SnapshotSink::new(dir.path());
        sink.record(TickRecord {
            tick: 0,
            wall_clock: 1_700_000_000,
            action: vec![1.0],
            state: vec![2.0],
            leaf_count: 1,
            errors: vec![(0, 0.1)],
        })
        .unwrap();
        sink.flush_final("engine-0").unwrap();

        let path = dir.path().join("engine-0.snapshot.json");
        assert!(path.exists());
        let contents = std::fs::read_to_string(path).unwrap();
        let records: Vec<TickRecord> = serde_json::from_str(&contents).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tick, 0);
    }

    #[test]
    fn no_temp_file_remains_after_flush() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SnapshotSink::new(dir.path());
        sink.flush_final("engine-1").unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn tree_snapshot_survives_a_restart_and_predicts_identically() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SnapshotSink::new(dir.path());

        let mut tree = ExpertTree::new(1, 1, ExpertConfig {
            split_thres: 20,
            mean_error_thres: 0.01,
            ..ExpertConfig::default()
        });
        for t in 0..600 {
            let m = (t % 256) as f64;
            let s1 = if m < 128.0 { 1.0 } else { 100.0 };
            let predicted = tree.predict(&[], &[m]).unwrap();
            tree.append(&[], &[m], &[s1], Some(&predicted)).unwrap();
        }

        sink.record_tree("engine-0", &tree.to_snapshot()).unwrap();
        let reloaded = ExpertTree::from_snapshot(sink.load_tree("engine-0").unwrap());

        for m in [0.0, 64.0, 127.0, 128.0, 192.0, 255.0] {
            assert_eq!(
                reloaded.predict(&[], &[m]).unwrap(),
                tree.predict(&[], &[m]).unwrap()
            );
        }
    }
}
