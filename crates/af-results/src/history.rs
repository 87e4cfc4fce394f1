//! In-memory run history backed by a [`RunStore`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use af_runner::{ResultFields, RunStatus};
use tracing::{info, warn};

use crate::hash::Fingerprint;
use crate::store::RunStore;
use crate::types::RunRecord;
use crate::{ResultsError, ResultsResult};

type Entry = Arc<RwLock<RunRecord>>;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// Index of every known run keyed by fingerprint. Reads of different
/// entries proceed in parallel; writes to one entry are exclusive.
pub struct RunHistory {
    store: RunStore,
    max_history: usize,
    index: RwLock<HashMap<Fingerprint, Entry>>,
    corrupt: RwLock<HashMap<Fingerprint, String>>,
}

impl RunHistory {
    /// Rebuild the index from disk. Runs left active by a previous process
    /// are marked `Cancelled`; unreadable ones are remembered as corrupt.
    pub fn open(store: RunStore, max_history: usize) -> ResultsResult<Self> {
        let mut index = HashMap::new();
        let mut corrupt = HashMap::new();
        for fp in store.fingerprints()? {
            match store.load_record(&fp) {
                Ok(mut record) => {
                    if !record.status.is_terminal() {
                        record.status = RunStatus::Cancelled;
                        record.finished_at = Some(chrono::Utc::now().to_rfc3339());
                        store.save_record(&record)?;
                    }
                    if record.is_reusable() && !store.has_fields(&fp) {
                        corrupt.insert(fp.clone(), "succeeded run has no fields".to_string());
                    }
                    index.insert(fp, Arc::new(RwLock::new(record)));
                }
                Err(ResultsError::RunNotFound { .. }) => {}
                Err(err) => {
                    warn!(fingerprint = %fp, error = %err, "corrupt run entry");
                    corrupt.insert(fp, err.to_string());
                }
            }
        }
        info!(runs = index.len(), corrupt = corrupt.len(), "opened run history");
        Ok(Self {
            store,
            max_history,
            index: RwLock::new(index),
            corrupt: RwLock::new(corrupt),
        })
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    fn check_corrupt(&self, fingerprint: &Fingerprint) -> ResultsResult<()> {
        match read(&self.corrupt).get(fingerprint) {
            Some(reason) => Err(ResultsError::corruption(fingerprint, reason.clone())),
            None => Ok(()),
        }
    }

    fn entry(&self, fingerprint: &Fingerprint) -> Option<Entry> {
        read(&self.index).get(fingerprint).cloned()
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> ResultsResult<Option<RunRecord>> {
        self.check_corrupt(fingerprint)?;
        Ok(self.entry(fingerprint).map(|e| read(&e).clone()))
    }

    /// Insert or replace a record and persist it. Replacing clears any
    /// corruption mark for the fingerprint.
    pub fn record(&self, record: RunRecord) -> ResultsResult<()> {
        self.store.save_record(&record)?;
        let fp = record.fingerprint.clone();
        let existing = self.entry(&fp);
        match existing {
            Some(entry) => *write(&entry) = record,
            None => {
                write(&self.index).insert(fp.clone(), Arc::new(RwLock::new(record)));
            }
        }
        write(&self.corrupt).remove(&fp);
        Ok(())
    }

    /// Apply `change` under the entry's write lock and persist the result.
    pub fn update(
        &self,
        fingerprint: &Fingerprint,
        change: impl FnOnce(&mut RunRecord),
    ) -> ResultsResult<RunRecord> {
        let entry = self.entry(fingerprint).ok_or_else(|| ResultsError::RunNotFound {
            fingerprint: fingerprint.to_string(),
        })?;
        let mut record = write(&entry);
        change(&mut record);
        self.store.save_record(&record)?;
        Ok(record.clone())
    }

    /// Persist the result fields of a succeeded run.
    pub fn store_fields(&self, fingerprint: &Fingerprint, fields: &ResultFields) -> ResultsResult<()> {
        self.store.save_fields(fingerprint, fields)
    }

    pub fn fields(&self, fingerprint: &Fingerprint) -> ResultsResult<ResultFields> {
        self.check_corrupt(fingerprint)?;
        let record = self
            .lookup(fingerprint)?
            .ok_or_else(|| ResultsError::RunNotFound {
                fingerprint: fingerprint.to_string(),
            })?;
        if record.evicted {
            return Err(ResultsError::Evicted {
                fingerprint: fingerprint.to_string(),
            });
        }
        if record.status != RunStatus::Succeeded {
            return Err(ResultsError::RunNotFound {
                fingerprint: fingerprint.to_string(),
            });
        }
        self.store.load_fields(fingerprint)
    }

    /// All records, most recent first.
    pub fn list(&self) -> Vec<RunRecord> {
        let entries: Vec<Entry> = read(&self.index).values().cloned().collect();
        let mut records: Vec<RunRecord> = entries.iter().map(|e| read(e).clone()).collect();
        records.sort_by(|a, b| {
            b.last_activity()
                .cmp(a.last_activity())
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        records
    }

    /// Fingerprints whose stored data could not be trusted.
    pub fn corrupt(&self) -> Vec<(Fingerprint, String)> {
        let mut out: Vec<_> = read(&self.corrupt)
            .iter()
            .map(|(fp, reason)| (fp.clone(), reason.clone()))
            .collect();
        out.sort();
        out
    }

    /// Find a run by full fingerprint or unique prefix.
    pub fn resolve(&self, prefix: &str) -> ResultsResult<Fingerprint> {
        let prefix = prefix.trim().to_ascii_lowercase();
        let index = read(&self.index);
        let mut matches = index.keys().filter(|fp| fp.as_str().starts_with(&prefix));
        match (matches.next(), matches.next()) {
            (Some(fp), None) if !prefix.is_empty() => Ok(fp.clone()),
            _ => Err(ResultsError::RunNotFound {
                fingerprint: prefix.clone(),
            }),
        }
    }

    /// Keep at most `max_history` terminal runs with data. Older ones lose
    /// their fields and case directories but stay listed as evicted.
    pub fn evict_excess(&self) -> ResultsResult<Vec<Fingerprint>> {
        let mut candidates: Vec<(String, Fingerprint)> = read(&self.index)
            .iter()
            .filter_map(|(fp, entry)| {
                let r = read(entry);
                (r.status.is_terminal() && !r.evicted)
                    .then(|| (r.last_activity().to_string(), fp.clone()))
            })
            .collect();
        if candidates.len() <= self.max_history {
            return Ok(Vec::new());
        }
        candidates.sort();
        let excess = candidates.len() - self.max_history;

        let mut evicted = Vec::with_capacity(excess);
        for (_, fp) in candidates.into_iter().take(excess) {
            let Some(entry) = self.entry(&fp) else {
                continue;
            };
            let mut record = write(&entry);
            // Re-check under the write lock; the run may have been restarted.
            if !record.status.is_terminal() || record.evicted {
                continue;
            }
            self.store.delete_data(&fp)?;
            record.evicted = true;
            record.case_dir = None;
            self.store.save_record(&record)?;
            info!(fingerprint = %fp, "evicted run data");
            evicted.push(fp);
        }
        Ok(evicted)
    }
}
