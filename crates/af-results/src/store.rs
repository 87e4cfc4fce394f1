//! Run storage on disk: `<root>/<fingerprint>/{manifest.json, fields.json, case-N/}`.

use std::fs;
use std::path::{Path, PathBuf};

use af_runner::ResultFields;
use tracing::debug;

use crate::hash::Fingerprint;
use crate::types::{MANIFEST_SCHEMA_VERSION, RunManifest, RunRecord};
use crate::{ResultsError, ResultsResult};

const MANIFEST_FILE: &str = "manifest.json";
const FIELDS_FILE: &str = "fields.json";

#[derive(Debug, Clone)]
pub struct RunStore {
    root_dir: PathBuf,
}

impl RunStore {
    pub fn new(root_dir: PathBuf) -> ResultsResult<Self> {
        fs::create_dir_all(&root_dir)?;
        Ok(Self { root_dir })
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    pub fn run_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root_dir.join(fingerprint.as_str())
    }

    /// Fresh case directory for the given attempt.
    pub fn case_dir(&self, fingerprint: &Fingerprint, attempt: u32) -> PathBuf {
        self.run_dir(fingerprint).join(format!("case-{attempt}"))
    }

    /// Write through a temporary file so readers never see half a manifest.
    fn write_atomic(path: &Path, contents: &str) -> ResultsResult<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn save_record(&self, record: &RunRecord) -> ResultsResult<()> {
        let run_dir = self.run_dir(&record.fingerprint);
        fs::create_dir_all(&run_dir)?;
        let manifest = RunManifest {
            schema_version: MANIFEST_SCHEMA_VERSION,
            record: record.clone(),
        };
        let json = serde_json::to_string_pretty(&manifest)?;
        Self::write_atomic(&run_dir.join(MANIFEST_FILE), &json)?;
        debug!(fingerprint = %record.fingerprint, status = %record.status, "saved manifest");
        Ok(())
    }

    /// Load and cross-check a manifest. Anything unreadable or inconsistent
    /// is reported as corruption.
    pub fn load_record(&self, fingerprint: &Fingerprint) -> ResultsResult<RunRecord> {
        let path = self.run_dir(fingerprint).join(MANIFEST_FILE);
        if !path.exists() {
            return Err(ResultsError::RunNotFound {
                fingerprint: fingerprint.to_string(),
            });
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| ResultsError::corruption(fingerprint, format!("unreadable manifest: {e}")))?;
        let manifest: RunManifest = serde_json::from_str(&content)
            .map_err(|e| ResultsError::corruption(fingerprint, format!("malformed manifest: {e}")))?;

        if manifest.schema_version > MANIFEST_SCHEMA_VERSION {
            return Err(ResultsError::corruption(
                fingerprint,
                format!("unsupported manifest version {}", manifest.schema_version),
            ));
        }
        let record = manifest.record;
        if &record.fingerprint != fingerprint {
            return Err(ResultsError::corruption(
                fingerprint,
                format!("manifest names a different run {}", record.fingerprint),
            ));
        }
        if record.request.fingerprint().ok().as_ref() != Some(fingerprint) {
            return Err(ResultsError::corruption(
                fingerprint,
                "stored request does not hash to its fingerprint",
            ));
        }
        Ok(record)
    }

    pub fn save_fields(&self, fingerprint: &Fingerprint, fields: &ResultFields) -> ResultsResult<()> {
        let run_dir = self.run_dir(fingerprint);
        fs::create_dir_all(&run_dir)?;
        let json = serde_json::to_string(fields)?;
        Self::write_atomic(&run_dir.join(FIELDS_FILE), &json)
    }

    pub fn has_fields(&self, fingerprint: &Fingerprint) -> bool {
        self.run_dir(fingerprint).join(FIELDS_FILE).is_file()
    }

    pub fn load_fields(&self, fingerprint: &Fingerprint) -> ResultsResult<ResultFields> {
        let path = self.run_dir(fingerprint).join(FIELDS_FILE);
        let content = fs::read_to_string(&path)
            .map_err(|e| ResultsError::corruption(fingerprint, format!("missing fields: {e}")))?;
        let fields: ResultFields = serde_json::from_str(&content)
            .map_err(|e| ResultsError::corruption(fingerprint, format!("malformed fields: {e}")))?;
        if fields.velocity.len() != fields.pressure.len() {
            return Err(ResultsError::corruption(
                fingerprint,
                "pressure and velocity cell counts differ",
            ));
        }
        Ok(fields)
    }

    pub fn delete_fields(&self, fingerprint: &Fingerprint) -> ResultsResult<()> {
        let fields = self.run_dir(fingerprint).join(FIELDS_FILE);
        if fields.exists() {
            fs::remove_file(fields)?;
        }
        Ok(())
    }

    /// Remove stored fields and any case directories, keeping the manifest.
    pub fn delete_data(&self, fingerprint: &Fingerprint) -> ResultsResult<()> {
        self.delete_fields(fingerprint)?;
        let run_dir = self.run_dir(fingerprint);
        if run_dir.is_dir() {
            for entry in fs::read_dir(&run_dir)? {
                let entry = entry?;
                let is_case = entry.file_name().to_string_lossy().starts_with("case-");
                if is_case && entry.file_type()?.is_dir() {
                    fs::remove_dir_all(entry.path())?;
                }
            }
        }
        Ok(())
    }

    /// Names of run directories, valid fingerprints only.
    pub fn fingerprints(&self) -> ResultsResult<Vec<Fingerprint>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Ok(fp) = entry.file_name().to_string_lossy().parse::<Fingerprint>() {
                out.push(fp);
            }
        }
        out.sort();
        Ok(out)
    }
}
