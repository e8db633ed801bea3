use std::collections::HashSet;
use std::fs;
use std::io;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::domain::ReferenceId;
use crate::error::RasffError;

const REFERENCES_FILE: &str = "references.txt";
const CORPUS_FILE: &str = "data.xml";
const RAW_DIR: &str = "raw";
const SUMMARY_FILE: &str = "fetch_summary.json";
const SHARD_PREFIX: &str = "data_thread_";
const ERROR_PREFIX: &str = "error_thread_";

/// On-disk layout of every artifact the pipeline persists.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

/// Outcome of loading the cached reference list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceList {
    Loaded(Vec<ReferenceId>),
    Empty,
    Missing,
}

impl ReferenceList {
    pub fn into_vec(self) -> Vec<ReferenceId> {
        match self {
            ReferenceList::Loaded(references) => references,
            ReferenceList::Empty | ReferenceList::Missing => Vec::new(),
        }
    }
}

impl Store {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn references_path(&self) -> Utf8PathBuf {
        self.root.join(REFERENCES_FILE)
    }

    pub fn shard_dir(&self) -> Utf8PathBuf {
        self.root.join(RAW_DIR)
    }

    pub fn shard_path(&self, worker: usize) -> Utf8PathBuf {
        self.shard_dir().join(format!("{SHARD_PREFIX}{worker}.xml"))
    }

    pub fn error_path(&self, worker: usize) -> Utf8PathBuf {
        self.shard_dir().join(format!("{ERROR_PREFIX}{worker}.txt"))
    }

    pub fn corpus_path(&self) -> Utf8PathBuf {
        self.root.join(CORPUS_FILE)
    }

    pub fn summary_path(&self) -> Utf8PathBuf {
        self.shard_dir().join(SUMMARY_FILE)
    }

    pub fn ensure_root(&self) -> Result<(), RasffError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| RasffError::Filesystem(err.to_string()))
    }

    pub fn load_references(&self) -> Result<ReferenceList, RasffError> {
        let path = self.references_path();
        let content = match fs::read_to_string(path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(ReferenceList::Missing),
            Err(err) => {
                return Err(RasffError::Filesystem(format!("read {path}: {err}")));
            }
        };
        let references = parse_reference_lines(&content).map_err(|(line, value)| {
            RasffError::CorruptReferenceList {
                path: path.to_string(),
                line,
                value,
            }
        })?;
        if references.is_empty() {
            return Ok(ReferenceList::Empty);
        }
        Ok(ReferenceList::Loaded(references))
    }

    /// Merges `references` into the persisted list. Existing lines keep their order,
    /// unseen IDs are appended, duplicates are dropped.
    pub fn save_references(&self, references: &[ReferenceId]) -> Result<usize, RasffError> {
        let mut merged = self.load_references()?.into_vec();
        let mut seen: HashSet<ReferenceId> = merged.iter().cloned().collect();
        for reference in references {
            if seen.insert(reference.clone()) {
                merged.push(reference.clone());
            }
        }
        let content = join_lines(merged.iter().map(ReferenceId::as_str));
        Self::write_bytes_atomic(&self.references_path(), content.as_bytes())?;
        Ok(merged.len())
    }

    /// Failed IDs recorded by the last fetch run, in worker order.
    pub fn load_failed_references(&self) -> Result<Vec<ReferenceId>, RasffError> {
        let mut failed = Vec::new();
        for path in self.list_shard_files(ERROR_PREFIX, "txt")? {
            let content = fs::read_to_string(path.as_std_path())
                .map_err(|err| RasffError::Filesystem(format!("read {path}: {err}")))?;
            let references = parse_reference_lines(&content).map_err(|(line, value)| {
                RasffError::CorruptReferenceList {
                    path: path.to_string(),
                    line,
                    value,
                }
            })?;
            failed.extend(references);
        }
        Ok(failed)
    }

    /// Removes error files numbered up to `through`. Files written after that shard
    /// number stay in place.
    pub fn clear_error_files(&self, through: usize) -> Result<(), RasffError> {
        let files = self.list_shard_files(ERROR_PREFIX, "txt")?;
        let stale = files
            .into_iter()
            .filter(|path| file_index(path).is_some_and(|index| index <= through));
        for path in stale {
            fs::remove_file(path.as_std_path())
                .map_err(|err| RasffError::Filesystem(format!("remove {path}: {err}")))?;
        }
        Ok(())
    }

    /// Removes every shard and error file, leaving the reference list and corpus alone.
    pub fn clear_shards(&self) -> Result<(), RasffError> {
        let mut files = self.list_shard_files(SHARD_PREFIX, "xml")?;
        files.extend(self.list_shard_files(ERROR_PREFIX, "txt")?);
        for path in files {
            fs::remove_file(path.as_std_path())
                .map_err(|err| RasffError::Filesystem(format!("remove {path}: {err}")))?;
        }
        Ok(())
    }

    /// Highest shard number present, 0 when there are none.
    pub fn last_shard_index(&self) -> Result<usize, RasffError> {
        let last = self
            .list_shard_files(SHARD_PREFIX, "xml")?
            .iter()
            .filter_map(|path| file_index(path))
            .max()
            .unwrap_or(0);
        Ok(last)
    }

    /// `.xml` files in the shard directory, in shard-number order.
    pub fn list_shards(&self) -> Result<Vec<Utf8PathBuf>, RasffError> {
        self.list_shard_files("", "xml")
    }

    fn list_shard_files(&self, prefix: &str, ext: &str) -> Result<Vec<Utf8PathBuf>, RasffError> {
        let dir = self.shard_dir();
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| RasffError::Filesystem(format!("read dir {dir}: {err}")))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| RasffError::Filesystem(err.to_string()))?;
            let path = Utf8PathBuf::from_path_buf(entry.path())
                .map_err(|path| RasffError::Filesystem(format!("non UTF-8 path {}", path.display())))?;
            let matches = path.is_file()
                && path.extension() == Some(ext)
                && path
                    .file_name()
                    .map(|name| name.starts_with(prefix))
                    .unwrap_or(false);
            if matches {
                files.push(path);
            }
        }
        files.sort_by(|a, b| {
            let key = |path: &Utf8PathBuf| (file_index(path).unwrap_or(usize::MAX), path.clone());
            key(a).cmp(&key(b))
        });
        Ok(files)
    }

    pub fn write_summary<T: Serialize>(&self, summary: &T) -> Result<(), RasffError> {
        let content = serde_json::to_vec_pretty(summary)
            .map_err(|err| RasffError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(&self.summary_path(), &content)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), RasffError> {
        let parent = path
            .parent()
            .ok_or_else(|| RasffError::Filesystem(format!("invalid destination path {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| RasffError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".rasff-write")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| RasffError::Filesystem(err.to_string()))?;
        io::Write::write_all(&mut temp, content)
            .map_err(|err| RasffError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| RasffError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

pub fn modified_at(path: &Utf8Path) -> Result<SystemTime, RasffError> {
    fs::metadata(path.as_std_path())
        .and_then(|meta| meta.modified())
        .map_err(|err| RasffError::Filesystem(format!("stat {path}: {err}")))
}

/// Trailing number of a shard or error file name, `data_thread_12.xml` gives 12.
fn file_index(path: &Utf8Path) -> Option<usize> {
    path.file_stem()?.rsplit('_').next()?.parse().ok()
}

pub fn join_lines<'a>(lines: impl Iterator<Item = &'a str>) -> String {
    lines.collect::<Vec<_>>().join("\n")
}

fn parse_reference_lines(content: &str) -> Result<Vec<ReferenceId>, (usize, String)> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            line.parse::<ReferenceId>()
                .map_err(|_| (index + 1, line.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new("data");
        assert_eq!(store.references_path(), Utf8PathBuf::from("data/references.txt"));
        assert_eq!(store.corpus_path(), Utf8PathBuf::from("data/data.xml"));
        assert!(store.shard_path(3).ends_with("raw/data_thread_3.xml"));
        assert!(store.error_path(3).ends_with("raw/error_thread_3.txt"));
    }
}
