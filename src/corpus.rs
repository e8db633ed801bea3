use std::fs;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::error::RasffError;
use crate::store::{Store, modified_at};

pub const ROOT_ELEMENT: &str = "Data";

static PROLOG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\?xml[^?]*\?>").expect("valid prolog pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusSource {
    Built { shards: usize },
    Cached,
}

/// Served from the cache although some shard is newer than the corpus file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staleness {
    pub newer_shards: Vec<Utf8PathBuf>,
}

#[derive(Debug)]
pub struct Corpus {
    path: Utf8PathBuf,
    content: String,
    source: CorpusSource,
    staleness: Option<Staleness>,
}

impl Corpus {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn source(&self) -> CorpusSource {
        self.source
    }

    pub fn staleness(&self) -> Option<&Staleness> {
        self.staleness.as_ref()
    }
}

/// Builds the merged corpus once per value; later calls hand out the same `Arc`.
pub struct CorpusMerger {
    store: Store,
    corpus: Mutex<Option<Arc<Corpus>>>,
}

impl CorpusMerger {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            corpus: Mutex::new(None),
        }
    }

    /// Returns the corpus file if it exists, otherwise merges the shards into it.
    pub fn build(&self) -> Result<Arc<Corpus>, RasffError> {
        self.build_with(false)
    }

    /// Like [`CorpusMerger::build`] but ignores an existing corpus file.
    pub fn rebuild(&self) -> Result<Arc<Corpus>, RasffError> {
        self.build_with(true)
    }

    fn build_with(&self, force: bool) -> Result<Arc<Corpus>, RasffError> {
        let mut memo = self
            .corpus
            .lock()
            .map_err(|_| RasffError::Filesystem("corpus cache lock poisoned".to_string()))?;
        if !force {
            if let Some(corpus) = memo.as_ref() {
                return Ok(Arc::clone(corpus));
            }
        }
        let corpus = Arc::new(build_corpus(&self.store, force)?);
        *memo = Some(Arc::clone(&corpus));
        Ok(corpus)
    }
}

/// Presence-gated merge of every shard in the store into one `<Data>` document.
pub fn build_corpus(store: &Store, force: bool) -> Result<Corpus, RasffError> {
    let path = store.corpus_path();
    if !force && path.as_std_path().exists() {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| RasffError::Filesystem(format!("read {path}: {err}")))?;
        let staleness = detect_staleness(store, &path)?;
        if let Some(stale) = &staleness {
            tracing::warn!(
                corpus = %path,
                newer_shards = stale.newer_shards.len(),
                "serving cached corpus older than its shards; rebuild with --force"
            );
        }
        return Ok(Corpus {
            path,
            content,
            source: CorpusSource::Cached,
            staleness,
        });
    }

    let shards = store.list_shards()?;
    if shards.is_empty() {
        return Err(RasffError::NoShards(store.shard_dir().to_string()));
    }
    let mut bodies = Vec::with_capacity(shards.len());
    for shard in &shards {
        let body = fs::read_to_string(shard.as_std_path())
            .map_err(|err| RasffError::Filesystem(format!("read {shard}: {err}")))?;
        bodies.push(body);
    }
    let content = merge_shards(bodies.iter().map(String::as_str));
    Store::write_bytes_atomic(&path, content.as_bytes())?;
    tracing::info!(corpus = %path, shards = shards.len(), "corpus built");

    Ok(Corpus {
        path,
        content,
        source: CorpusSource::Built {
            shards: shards.len(),
        },
        staleness: None,
    })
}

/// Concatenates shard bodies without their XML declarations under one synthetic root.
pub fn merge_shards<'a>(bodies: impl Iterator<Item = &'a str>) -> String {
    let mut data = format!("<{ROOT_ELEMENT}>\n");
    for body in bodies {
        data.push_str(&PROLOG.replace_all(body, ""));
        data.push('\n');
    }
    data.push_str(&format!("</{ROOT_ELEMENT}>\n"));
    data
}

fn detect_staleness(store: &Store, corpus: &Utf8Path) -> Result<Option<Staleness>, RasffError> {
    let built_at: SystemTime = modified_at(corpus)?;
    let mut newer_shards = Vec::new();
    for shard in store.list_shards()? {
        if modified_at(&shard)? > built_at {
            newer_shards.push(shard);
        }
    }
    if newer_shards.is_empty() {
        return Ok(None);
    }
    Ok(Some(Staleness { newer_shards }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_strips_every_prolog() {
        let merged = merge_shards(
            [
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<A/>",
                "<?xml version='1.0'?><B/>\n<?xml version=\"1.0\" encoding=\"UTF-8\"?><C/>",
            ]
            .into_iter(),
        );
        assert!(!merged.contains("<?xml"));
        assert!(merged.starts_with("<Data>\n"));
        assert!(merged.trim_end().ends_with("</Data>"));
        assert!(merged.contains("<A/>") && merged.contains("<B/>") && merged.contains("<C/>"));
    }
}
