//! Incremental Compilation
//!
//! Large files are split into fixed-size line chunks. Only chunks whose hash
//! changed since the last successful compilation of the same file key are
//! lowered again; the rest reuse their stored output.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::cache::compute_hash;
use crate::model::IncrementalSummary;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub chunk_index: usize,
    pub source_hash: String,
    pub lowered_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDiff {
    pub changed: Vec<usize>,
    pub chunks: Vec<Chunk>,
}

impl ChunkDiff {
    pub fn summary(&self) -> IncrementalSummary {
        IncrementalSummary {
            changed_chunks: self.changed.len(),
            total_chunks: self.chunks.len(),
        }
    }
}

/// Splits on `\n` into groups of `chunk_lines` lines; the last group may be
/// shorter. Joining chunk texts with `\n` gives back the input.
pub fn partition(text: &str, chunk_lines: usize) -> Vec<Chunk> {
    let lines: Vec<&str> = text.split('\n').collect();
    lines
        .par_chunks(chunk_lines.max(1))
        .enumerate()
        .map(|(index, group)| {
            let text = group.join("\n");
            let hash = compute_hash(&text);
            Chunk { index, text, hash }
        })
        .collect()
}

pub struct IncrementalCompiler {
    chunk_lines: usize,
    store: Mutex<HashMap<String, Vec<ChunkRecord>>>,
}

impl IncrementalCompiler {
    pub fn new(chunk_lines: usize) -> Self {
        Self {
            chunk_lines: chunk_lines.max(1),
            store: Mutex::new(HashMap::new()),
        }
    }

    pub fn chunk_lines(&self) -> usize {
        self.chunk_lines
    }

    fn store(&self) -> MutexGuard<'_, HashMap<String, Vec<ChunkRecord>>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Chunk indexes whose hash differs from the stored record, plus indexes
    /// with no record. Read-only.
    pub fn diff(&self, file_key: &str, text: &str) -> ChunkDiff {
        let chunks = partition(text, self.chunk_lines);
        let store = self.store();
        let previous = store.get(file_key);
        let changed = chunks
            .iter()
            .filter(|chunk| {
                previous
                    .and_then(|records| records.get(chunk.index))
                    .map(|record| record.source_hash != chunk.hash)
                    .unwrap_or(true)
            })
            .map(|chunk| chunk.index)
            .collect();
        ChunkDiff { changed, chunks }
    }

    /// Lowers the changed chunks with `lower` and reuses stored output for the
    /// rest. Records are replaced only once every chunk succeeded, so a failed
    /// or dropped call leaves the previous state intact.
    pub async fn compile_changed<F, Fut, E>(
        &self,
        file_key: &str,
        diff: &ChunkDiff,
        mut lower: F,
    ) -> Result<String, E>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let changed: HashSet<usize> = diff.changed.iter().copied().collect();
        let previous: HashMap<usize, ChunkRecord> = self
            .store()
            .get(file_key)
            .map(|records| records.iter().map(|r| (r.chunk_index, r.clone())).collect())
            .unwrap_or_default();

        let mut records = Vec::with_capacity(diff.chunks.len());
        let mut lowered_count = 0;
        for chunk in &diff.chunks {
            let reusable = previous
                .get(&chunk.index)
                .filter(|r| !changed.contains(&chunk.index) && r.source_hash == chunk.hash);
            let lowered_text = match reusable {
                Some(record) => record.lowered_text.clone(),
                None => {
                    lowered_count += 1;
                    lower(chunk.text.clone()).await?
                }
            };
            records.push(ChunkRecord {
                chunk_index: chunk.index,
                source_hash: chunk.hash.clone(),
                lowered_text,
            });
        }

        let output = records
            .iter()
            .map(|r| r.lowered_text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        debug!(
            file_key,
            lowered = lowered_count,
            total = records.len(),
            "incremental compilation committed"
        );
        self.store().insert(file_key.to_string(), records);
        Ok(output)
    }

    /// `diff` followed by `compile_changed`.
    pub async fn compile<F, Fut, E>(
        &self,
        file_key: &str,
        text: &str,
        lower: F,
    ) -> Result<(String, IncrementalSummary), E>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let diff = self.diff(file_key, text);
        let output = self.compile_changed(file_key, &diff, lower).await?;
        Ok((output, diff.summary()))
    }

    pub fn records(&self, file_key: &str) -> Option<Vec<ChunkRecord>> {
        self.store().get(file_key).cloned()
    }

    /// Forgets a file so its next compilation is a full one.
    pub fn clear_file(&self, file_key: &str) {
        self.store().remove(file_key);
    }

    pub fn clear_all(&self) {
        self.store().clear();
    }

    pub fn tracked_files(&self) -> usize {
        self.store().len()
    }
}

impl Default for IncrementalCompiler {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn numbered(lines: usize) -> String {
        (0..lines)
            .map(|i| format!("let v{} = {};", i, i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn upper(text: String) -> Result<String, String> {
        Ok(text.to_uppercase())
    }

    #[test]
    fn test_partition_rejoins_to_input() {
        let text = numbered(25);
        let chunks = partition(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].text.split('\n').count(), 5);
        let joined: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined.join("\n"), text);
    }

    #[test]
    fn test_first_diff_marks_everything_changed() {
        let compiler = IncrementalCompiler::new(10);
        let diff = compiler.diff("a.js", &numbered(30));
        assert_eq!(diff.changed, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_single_line_edit_changes_one_chunk() {
        let compiler = IncrementalCompiler::new(1000);
        let original = numbered(2000);
        compiler.compile("big.js", &original, upper).await.unwrap();

        let mut lines: Vec<String> = original.split('\n').map(String::from).collect();
        lines[1499] = "let edited = true;".to_string();
        let edited = lines.join("\n");

        let diff = compiler.diff("big.js", &edited);
        assert_eq!(diff.changed, vec![1]);

        let calls = AtomicUsize::new(0);
        let output = compiler
            .compile_changed("big.js", &diff, |text| {
                calls.fetch_add(1, Ordering::SeqCst);
                upper(text)
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(output, edited.to_uppercase());
    }

    #[tokio::test]
    async fn test_failure_leaves_store_untouched() {
        let compiler = IncrementalCompiler::new(5);
        let text = numbered(12);
        compiler.compile("f.js", &text, upper).await.unwrap();
        let before = compiler.records("f.js");

        let changed = text.replace("v0", "w0").replace("v11", "w11");
        let diff = compiler.diff("f.js", &changed);
        let mut seen = 0;
        let result: Result<String, String> = compiler
            .compile_changed("f.js", &diff, |t| {
                seen += 1;
                let fail = seen == 2;
                async move {
                    if fail {
                        Err("boom".to_string())
                    } else {
                        Ok(t)
                    }
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(compiler.records("f.js"), before);
    }

    #[tokio::test]
    async fn test_shrinking_file_drops_orphans() {
        let compiler = IncrementalCompiler::new(5);
        compiler.compile("f.js", &numbered(20), upper).await.unwrap();
        assert_eq!(compiler.records("f.js").unwrap().len(), 4);

        compiler.compile("f.js", &numbered(7), upper).await.unwrap();
        assert_eq!(compiler.records("f.js").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_clear_file_forces_full_recompile() {
        let compiler = IncrementalCompiler::new(5);
        let text = numbered(10);
        compiler.compile("f.js", &text, upper).await.unwrap();
        assert!(compiler.diff("f.js", &text).changed.is_empty());

        compiler.clear_file("f.js");
        assert_eq!(compiler.diff("f.js", &text).changed, vec![0, 1]);
    }
}
