use crate::error::{FormatError, IndexError, Result};
use crate::models::{EntryMetadata, Metric};
use crate::stores::layout::IndexPaths;
use crate::stores::vec1::{read_header, read_vectors, write_header, write_vector, HEADER_LEN};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// An index held in memory: `vectors[i]` is identified by `ids[i]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorStore {
    vectors: Vec<Vec<f32>>,
    ids: Vec<String>,
}

/// Position of an entry in the store and its score under the chosen metric.
/// Higher is always better; L2 scores are negated distances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredIndex {
    pub index: usize,
    pub score: f32,
}

impl VectorStore {
    pub fn new(vectors: Vec<Vec<f32>>, ids: Vec<String>) -> Result<Self> {
        if vectors.len() != ids.len() {
            return Err(FormatError::CountMismatch {
                vectors: vectors.len(),
                ids: ids.len(),
            }
            .into());
        }
        if let Some(first) = vectors.first() {
            let dim = first.len();
            if let Some(other) = vectors.iter().find(|vector| vector.len() != dim) {
                return Err(IndexError::DimensionChanged {
                    expected: dim,
                    actual: other.len(),
                });
            }
        }
        Ok(Self { vectors, ids })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dim(&self) -> Option<usize> {
        self.vectors.first().map(Vec::len)
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Writes the `VEC1` file and the parallel id array in one go.
    pub fn save(&self, bin_path: &Path, ids_path: &Path) -> Result<()> {
        let mut vectors = BufWriter::new(File::create(bin_path)?);
        let mut ids = BufWriter::new(File::create(ids_path)?);

        let count = header_field(self.len())?;
        let dim = header_field(self.dim().unwrap_or(1))?;
        write_header(&mut vectors, count, dim)?;
        for vector in &self.vectors {
            write_vector(&mut vectors, vector)?;
        }
        vectors.flush()?;

        serde_json::to_writer(&mut ids, &self.ids)?;
        ids.flush()?;

        debug!(count = self.len(), path = %bin_path.display(), "vector store saved");
        Ok(())
    }

    pub fn load(bin_path: &Path, ids_path: &Path) -> Result<Self> {
        let file = File::open(bin_path)?;
        let payload_len = file.metadata()?.len().saturating_sub(HEADER_LEN);
        let mut reader = BufReader::new(file);
        let (count, dim) = read_header(&mut reader)?;
        let vectors = read_vectors(&mut reader, count, dim, payload_len)?;

        let raw = fs::read(ids_path)?;
        let ids: Vec<String> =
            serde_json::from_slice(&raw).map_err(|_| IndexError::Format(FormatError::InvalidIds))?;

        if ids.len() != vectors.len() {
            return Err(FormatError::CountMismatch {
                vectors: vectors.len(),
                ids: ids.len(),
            }
            .into());
        }

        debug!(count, dim, path = %bin_path.display(), "vector store loaded");
        Ok(Self { vectors, ids })
    }

    /// Scores every stored vector against `query` and returns the `k` best,
    /// highest score first. Equal scores keep their insertion order.
    pub fn top_k(&self, query: &[f32], k: usize, metric: Metric) -> Vec<ScoredIndex> {
        let mut scored: Vec<ScoredIndex> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(index, vector)| ScoredIndex {
                index,
                score: score(metric, query, vector) as f32,
            })
            .collect();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(k);
        scored
    }
}

fn header_field(value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| {
        IndexError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{value} does not fit the VEC1 header"),
        ))
    })
}

fn score(metric: Metric, query: &[f32], vector: &[f32]) -> f64 {
    let pairs = query.iter().zip(vector).map(|(a, b)| (f64::from(*a), f64::from(*b)));
    match metric {
        Metric::Dot => pairs.map(|(a, b)| a * b).sum(),
        Metric::Cosine => {
            let (dot, query_norm, vector_norm) = pairs.fold((0.0, 0.0, 0.0), |acc, (a, b)| {
                (acc.0 + a * b, acc.1 + a * a, acc.2 + b * b)
            });
            if query_norm == 0.0 || vector_norm == 0.0 {
                0.0
            } else {
                dot / (query_norm.sqrt() * vector_norm.sqrt())
            }
        }
        Metric::L2 => -pairs.map(|(a, b)| (a - b) * (a - b)).sum::<f64>().sqrt(),
    }
}

/// A finalized index loaded together with its metadata.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub store: VectorStore,
    pub metadata: Vec<EntryMetadata>,
}

impl IndexSnapshot {
    pub fn load(paths: &IndexPaths) -> Result<Self> {
        let store = VectorStore::load(&paths.vectors, &paths.ids)?;
        let raw = fs::read(&paths.metadata)?;
        let metadata: Vec<EntryMetadata> = serde_json::from_slice(&raw)?;

        if metadata.len() != store.len() {
            return Err(FormatError::Metadata {
                vectors: store.len(),
                entries: metadata.len(),
            }
            .into());
        }

        Ok(Self { store, metadata })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::vec1::encode_counts;
    use tempfile::tempdir;

    fn sample() -> VectorStore {
        VectorStore::new(
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.9, 0.1]],
            vec!["0".into(), "1".into(), "2".into()],
        )
        .expect("consistent store")
    }

    #[test]
    fn save_then_load_preserves_vectors_and_ids() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let bin = dir.path().join("index.bin");
        let ids = dir.path().join("index.ids.json");
        let store = VectorStore::new(
            vec![vec![0.1, -2.5, f32::MIN_POSITIVE], vec![3.25, 0.0, -0.0]],
            vec!["a".into(), "b".into()],
        )?;

        store.save(&bin, &ids)?;
        let loaded = VectorStore::load(&bin, &ids)?;

        assert_eq!(loaded.ids(), store.ids());
        for (left, right) in loaded.vectors().iter().zip(store.vectors()) {
            let left: Vec<u32> = left.iter().map(|value| value.to_bits()).collect();
            let right: Vec<u32> = right.iter().map(|value| value.to_bits()).collect();
            assert_eq!(left, right);
        }
        Ok(())
    }

    #[test]
    fn cosine_ranks_closest_direction_first() {
        let store = sample();
        let best = store.top_k(&[1.0, 0.0], 1, Metric::Cosine);
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].index, 0);
        assert!((best[0].score - 1.0).abs() < 1e-6);

        let two: Vec<usize> = store
            .top_k(&[1.0, 0.0], 2, Metric::Cosine)
            .iter()
            .map(|hit| hit.index)
            .collect();
        assert_eq!(two, vec![0, 2]);
    }

    #[test]
    fn l2_scores_are_negated_distances() {
        let store = VectorStore::new(
            vec![vec![5.0, 0.0], vec![1.5, 0.0], vec![3.0, 0.0]],
            vec!["0".into(), "1".into(), "2".into()],
        )
        .expect("consistent store");
        let hits = store.top_k(&[1.0, 0.0], 3, Metric::L2);
        let order: Vec<usize> = hits.iter().map(|hit| hit.index).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert!((hits[0].score + 0.5).abs() < 1e-6);
        assert!(hits.iter().all(|hit| hit.score <= 0.0));
    }

    #[test]
    fn dot_is_unnormalized_and_ties_keep_insertion_order() {
        let store = VectorStore::new(
            vec![vec![1.0, 1.0], vec![2.0, 2.0], vec![1.0, 1.0]],
            vec!["0".into(), "1".into(), "2".into()],
        )
        .expect("consistent store");
        let order: Vec<usize> = store
            .top_k(&[1.0, 1.0], 3, Metric::Dot)
            .iter()
            .map(|hit| hit.index)
            .collect();
        assert_eq!(order, vec![1, 0, 2]);

        let cosine: Vec<usize> = store
            .top_k(&[1.0, 1.0], 3, Metric::Cosine)
            .iter()
            .map(|hit| hit.index)
            .collect();
        assert_eq!(cosine, vec![0, 1, 2]);
    }

    #[test]
    fn zero_norm_scores_zero_under_cosine() {
        let store = VectorStore::new(vec![vec![0.0, 0.0]], vec!["0".into()]).expect("store");
        let hits = store.top_k(&[1.0, 0.0], 5, Metric::Cosine);
        assert_eq!(hits, vec![ScoredIndex { index: 0, score: 0.0 }]);
    }

    #[test]
    fn load_rejects_bad_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let bin = dir.path().join("index.bin");
        let ids = dir.path().join("index.ids.json");
        sample().save(&bin, &ids)?;

        let mut bytes = fs::read(&bin)?;
        bytes[..4].copy_from_slice(b"VEC0");
        let bad_magic = dir.path().join("magic.bin");
        fs::write(&bad_magic, &bytes)?;
        assert!(matches!(
            VectorStore::load(&bad_magic, &ids),
            Err(IndexError::Format(FormatError::BadMagic))
        ));

        let mut bytes = fs::read(&bin)?;
        bytes[4..12].copy_from_slice(&encode_counts(3, 0));
        let zero_dim = dir.path().join("zero.bin");
        fs::write(&zero_dim, &bytes)?;
        assert!(matches!(
            VectorStore::load(&zero_dim, &ids),
            Err(IndexError::Format(FormatError::InvalidHeader { count: 3, dim: 0 }))
        ));

        let short_ids = dir.path().join("short.ids.json");
        fs::write(&short_ids, r#"["0","1"]"#)?;
        assert!(matches!(
            VectorStore::load(&bin, &short_ids),
            Err(IndexError::Format(FormatError::CountMismatch { vectors: 3, ids: 2 }))
        ));

        let numeric_ids = dir.path().join("numbers.ids.json");
        fs::write(&numeric_ids, "[0,1,2]")?;
        assert!(matches!(
            VectorStore::load(&bin, &numeric_ids),
            Err(IndexError::Format(FormatError::InvalidIds))
        ));
        Ok(())
    }

    #[test]
    fn huge_header_without_payload_is_a_format_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let bin = dir.path().join("huge.bin");
        let ids = dir.path().join("huge.ids.json");
        let mut bytes = b"VEC1".to_vec();
        bytes.extend_from_slice(&encode_counts(i32::MAX, i32::MAX));
        fs::write(&bin, &bytes)?;
        fs::write(&ids, "[]")?;

        assert!(matches!(
            VectorStore::load(&bin, &ids),
            Err(IndexError::Format(FormatError::Truncated { .. }))
        ));
        Ok(())
    }

    #[test]
    fn save_to_missing_directory_is_an_io_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let missing = dir.path().join("missing");
        let result = sample().save(&missing.join("i.bin"), &missing.join("i.ids.json"));
        assert!(matches!(result, Err(IndexError::Io(_))));
        Ok(())
    }

    #[test]
    fn empty_store_round_trips() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let bin = dir.path().join("empty.bin");
        let ids = dir.path().join("empty.ids.json");
        VectorStore::default().save(&bin, &ids)?;
        let loaded = VectorStore::load(&bin, &ids)?;
        assert!(loaded.is_empty());
        assert!(loaded.top_k(&[1.0], 3, Metric::Cosine).is_empty());
        Ok(())
    }

    #[test]
    fn snapshot_requires_matching_metadata() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let paths = IndexPaths::from_base(&dir.path().join("index_x_m"));
        sample().save(&paths.vectors, &paths.ids)?;
        fs::write(&paths.metadata, "[]")?;
        assert!(matches!(
            IndexSnapshot::load(&paths),
            Err(IndexError::Format(FormatError::Metadata { vectors: 3, entries: 0 }))
        ));
        Ok(())
    }
}
