use crate::error::{IndexError, Result};
use crate::models::EntryMetadata;
use crate::stores::layout::IndexPaths;
use crate::stores::vec1::{encode_counts, write_header, write_vector, COUNT_OFFSET};
use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use tracing::debug;

/// Streams one index to disk entry by entry.
///
/// The vector file starts with a provisional header (`count = 0`, `dim = 0`)
/// and both JSON files start with `[`. The real counts are only written by
/// [`IndexWriter::finish`]; an abandoned writer leaves the provisional
/// header and unterminated arrays behind, which `VectorStore::load` rejects.
#[derive(Debug)]
pub struct IndexWriter {
    paths: IndexPaths,
    vectors: BufWriter<File>,
    ids: BufWriter<File>,
    metadata: BufWriter<File>,
    count: usize,
    dim: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenIndex {
    pub count: usize,
    pub dim: usize,
}

impl IndexWriter {
    /// Opens all three files, truncating any previous index. Files opened
    /// before a failing one are closed when this returns an error.
    pub fn create(paths: IndexPaths) -> Result<Self> {
        if let Some(parent) = paths.vectors.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut vectors = BufWriter::new(File::create(&paths.vectors)?);
        let mut ids = BufWriter::new(File::create(&paths.ids)?);
        let mut metadata = BufWriter::new(File::create(&paths.metadata)?);

        write_header(&mut vectors, 0, 0)?;
        ids.write_all(b"[")?;
        metadata.write_all(b"[")?;

        Ok(Self {
            paths,
            vectors,
            ids,
            metadata,
            count: 0,
            dim: None,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Appends one entry. The first vector fixes the dimension for the rest
    /// of the run.
    pub fn append(
        &mut self,
        vector: &[f32],
        id: &str,
        metadata: &EntryMetadata,
    ) -> Result<()> {
        match self.dim {
            None => self.dim = Some(vector.len()),
            Some(dim) if dim != vector.len() => {
                return Err(IndexError::DimensionChanged {
                    expected: dim,
                    actual: vector.len(),
                })
            }
            Some(_) => {}
        }

        write_vector(&mut self.vectors, vector)?;

        if self.count > 0 {
            self.ids.write_all(b",")?;
            self.metadata.write_all(b",")?;
        }
        serde_json::to_writer(&mut self.ids, id)?;
        serde_json::to_writer(&mut self.metadata, metadata)?;

        self.count += 1;
        Ok(())
    }

    /// Closes both JSON arrays and patches the real `count` and `dim` into
    /// the header. A run that wrote nothing gets `dim = 1` so the file still
    /// loads as an empty index.
    pub fn finish(mut self) -> Result<WrittenIndex> {
        self.ids.write_all(b"]")?;
        self.ids.flush()?;
        self.metadata.write_all(b"]")?;
        self.metadata.flush()?;

        let dim = self.dim.unwrap_or(1);
        let count = i32::try_from(self.count).map_err(|_| too_large("count", self.count))?;
        let dim_field = i32::try_from(dim).map_err(|_| too_large("dim", dim))?;

        let mut file = self.vectors.into_inner().map_err(|error| error.into_error())?;
        file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        file.write_all(&encode_counts(count, dim_field))?;
        file.sync_all()?;

        debug!(count = self.count, dim, path = %self.paths.vectors.display(), "index finalized");
        Ok(WrittenIndex {
            count: self.count,
            dim,
        })
    }

    /// Flushes what was written and closes the files without finalizing.
    pub fn abandon(mut self) -> IndexPaths {
        let _ = self.vectors.flush();
        let _ = self.ids.flush();
        let _ = self.metadata.flush();
        debug!(count = self.count, path = %self.paths.vectors.display(), "index abandoned");
        self.paths
    }
}

fn too_large(field: &str, value: usize) -> IndexError {
    IndexError::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{field} {value} does not fit the VEC1 header"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::vec1::HEADER_LEN;
    use tempfile::tempdir;

    fn meta(page: u32, chunk: u32) -> EntryMetadata {
        EntryMetadata {
            file: "/books/a.pdf".to_string(),
            page,
            chunk,
            model: "m".to_string(),
            provider: "ollama".to_string(),
        }
    }

    #[test]
    fn finished_index_has_patched_header_and_closed_arrays() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let paths = IndexPaths::from_base(&dir.path().join("nested/index_x_m"));
        let mut writer = IndexWriter::create(paths.clone())?;
        writer.append(&[1.0, 2.0], "0", &meta(1, 0))?;
        writer.append(&[3.0, 4.0], "1", &meta(1, 1))?;
        let written = writer.finish()?;

        assert_eq!(written, WrittenIndex { count: 2, dim: 2 });
        let bytes = fs::read(&paths.vectors)?;
        assert_eq!(bytes.len() as u64, HEADER_LEN + 16);
        assert_eq!(&bytes[4..12], &encode_counts(2, 2));
        assert_eq!(fs::read_to_string(&paths.ids)?, r#"["0","1"]"#);

        let entries: Vec<EntryMetadata> = serde_json::from_str(&fs::read_to_string(&paths.metadata)?)?;
        assert_eq!(entries, vec![meta(1, 0), meta(1, 1)]);
        Ok(())
    }

    #[test]
    fn empty_run_is_well_formed() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let paths = IndexPaths::from_base(&dir.path().join("index_x_m"));
        let written = IndexWriter::create(paths.clone())?.finish()?;

        assert_eq!(written, WrittenIndex { count: 0, dim: 1 });
        assert_eq!(&fs::read(&paths.vectors)?[4..12], &encode_counts(0, 1));
        assert_eq!(fs::read_to_string(&paths.ids)?, "[]");
        assert_eq!(fs::read_to_string(&paths.metadata)?, "[]");
        Ok(())
    }

    #[test]
    fn abandoned_index_keeps_placeholders() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let paths = IndexPaths::from_base(&dir.path().join("index_x_m"));
        let mut writer = IndexWriter::create(paths.clone())?;
        writer.append(&[1.0], "0", &meta(2, 0))?;
        writer.abandon();

        let bytes = fs::read(&paths.vectors)?;
        assert_eq!(&bytes[4..12], &encode_counts(0, 0));
        assert_eq!(bytes.len() as u64, HEADER_LEN + 4);
        assert_eq!(fs::read_to_string(&paths.ids)?, r#"["0""#);
        assert!(!fs::read_to_string(&paths.metadata)?.ends_with(']'));
        Ok(())
    }

    #[test]
    fn dimension_must_stay_constant() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut writer = IndexWriter::create(IndexPaths::from_base(&dir.path().join("i")))?;
        writer.append(&[1.0, 2.0], "0", &meta(1, 0))?;
        let error = writer.append(&[1.0], "1", &meta(1, 1));
        assert!(matches!(
            error,
            Err(IndexError::DimensionChanged { expected: 2, actual: 1 })
        ));
        Ok(())
    }

    #[test]
    fn unwritable_location_is_an_io_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x")?;
        let result = IndexWriter::create(IndexPaths::from_base(&blocker.join("index")));
        assert!(matches!(result, Err(IndexError::Io(_))));
        Ok(())
    }
}
