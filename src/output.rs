//! On-disk layout of generated files
//!
//! ```text
//! {output_dir}/{sitemap_id}/1.xml
//! {output_dir}/{sitemap_id}/2.xml
//! {output_dir}/{sitemap_id}/index.xml
//! ```

use crate::error::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const INDEX_FILE: &str = "index.xml";

/// Maps sitemap chunks to file paths
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sitemap_dir(&self, sitemap_id: &str) -> PathBuf {
        self.root.join(sitemap_id)
    }

    pub fn chunk_path(&self, sitemap_id: &str, chunk: i64) -> PathBuf {
        self.sitemap_dir(sitemap_id).join(format!("{}.xml", chunk))
    }

    pub fn index_path(&self, sitemap_id: &str) -> PathBuf {
        self.sitemap_dir(sitemap_id).join(INDEX_FILE)
    }

    /// Chunk numbers currently present on disk, ascending
    pub fn existing_chunks(&self, sitemap_id: &str) -> Result<Vec<i64>> {
        let dir = self.sitemap_dir(sitemap_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut chunks = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".xml")) else {
                continue;
            };
            if let Ok(chunk) = stem.parse::<i64>() {
                chunks.push(chunk);
            }
        }
        chunks.sort_unstable();
        Ok(chunks)
    }

    /// Delete chunk files numbered above `keep`, and the index when `keep <= 1`.
    /// Chunk 1 always stays so an empty sitemap is still a valid document.
    ///
    /// Returns the number of files removed.
    pub fn remove_stale(&self, sitemap_id: &str, keep: i64) -> Result<usize> {
        let mut removed = 0;
        for chunk in self.existing_chunks(sitemap_id)? {
            if chunk > keep.max(1) {
                let path = self.chunk_path(sitemap_id, chunk);
                removed += remove_with_gzip(&path)?;
            }
        }
        if keep <= 1 {
            removed += remove_with_gzip(&self.index_path(sitemap_id))?;
        }
        if removed > 0 {
            debug!(sitemap = sitemap_id, removed, "Removed stale sitemap files");
        }
        Ok(removed)
    }

    /// Delete every file of a sitemap, then its directory if it is left empty
    pub fn remove_sitemap(&self, sitemap_id: &str) -> Result<usize> {
        let mut removed = remove_with_gzip(&self.index_path(sitemap_id))?;
        for chunk in self.existing_chunks(sitemap_id)? {
            removed += remove_with_gzip(&self.chunk_path(sitemap_id, chunk))?;
        }
        if let Err(e) = fs::remove_dir(self.sitemap_dir(sitemap_id)) {
            debug!(sitemap = sitemap_id, "Kept sitemap directory: {}", e);
        }
        Ok(removed)
    }
}

fn remove_if_exists(path: &Path) -> Result<usize> {
    match fs::remove_file(path) {
        Ok(()) => Ok(1),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Remove `path` and its `.gz` copy
pub fn remove_with_gzip(path: &Path) -> Result<usize> {
    let mut removed = remove_if_exists(path)?;
    let mut gz = path.as_os_str().to_os_string();
    gz.push(".gz");
    removed += remove_if_exists(Path::new(&gz))?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths() {
        let layout = OutputLayout::new("/srv/sitemaps");
        assert_eq!(
            layout.chunk_path("abc", 2),
            PathBuf::from("/srv/sitemaps/abc/2.xml")
        );
        assert_eq!(
            layout.index_path("abc"),
            PathBuf::from("/srv/sitemaps/abc/index.xml")
        );
    }

    #[test]
    fn test_remove_stale_keeps_current_chunks() {
        let tmp = TempDir::new().unwrap();
        let layout = OutputLayout::new(tmp.path());
        let dir = layout.sitemap_dir("s");
        fs::create_dir_all(&dir).unwrap();
        for name in ["1.xml", "2.xml", "3.xml", "3.xml.gz", "4.xml", "index.xml", "notes.txt"] {
            fs::write(dir.join(name), "x").unwrap();
        }

        assert_eq!(layout.existing_chunks("s").unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(layout.remove_stale("s", 2).unwrap(), 3);
        assert_eq!(layout.existing_chunks("s").unwrap(), vec![1, 2]);
        assert!(dir.join("index.xml").exists());
        assert!(dir.join("notes.txt").exists());

        assert_eq!(layout.remove_stale("s", 1).unwrap(), 2);
        assert_eq!(layout.existing_chunks("s").unwrap(), vec![1]);
        assert!(!dir.join("index.xml").exists());
    }

    #[test]
    fn test_empty_sitemap_keeps_first_chunk() {
        let tmp = TempDir::new().unwrap();
        let layout = OutputLayout::new(tmp.path());
        let dir = layout.sitemap_dir("s");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("1.xml"), "x").unwrap();
        fs::write(dir.join("2.xml"), "x").unwrap();

        layout.remove_stale("s", 0).unwrap();
        assert_eq!(layout.existing_chunks("s").unwrap(), vec![1]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let tmp = TempDir::new().unwrap();
        let layout = OutputLayout::new(tmp.path());
        assert!(layout.existing_chunks("missing").unwrap().is_empty());
        assert_eq!(layout.remove_stale("missing", 0).unwrap(), 0);
    }

    #[test]
    fn test_remove_sitemap_deletes_everything() {
        let tmp = TempDir::new().unwrap();
        let layout = OutputLayout::new(tmp.path());
        let dir = layout.sitemap_dir("s");
        fs::create_dir_all(&dir).unwrap();
        for name in ["1.xml", "1.xml.gz", "2.xml", "index.xml"] {
            fs::write(dir.join(name), "x").unwrap();
        }

        assert_eq!(layout.remove_sitemap("s").unwrap(), 4);
        assert!(!dir.exists());
        assert_eq!(layout.remove_sitemap("s").unwrap(), 0);
    }
}
