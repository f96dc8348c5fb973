//! In-memory blob store.
//!
//! The in-process implementation of the [`BlobStore`] seam, used by tests
//! and local runs. Production deployments plug an external store in behind
//! the same trait.

use async_trait::async_trait;
use dashmap::DashMap;
use regex::RegexBuilder;

use openviking_core::traits::{BlobStore, FileStat, GrepMatch};
use openviking_core::{Result, VikingError};

/// Blob store backed by process memory.
pub struct MemoryBlobStore {
    files: DashMap<String, Vec<u8>>,
    dirs: DashMap<String, ()>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        let dirs = DashMap::new();
        dirs.insert("/".to_string(), ());
        Self {
            files: DashMap::new(),
            dirs,
        }
    }

    fn normalize(path: &str) -> String {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        }
    }

    fn parent_of(path: &str) -> Option<String> {
        let path = Self::normalize(path);
        if path == "/" {
            return None;
        }
        match path.rsplit_once('/') {
            Some(("", _)) => Some("/".to_string()),
            Some((parent, _)) => Some(parent.to_string()),
            None => None,
        }
    }

    fn basename(path: &str) -> String {
        Self::normalize(path)
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    fn ensure_parents(&self, path: &str) {
        let mut current = Self::parent_of(path);
        while let Some(dir) = current {
            if self.dirs.insert(dir.clone(), ()).is_some() {
                break;
            }
            current = Self::parent_of(&dir);
        }
    }

    fn direct_children(&self, dir: &str) -> Vec<FileStat> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{dir}/")
        };
        let is_direct_child = |path: &str| {
            path.strip_prefix(&prefix)
                .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
        };

        let mut entries: Vec<FileStat> = self
            .files
            .iter()
            .filter(|entry| is_direct_child(entry.key()))
            .map(|entry| FileStat::file(Self::basename(entry.key()), entry.value().len() as u64))
            .collect();
        entries.extend(
            self.dirs
                .iter()
                .filter(|entry| is_direct_child(entry.key()))
                .map(|entry| FileStat::dir(Self::basename(entry.key()))),
        );
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    fn subtree_keys(map: &DashMap<String, impl Send + Sync>, base: &str) -> Vec<String> {
        let prefix = format!("{base}/");
        map.iter()
            .map(|entry| entry.key().clone())
            .filter(|key| key == base || key.starts_with(&prefix))
            .collect()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn read(&self, path: &str, offset: Option<u64>, size: Option<u64>) -> Result<Vec<u8>> {
        let path = Self::normalize(path);
        let data = self
            .files
            .get(&path)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| VikingError::not_found("file", &path))?;
        let start = offset.unwrap_or(0) as usize;
        if start >= data.len() {
            return Ok(Vec::new());
        }
        let end = size
            .map(|s| (start + s as usize).min(data.len()))
            .unwrap_or(data.len());
        Ok(data[start..end].to_vec())
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = Self::normalize(path);
        if self.dirs.contains_key(&path) {
            return Err(VikingError::invalid_argument(format!(
                "{path} is a directory"
            )));
        }
        self.ensure_parents(&path);
        self.files.insert(path, data.to_vec());
        Ok(())
    }

    async fn ls(&self, path: &str) -> Result<Vec<FileStat>> {
        let path = Self::normalize(path);
        if self.files.contains_key(&path) {
            let size = self.files.get(&path).map(|e| e.value().len()).unwrap_or(0);
            return Ok(vec![FileStat::file(Self::basename(&path), size as u64)]);
        }
        if !self.dirs.contains_key(&path) {
            return Err(VikingError::not_found("directory", &path));
        }
        Ok(self.direct_children(&path))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let path = Self::normalize(path);
        if self.files.contains_key(&path) {
            return Err(VikingError::invalid_argument(format!("{path} is a file")));
        }
        self.ensure_parents(&path);
        self.dirs.insert(path, ());
        Ok(())
    }

    async fn rm(&self, path: &str, recursive: bool) -> Result<()> {
        let path = Self::normalize(path);
        if self.files.remove(&path).is_some() {
            return Ok(());
        }
        if !self.dirs.contains_key(&path) {
            return Err(VikingError::not_found("path", &path));
        }
        if !recursive && !self.direct_children(&path).is_empty() {
            return Err(VikingError::invalid_argument(format!(
                "{path} is not empty"
            )));
        }
        for key in Self::subtree_keys(&self.files, &path) {
            self.files.remove(&key);
        }
        for key in Self::subtree_keys(&self.dirs, &path) {
            self.dirs.remove(&key);
        }
        Ok(())
    }

    async fn mv(&self, from: &str, to: &str) -> Result<()> {
        let from = Self::normalize(from);
        let to = Self::normalize(to);

        if let Some((_, data)) = self.files.remove(&from) {
            self.ensure_parents(&to);
            self.files.insert(to, data);
            return Ok(());
        }

        if !self.dirs.contains_key(&from) {
            return Err(VikingError::not_found("path", &from));
        }
        self.ensure_parents(&to);
        let from_prefix = format!("{from}/");
        for key in Self::subtree_keys(&self.dirs, &from) {
            self.dirs.remove(&key);
            let rewritten = if key == from {
                to.clone()
            } else {
                format!("{to}/{}", &key[from_prefix.len()..])
            };
            self.dirs.insert(rewritten, ());
        }
        for key in Self::subtree_keys(&self.files, &from) {
            if let Some((_, data)) = self.files.remove(&key) {
                let rewritten = format!("{to}/{}", &key[from_prefix.len()..]);
                self.files.insert(rewritten, data);
            }
        }
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let path = Self::normalize(path);
        if let Some(entry) = self.files.get(&path) {
            return Ok(FileStat::file(Self::basename(&path), entry.value().len() as u64));
        }
        if self.dirs.contains_key(&path) {
            return Ok(FileStat::dir(Self::basename(&path)));
        }
        Err(VikingError::not_found("path", &path))
    }

    async fn grep(
        &self,
        path: &str,
        pattern: &str,
        recursive: bool,
        case_insensitive: bool,
    ) -> Result<Vec<GrepMatch>> {
        let path = Self::normalize(path);
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| VikingError::invalid_argument(format!("bad pattern: {e}")))?;

        let prefix = format!("{path}/");
        let mut matches = Vec::new();
        for entry in self.files.iter() {
            let key = entry.key();
            let in_scope = key == &path
                || (key.starts_with(&prefix)
                    && (recursive || !key[prefix.len()..].contains('/')));
            if !in_scope {
                continue;
            }
            let Ok(text) = std::str::from_utf8(entry.value()) else {
                continue;
            };
            for (index, line) in text.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(GrepMatch {
                        line: (index + 1) as u64,
                        file: key.clone(),
                        content: line.to_string(),
                    });
                }
            }
        }
        matches.sort_by(|a, b| a.file.cmp(&b.file).then(a.line.cmp(&b.line)));
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let store = MemoryBlobStore::new();
        store.write("/local/acme/temp/a.txt", b"hello").await.unwrap();
        let data = store.read("/local/acme/temp/a.txt", None, None).await.unwrap();
        assert_eq!(data, b"hello");

        // Parents are created implicitly.
        let entries = store.ls("/local/acme").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_dir);
    }

    #[tokio::test]
    async fn test_read_range() {
        let store = MemoryBlobStore::new();
        store.write("/f.bin", b"0123456789").await.unwrap();
        assert_eq!(store.read("/f.bin", Some(2), Some(3)).await.unwrap(), b"234");
        assert_eq!(store.read("/f.bin", Some(20), None).await.unwrap(), b"");
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let store = MemoryBlobStore::new();
        let err = store.read("/nope", None, None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_ls_direct_children_only() {
        let store = MemoryBlobStore::new();
        store.write("/d/a.txt", b"a").await.unwrap();
        store.write("/d/sub/b.txt", b"b").await.unwrap();
        let names: Vec<String> = store
            .ls("/d")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.txt".to_string(), "sub".to_string()]);
    }

    #[tokio::test]
    async fn test_rm_recursive() {
        let store = MemoryBlobStore::new();
        store.write("/d/sub/b.txt", b"b").await.unwrap();
        assert!(store.rm("/d", false).await.is_err());
        store.rm("/d", true).await.unwrap();
        assert!(store.stat("/d").await.unwrap_err().is_not_found());
        assert!(store.stat("/d/sub/b.txt").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_mv_subtree() {
        let store = MemoryBlobStore::new();
        store.write("/d/sub/b.txt", b"b").await.unwrap();
        store.mv("/d", "/e").await.unwrap();
        assert_eq!(store.read("/e/sub/b.txt", None, None).await.unwrap(), b"b");
        assert!(store.stat("/d").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_mv_missing_source() {
        let store = MemoryBlobStore::new();
        let err = store.mv("/missing", "/e").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_grep() {
        let store = MemoryBlobStore::new();
        store.write("/d/a.txt", b"Install: pip\nother line").await.unwrap();
        store.write("/d/sub/b.txt", b"install here too").await.unwrap();

        let matches = store.grep("/d", "install", false, true).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].file, "/d/a.txt");
        assert_eq!(matches[0].line, 1);

        let matches = store.grep("/d", "install", true, true).await.unwrap();
        assert_eq!(matches.len(), 2);
    }
}
