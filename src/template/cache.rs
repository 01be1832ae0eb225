use anyhow::{Context, Result};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::template::template::Template;

/// Owned directory -> Template map, keyed by canonical path so the same
/// template reached through different relative paths shares one entry.
/// Constructed by the caller and passed wherever templates are consumed.
#[derive(Default)]
pub struct TemplateCache {
    templates: HashMap<PathBuf, Template>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached template for `directory`, loading it on first use.
    pub fn get(&mut self, directory: &Path) -> Result<&mut Template> {
        let key = directory
            .canonicalize()
            .with_context(|| format!("template directory {} not found", directory.display()))?;
        match self.templates.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let template = Template::load(entry.key())?;
                Ok(entry.insert(template))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn clear(&mut self) {
        self.templates.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::template::MANIFEST_FILE;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_cache_loads_once_per_directory() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"minutesPerFrame": 0, "left": 1, "top": 2}"#,
        )
        .unwrap();
        fs::write(dir.path().join("frame.png"), b"x").unwrap();

        let mut cache = TemplateCache::new();
        {
            let template = cache.get(dir.path()).unwrap();
            assert_eq!(template.left(), 1);
        }
        assert_eq!(cache.len(), 1);
        cache.get(dir.path()).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let mut cache = TemplateCache::new();
        assert!(cache.get(Path::new("/definitely/not/here")).is_err());
    }
}
