use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "canvas.json";

/// Animation frame indices are derived from wall-clock time elapsed since the
/// canvas opened, so every agent drawing the same template stays in step.
pub fn canvas_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 5, 24, 0, 0, 0).unwrap()
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// 0 means static: the template always shows frame 0.
    pub minutes_per_frame: f64,
    /// Canvas x of the template's local (0, 0).
    pub left: u32,
    /// Canvas y of the template's local (0, 0).
    pub top: u32,
}

/// A target directory: a manifest plus one image file per frame, ordered by
/// filename. Tracks the last frame index it handed out so callers can tell
/// when the animation has rolled over.
pub struct Template {
    frame_paths: Vec<PathBuf>,
    frame_secs: f64,
    left: u32,
    top: u32,
    last_seen: Option<usize>,
}

impl Template {
    pub fn load(directory: &Path) -> Result<Self> {
        let manifest_path = directory.join(MANIFEST_FILE);
        let data = fs::read_to_string(&manifest_path).with_context(|| {
            format!("template {} must contain {}", directory.display(), MANIFEST_FILE)
        })?;
        let manifest: Manifest = serde_json::from_str(&data)
            .with_context(|| format!("malformed {}", manifest_path.display()))?;

        let mut frame_paths: Vec<PathBuf> = fs::read_dir(directory)
            .with_context(|| format!("failed to read template {}", directory.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.file_name().map_or(false, |name| name != MANIFEST_FILE))
            .collect();
        frame_paths.sort();
        if frame_paths.is_empty() {
            bail!("template {} has no frames", directory.display());
        }

        Ok(Self {
            frame_paths,
            frame_secs: manifest.minutes_per_frame * 60.0,
            left: manifest.left,
            top: manifest.top,
            last_seen: None,
        })
    }

    pub fn left(&self) -> u32 {
        self.left
    }

    pub fn top(&self) -> u32 {
        self.top
    }

    pub fn minutes_per_frame(&self) -> f64 {
        self.frame_secs / 60.0
    }

    pub fn frame_count(&self) -> usize {
        self.frame_paths.len()
    }

    pub fn frame_paths(&self) -> &[PathBuf] {
        &self.frame_paths
    }

    /// The active frame index and whether it differs from the last one this
    /// template handed out. Consulting it updates the cached index.
    pub fn current_frame_index(&mut self) -> (usize, bool) {
        self.current_frame_index_at(Utc::now())
    }

    pub fn current_frame_index_at(&mut self, now: DateTime<Utc>) -> (usize, bool) {
        let index = if self.frame_secs <= 0.0 {
            0
        } else {
            let elapsed = (now - canvas_epoch()).num_milliseconds().max(0) as f64 / 1000.0;
            (elapsed / self.frame_secs) as usize % self.frame_paths.len()
        };
        let changed = self.last_seen != Some(index);
        self.last_seen = Some(index);
        (index, changed)
    }

    pub fn current_frame_path(&mut self) -> (PathBuf, bool) {
        self.current_frame_path_at(Utc::now())
    }

    pub fn current_frame_path_at(&mut self, now: DateTime<Utc>) -> (PathBuf, bool) {
        let (index, changed) = self.current_frame_index_at(now);
        (self.frame_paths[index].clone(), changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn write_template(dir: &Path, minutes_per_frame: f64, frames: &[&str]) {
        let manifest = format!(
            r#"{{"minutesPerFrame": {}, "left": 40, "top": 20}}"#,
            minutes_per_frame
        );
        fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
        for name in frames {
            fs::write(dir.join(name), b"not a real image").unwrap();
        }
    }

    #[test]
    fn test_load_reads_manifest_and_sorts_frames() {
        let dir = tempdir().unwrap();
        write_template(dir.path(), 2.0, &["frame_2.png", "frame_0.png", "frame_1.png"]);

        let template = Template::load(dir.path()).unwrap();
        assert_eq!(template.left(), 40);
        assert_eq!(template.top(), 20);
        assert_eq!(template.frame_count(), 3);
        let names: Vec<_> = template
            .frame_paths()
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["frame_0.png", "frame_1.png", "frame_2.png"]);
    }

    #[test]
    fn test_load_requires_manifest() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("frame_0.png"), b"x").unwrap();
        assert!(Template::load(dir.path()).is_err());
    }

    #[test]
    fn test_load_requires_frames() {
        let dir = tempdir().unwrap();
        write_template(dir.path(), 0.0, &[]);
        assert!(Template::load(dir.path()).is_err());
    }

    #[test]
    fn test_static_template_pins_frame_zero() {
        let dir = tempdir().unwrap();
        write_template(dir.path(), 0.0, &["a.png", "b.png"]);
        let mut template = Template::load(dir.path()).unwrap();

        let (index, changed) = template.current_frame_index();
        assert_eq!(index, 0);
        assert!(changed, "first consultation always reports a change");
        let (index, changed) = template.current_frame_index();
        assert_eq!(index, 0);
        assert!(!changed);
    }

    #[test]
    fn test_animated_index_tracks_elapsed_time() {
        let dir = tempdir().unwrap();
        write_template(dir.path(), 1.0, &["a.png", "b.png", "c.png"]);
        let mut template = Template::load(dir.path()).unwrap();

        let epoch = canvas_epoch();
        // 0 min -> frame 0, 1 min -> frame 1, 5 min -> frame 2 (5 % 3).
        assert_eq!(template.current_frame_index_at(epoch).0, 0);
        let (index, changed) = template.current_frame_index_at(epoch + Duration::minutes(1));
        assert_eq!(index, 1);
        assert!(changed);
        let (index, _) = template.current_frame_index_at(epoch + Duration::minutes(5));
        assert_eq!(index, 2);

        // Same instant twice: no change the second time.
        let (_, changed) = template.current_frame_index_at(epoch + Duration::minutes(5));
        assert!(!changed);
    }

    #[test]
    fn test_frame_path_follows_index() {
        let dir = tempdir().unwrap();
        write_template(dir.path(), 1.0, &["a.png", "b.png"]);
        let mut template = Template::load(dir.path()).unwrap();

        let (path, _) = template.current_frame_path_at(canvas_epoch() + Duration::minutes(1));
        assert_eq!(path.file_name().unwrap(), "b.png");
    }
}
