use anyhow::{Context, Result};
use image::{imageops, RgbaImage};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::template::template::{Manifest, Template, MANIFEST_FILE};

/// Rewrites every frame of a template so its pixels sit at their absolute
/// canvas coordinates: each frame is pasted into a larger transparent canvas
/// at (left, top) and the manifest anchor is reset to (0, 0).
///
/// The padded canvas is sized from the first frame; frames are expected to
/// share dimensions.
pub fn convert_to_absolute(directory: &Path) -> Result<()> {
    let template = Template::load(directory)?;
    let (left, top) = (template.left(), template.top());
    let mut canvas_size: Option<(u32, u32)> = None;

    for path in template.frame_paths() {
        let frame = image::open(path)
            .with_context(|| format!("failed to decode frame {}", path.display()))?
            .to_rgba8();
        let (width, height) =
            *canvas_size.get_or_insert((frame.width() + left, frame.height() + top));

        let mut converted = RgbaImage::new(width, height);
        imageops::overlay(&mut converted, &frame, left as i64, top as i64);
        converted
            .save(path)
            .with_context(|| format!("failed to rewrite frame {}", path.display()))?;
    }

    let manifest = Manifest {
        minutes_per_frame: template.minutes_per_frame(),
        left: 0,
        top: 0,
    };
    fs::write(
        directory.join(MANIFEST_FILE),
        serde_json::to_string_pretty(&manifest)?,
    )
    .with_context(|| format!("failed to rewrite {}", MANIFEST_FILE))?;

    info!(
        "re-anchored {} frame(s) in {} to absolute coordinates",
        template.frame_count(),
        directory.display()
    );
    Ok(())
}
