use anyhow::{bail, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

use crate::draw::diff::{self, DiffPolicy};
use crate::draw::snapshot::{CanvasSnapshot, Color, FrameBuffer};
use crate::template::cache::TemplateCache;

/// The remote canvas as the draw loop sees it. `PixelsClient` is the real
/// implementation; tests substitute an in-memory one.
pub trait Canvas {
    /// A fresh full read of the canvas.
    fn snapshot(&mut self) -> Result<CanvasSnapshot>;
    /// Writes one pixel. Quota rejections are handled below this seam.
    fn write_pixel(&mut self, x: u32, y: u32, color: Color) -> Result<()>;
    /// Proactive delay to sleep after a write, if quota state suggests one.
    fn write_pacing_delay(&self) -> Option<Duration>;
}

/// Hands the draw loop the active frame of an animated target.
pub trait FrameSource {
    /// The active frame and whether its index changed since last consulted.
    fn current_frame(&mut self) -> Result<(FrameBuffer, bool)>;
    /// False once the active frame index has moved on; consulting this
    /// updates the cached index.
    fn is_cycle_current(&mut self) -> Result<bool>;
}

/// What the drawer is reconciling the canvas against, resolved once at
/// construction: a fixed image, or an animation that can roll over mid-draw.
pub enum Target {
    Static(FrameBuffer),
    Animated(Box<dyn FrameSource>),
}

/// `FrameSource` backed by a template directory: picks the active frame by
/// elapsed time and decodes it on demand.
pub struct TemplateSource {
    cache: TemplateCache,
    directory: PathBuf,
}

impl TemplateSource {
    pub fn new(cache: TemplateCache, directory: PathBuf) -> Self {
        Self { cache, directory }
    }
}

impl FrameSource for TemplateSource {
    fn current_frame(&mut self) -> Result<(FrameBuffer, bool)> {
        let template = self.cache.get(&self.directory)?;
        let (path, changed) = template.current_frame_path();
        let frame = FrameBuffer::open(&path)?;
        Ok((frame, changed))
    }

    fn is_cycle_current(&mut self) -> Result<bool> {
        let template = self.cache.get(&self.directory)?;
        let (_, changed) = template.current_frame_index();
        Ok(!changed)
    }
}

/// The reconciliation loop: load the active frame, diff it against a fresh
/// canvas snapshot, then correct pixels in order, re-reading the live canvas
/// before every write and pacing writes against the server's quota.
pub struct Drawer<C: Canvas> {
    canvas: C,
    target: Target,
    start_x: u32,
    start_y: u32,
    policy: DiffPolicy,
    guard: bool,
    cancel: Arc<AtomicBool>,
}

impl<C: Canvas> Drawer<C> {
    pub fn new(
        canvas: C,
        target: Target,
        start_x: u32,
        start_y: u32,
        policy: DiffPolicy,
        guard: bool,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            canvas,
            target,
            start_x,
            start_y,
            policy,
            guard,
            cancel,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Runs the loop until cancelled, or until one clean pass completes for a
    /// static, unguarded target. Animated and guarded targets reconcile
    /// forever.
    pub fn draw(&mut self) -> Result<()> {
        'pass: loop {
            if self.cancelled() {
                info!("cancelled, stopping");
                return Ok(());
            }

            // LoadFrame
            let frame = match &mut self.target {
                Target::Static(frame) => frame.clone(),
                Target::Animated(source) => {
                    let (frame, changed) = source.current_frame()?;
                    if changed {
                        debug!("animation frame changed");
                    }
                    frame
                }
            };

            // ComputeDiff
            let snapshot = self.canvas.snapshot()?;
            if self.start_x as u64 + frame.width() as u64 > snapshot.width() as u64
                || self.start_y as u64 + frame.height() as u64 > snapshot.height() as u64
            {
                bail!(
                    "target ({}x{} at {},{}) extends past the {}x{} canvas",
                    frame.width(),
                    frame.height(),
                    self.start_x,
                    self.start_y,
                    snapshot.width(),
                    snapshot.height()
                );
            }
            let coords =
                diff::coords_to_draw(&snapshot, &frame, self.start_x, self.start_y, self.policy);
            let total = frame.width() as u64 * frame.height() as u64;
            info!("{}/{} pixels already correct", total - coords.len() as u64, total);

            // IteratePixels
            for (x, y) in coords {
                if self.cancelled() {
                    info!("cancelled, stopping");
                    return Ok(());
                }
                if let Target::Animated(source) = &mut self.target {
                    if !source.is_cycle_current()? {
                        info!("starting next animation cycle");
                        continue 'pass;
                    }
                }

                // Re-read the live pixel right before writing: someone else
                // may have fixed it since the diff pass.
                let snapshot = self.canvas.snapshot()?;
                let current = snapshot.pixel(x, y);
                let wanted = frame.pixel(x - self.start_x, y - self.start_y);
                if self.policy.needs_change(current, wanted) {
                    debug!("setting pixel at x={x},y={y} to {}", wanted.hex());
                    self.canvas.write_pixel(x, y, wanted)?;
                    if let Some(delay) = self.canvas.write_pacing_delay() {
                        thread::sleep(delay);
                    }
                }
            }

            // Done, unless this target is reconciled forever.
            if matches!(self.target, Target::Static(_)) && !self.guard {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    const WHITE: Color = Color { r: 255, g: 255, b: 255 };
    const RED: Color = Color { r: 255, g: 0, b: 0 };

    fn solid(width: u32, height: u32, color: Color) -> FrameBuffer {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            pixels.extend_from_slice(&[color.r, color.g, color.b, 255]);
        }
        FrameBuffer::from_raw(width, height, pixels).unwrap()
    }

    struct MockState {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        writes: Vec<(u32, u32, Color)>,
    }

    /// In-memory canvas: writes land immediately, snapshots see them.
    #[derive(Clone)]
    struct MockCanvas(Rc<RefCell<MockState>>);

    impl MockCanvas {
        fn filled(width: u32, height: u32, color: Color) -> Self {
            let mut pixels = Vec::with_capacity((width * height * 3) as usize);
            for _ in 0..width * height {
                pixels.extend_from_slice(&[color.r, color.g, color.b]);
            }
            Self(Rc::new(RefCell::new(MockState {
                width,
                height,
                pixels,
                writes: Vec::new(),
            })))
        }

        fn writes(&self) -> Vec<(u32, u32, Color)> {
            self.0.borrow().writes.clone()
        }
    }

    impl Canvas for MockCanvas {
        fn snapshot(&mut self) -> Result<CanvasSnapshot> {
            let state = self.0.borrow();
            CanvasSnapshot::from_raw(state.width, state.height, state.pixels.clone())
        }

        fn write_pixel(&mut self, x: u32, y: u32, color: Color) -> Result<()> {
            let mut state = self.0.borrow_mut();
            let i = (y as usize * state.width as usize + x as usize) * 3;
            state.pixels[i] = color.r;
            state.pixels[i + 1] = color.g;
            state.pixels[i + 2] = color.b;
            state.writes.push((x, y, color));
            Ok(())
        }

        fn write_pacing_delay(&self) -> Option<Duration> {
            None
        }
    }

    /// Frame source that flips to the next frame on a chosen staleness check
    /// and cancels the loop on a chosen frame load, so tests terminate.
    struct ScriptedSource {
        frames: Vec<FrameBuffer>,
        current: usize,
        change_on_check: usize,
        checks: usize,
        cancel_on_load: usize,
        loads: usize,
        cancel: Arc<AtomicBool>,
    }

    impl FrameSource for ScriptedSource {
        fn current_frame(&mut self) -> Result<(FrameBuffer, bool)> {
            self.loads += 1;
            if self.loads >= self.cancel_on_load {
                self.cancel.store(true, Ordering::SeqCst);
            }
            Ok((self.frames[self.current].clone(), self.loads == 1))
        }

        fn is_cycle_current(&mut self) -> Result<bool> {
            self.checks += 1;
            if self.checks == self.change_on_check && self.current + 1 < self.frames.len() {
                self.current += 1;
                Ok(false)
            } else {
                Ok(true)
            }
        }
    }

    fn static_drawer(
        canvas: MockCanvas,
        frame: FrameBuffer,
        policy: DiffPolicy,
    ) -> Drawer<MockCanvas> {
        Drawer::new(
            canvas,
            Target::Static(frame),
            0,
            0,
            policy,
            false,
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn test_static_target_writes_every_wrong_pixel_then_stops() {
        for policy in [DiffPolicy::Threshold, DiffPolicy::Ranked] {
            let canvas = MockCanvas::filled(2, 2, BLACK);
            let mut drawer = static_drawer(canvas.clone(), solid(2, 2, WHITE), policy);
            drawer.draw().unwrap();

            let writes = canvas.writes();
            assert_eq!(writes.len(), 4, "policy {:?}", policy);
            assert!(writes.iter().all(|&(_, _, c)| c == WHITE));
            let mut coords: Vec<_> = writes.iter().map(|&(x, y, _)| (x, y)).collect();
            coords.sort();
            assert_eq!(coords, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
        }
    }

    #[test]
    fn test_second_pass_over_converged_canvas_is_idempotent() {
        let canvas = MockCanvas::filled(2, 2, BLACK);
        let mut drawer = static_drawer(canvas.clone(), solid(2, 2, WHITE), DiffPolicy::Ranked);
        drawer.draw().unwrap();
        assert_eq!(canvas.writes().len(), 4);

        drawer.draw().unwrap();
        assert_eq!(canvas.writes().len(), 4, "no writes on the second pass");
    }

    #[test]
    fn test_externally_corrected_pixel_is_not_rewritten() {
        // The canvas already matches at (1, 0); only 3 writes should happen.
        let canvas = MockCanvas::filled(2, 2, BLACK);
        canvas.0.borrow_mut().pixels[3..6].copy_from_slice(&[255, 255, 255]);
        let mut drawer = static_drawer(canvas.clone(), solid(2, 2, WHITE), DiffPolicy::Ranked);
        drawer.draw().unwrap();
        assert_eq!(canvas.writes().len(), 3);
        assert!(!canvas.writes().iter().any(|&(x, y, _)| (x, y) == (1, 0)));
    }

    #[test]
    fn test_frame_rollover_aborts_stale_remainder() {
        let cancel = Arc::new(AtomicBool::new(false));
        let canvas = MockCanvas::filled(10, 1, BLACK);
        // Frame A (white) rolls over to frame B (red) on the third staleness
        // check, i.e. while considering the third of ten wrong pixels.
        let source = ScriptedSource {
            frames: vec![solid(10, 1, WHITE), solid(10, 1, RED)],
            current: 0,
            change_on_check: 3,
            checks: 0,
            cancel_on_load: 3,
            loads: 0,
            cancel: cancel.clone(),
        };
        let mut drawer = Drawer::new(
            canvas.clone(),
            Target::Animated(Box::new(source)),
            0,
            0,
            DiffPolicy::Ranked,
            false,
            cancel,
        );
        drawer.draw().unwrap();

        let writes = canvas.writes();
        // Two white pixels land before the rollover, then the whole strip is
        // repainted red. The eight stale white pixels are never written.
        assert_eq!(writes.len(), 12);
        assert_eq!(writes[0], (0, 0, WHITE));
        assert_eq!(writes[1], (1, 0, WHITE));
        assert!(writes[2..].iter().all(|&(_, _, c)| c == RED));
        assert_eq!(writes[2..].len(), 10);
    }

    #[test]
    fn test_cancellation_stops_before_any_write() {
        let canvas = MockCanvas::filled(2, 2, BLACK);
        let cancel = Arc::new(AtomicBool::new(true));
        let mut drawer = Drawer::new(
            canvas.clone(),
            Target::Static(solid(2, 2, WHITE)),
            0,
            0,
            DiffPolicy::Ranked,
            true,
            cancel,
        );
        drawer.draw().unwrap();
        assert!(canvas.writes().is_empty());
    }

    #[test]
    fn test_target_past_canvas_edge_is_fatal() {
        let canvas = MockCanvas::filled(2, 2, BLACK);
        let mut drawer = Drawer::new(
            canvas,
            Target::Static(solid(2, 2, WHITE)),
            1,
            1,
            DiffPolicy::Ranked,
            false,
            Arc::new(AtomicBool::new(false)),
        );
        assert!(drawer.draw().is_err());
    }
}
