use std::path::{Path, PathBuf};

use crate::config::AnalysisConfig;
use crate::detect::{DetectionAdapter, DetectorBackend};
use crate::error::{AnalysisError, AnalysisResult};
use crate::render::Renderer;
use crate::video::VideoBackend;

/// Progress callback, invoked with `(current, total)` after each unit of work.
pub type ProgressFn = Box<dyn FnMut(u64, u64)>;

/// Everything an analysis needs, passed explicitly.
///
/// The detector is injected at construction and reused for every frame.
/// Nothing here is global, so independent contexts can run side by side.
pub struct AnalysisContext {
    pub config: AnalysisConfig,
    video: Box<dyn VideoBackend>,
    detector: DetectionAdapter,
    renderer: Renderer,
    progress: Option<ProgressFn>,
}

impl AnalysisContext {
    pub fn new(
        config: AnalysisConfig,
        video: Box<dyn VideoBackend>,
        detector: Box<dyn DetectorBackend>,
    ) -> Self {
        let renderer = Renderer::new(config.font_path.as_deref());
        let detector = DetectionAdapter::new(detector, config.device);
        Self {
            config,
            video,
            detector,
            renderer,
            progress: None,
        }
    }

    /// Replace the renderer, e.g. with `Renderer::without_text()`.
    pub fn with_renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_progress(mut self, progress: impl FnMut(u64, u64) + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn set_progress(&mut self, progress: Option<ProgressFn>) {
        self.progress = progress;
    }

    pub fn video(&self) -> &dyn VideoBackend {
        self.video.as_ref()
    }

    pub fn detector(&mut self) -> &mut DetectionAdapter {
        &mut self.detector
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Detaches the progress callback; restore it with `set_progress`.
    pub(crate) fn take_progress(&mut self) -> Option<ProgressFn> {
        self.progress.take()
    }

    pub(crate) fn report_progress(&mut self, current: u64, total: u64) {
        if let Some(progress) = self.progress.as_mut() {
            progress(current, total);
        }
    }

    /// Creates the output directory if absent and returns `output_dir/name`.
    pub(crate) fn output_path(&self, name: &str) -> AnalysisResult<PathBuf> {
        ensure_dir(&self.config.output_dir)?;
        Ok(self.config.output_dir.join(name))
    }
}

pub(crate) fn ensure_dir(dir: &Path) -> AnalysisResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| AnalysisError::write(dir, e))
}
