//! Runs a per-recording analysis across a directory of recordings.

use std::path::{Path, PathBuf};

use crate::context::AnalysisContext;
use crate::detect::BoundingBox;
use crate::error::AnalysisResult;
use crate::loss::{detect_loss_time, LossReport};
use crate::video::{summarize_all, VideoSummary};

/// Applies `analyze` to each recording in `dir` in file-name order and stops
/// at the first one that yields a result. Recordings after it are never
/// opened. Errors abort the batch.
pub fn first_positive<T>(
    ctx: &mut AnalysisContext,
    dir: &Path,
    mut analyze: impl FnMut(&mut AnalysisContext, &Path) -> AnalysisResult<Option<T>>,
) -> AnalysisResult<Option<(PathBuf, T)>> {
    let files = ctx.video().list_videos(dir)?;
    let total = files.len() as u64;
    for (i, file) in files.into_iter().enumerate() {
        log::info!("batch: [{}/{}] {}", i + 1, total, file.display());
        if let Some(found) = analyze(ctx, &file)? {
            return Ok(Some((file, found)));
        }
    }
    log::info!("batch: no positive result in {} recordings of {}", total, dir.display());
    Ok(None)
}

/// First recording in `dir` where the object goes missing for the tolerance.
pub fn detect_object_loss(
    ctx: &mut AnalysisContext,
    dir: &Path,
    target_label: &str,
    reference: BoundingBox,
) -> AnalysisResult<Option<LossReport>> {
    let found = first_positive(ctx, dir, |ctx, file| {
        detect_loss_time(ctx, file, target_label, reference)
    })?;
    Ok(found.map(|(file, lost_time)| LossReport {
        file_name: file.display().to_string(),
        lost_time,
    }))
}

/// Container summaries of every recording in `dir`, in file-name order.
pub fn summarize_dir(ctx: &AnalysisContext, dir: &Path) -> AnalysisResult<Vec<VideoSummary>> {
    let files = ctx.video().list_videos(dir)?;
    summarize_all(ctx.video(), &files)
}
