use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tempfile::TempDir;

use footage_kernel::config::AnalysisConfig;
use footage_kernel::render::RED;
use footage_kernel::{
    annotate_vehicles, detect_loss_time, detect_object_loss, extract_clip, find_objects,
    rank_proximity, summarize_dir, AnalysisContext, AnalysisError, BoundingBox, Cadence, ClipSpec,
    Overlay, Prediction, Renderer, ScriptedBackend, SearchOutcome, SizeCategory, SyntheticBackend,
    SyntheticVideo,
};

const CAR: u32 = 2;
const TRUCK: u32 = 7;
const DOG: u32 = 16;
const CUP: u32 = 41;

fn video(fps: f64, frames: u64) -> SyntheticVideo {
    SyntheticVideo::new(fps, frames).with_size(640, 480)
}

fn prediction(bbox: (i32, i32, i32, i32), confidence: f32, class_id: u32) -> Prediction {
    Prediction {
        x1: bbox.0 as f32,
        y1: bbox.1 as f32,
        x2: bbox.2 as f32,
        y2: bbox.3 as f32,
        confidence,
        class_id,
    }
}

fn context(
    backend: &SyntheticBackend,
    detector: ScriptedBackend,
    out: &TempDir,
    tune: impl FnOnce(&mut AnalysisConfig),
) -> AnalysisContext {
    let mut config = AnalysisConfig {
        output_dir: out.path().to_path_buf(),
        ..AnalysisConfig::default()
    };
    tune(&mut config);
    AnalysisContext::new(config, Box::new(backend.clone()), Box::new(detector))
        .with_renderer(Renderer::without_text())
}

#[test]
fn size_ranking_keeps_six_largest_cars() {
    let out = tempfile::tempdir().unwrap();
    let backend = SyntheticBackend::new().with_video("stub://cam/a.mp4", video(10.0, 100));
    // widths 10..=80 give areas 100..=800; the truck is filtered out by class
    let mut cars: Vec<Prediction> = (1..=8)
        .map(|i| prediction((0, 40 * i, 10 * i, 40 * i + 10), 0.9, CAR))
        .collect();
    cars.push(prediction((300, 300, 600, 450), 0.9, TRUCK));
    let detector = ScriptedBackend::new().at_frame(20, cars);
    let mut ctx = context(&backend, detector, &out, |_| {});

    let ranking = annotate_vehicles(&mut ctx, Path::new("stub://cam/a.mp4"), 2.0).unwrap();

    assert_eq!(ranking.vehicles.len(), 6);
    let ids: Vec<u32> = ranking.vehicles.iter().map(|v| v.vehicle_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(ranking.vehicles[0].bbox, BoundingBox::new(0, 320, 80, 330));
    let categories: Vec<SizeCategory> = ranking.vehicles.iter().map(|v| v.category).collect();
    assert_eq!(
        categories,
        vec![
            SizeCategory::VeryLarge,
            SizeCategory::VeryLarge,
            SizeCategory::Large,
            SizeCategory::Medium,
            SizeCategory::Medium,
            SizeCategory::Medium,
        ]
    );
    assert_eq!(ranking.image_path, out.path().join("annotated_frame.jpg"));
    assert!(ranking.image_path.exists());
}

#[test]
fn size_ranking_past_end_is_out_of_range() {
    let out = tempfile::tempdir().unwrap();
    let backend = SyntheticBackend::new().with_video("stub://cam/a.mp4", video(10.0, 100));
    let mut ctx = context(&backend, ScriptedBackend::new(), &out, |_| {});
    let err = annotate_vehicles(&mut ctx, Path::new("stub://cam/a.mp4"), 10.0).unwrap_err();
    assert!(matches!(err, AnalysisError::OutOfRange { .. }));
}

#[test]
fn proximity_ranks_closest_vehicles_and_writes_clips() {
    let out = tempfile::tempdir().unwrap();
    let backend = SyntheticBackend::new().with_video("stub://cam/a.mp4", video(10.0, 200));
    // reference center is (10, 10); each vehicle sits in its own grid cell
    let detector = ScriptedBackend::new()
        .at_frame(50, vec![prediction((50, 0, 70, 20), 0.9, CAR)])
        .at_frame(100, vec![prediction((0, 10, 20, 30), 0.9, CAR)])
        .at_frame(150, vec![prediction((30, 0, 50, 20), 0.9, CAR)]);
    let mut ctx = context(&backend, detector, &out, |_| {});

    let hits = rank_proximity(
        &mut ctx,
        Path::new("stub://cam/a.mp4"),
        BoundingBox::new(0, 0, 20, 20),
        0.0,
    )
    .unwrap();

    let distances: Vec<f64> = hits.iter().map(|h| h.distance).collect();
    assert_eq!(distances, vec![10.0, 30.0, 50.0]);
    let seconds: Vec<f64> = hits.iter().map(|h| h.seconds).collect();
    assert_eq!(seconds, vec![10.0, 15.0, 5.0]);
    for (i, hit) in hits.iter().enumerate() {
        let name = hit.footage_file_name.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with(&format!("vehicle_{}_proximity_", i + 1)), "{name}");
        assert!(hit.footage_file_name.starts_with(out.path()));
        assert_eq!(backend.frames_written(&hit.footage_file_name), Some(100));
    }
}

#[test]
fn proximity_progress_counts_samples_only() {
    let out = tempfile::tempdir().unwrap();
    let backend = SyntheticBackend::new().with_video("stub://cam/a.mp4", video(10.0, 200));
    let detector = ScriptedBackend::new().at_frame(100, vec![prediction((0, 10, 20, 30), 0.9, CAR)]);
    let calls = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&calls);
    let mut ctx = context(&backend, detector, &out, |_| {})
        .with_progress(move |current, total| seen.borrow_mut().push((current, total)));

    let hits = rank_proximity(
        &mut ctx,
        Path::new("stub://cam/a.mp4"),
        BoundingBox::new(0, 0, 20, 20),
        0.0,
    )
    .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(backend.frames_written(&hits[0].footage_file_name), Some(100));
    let calls = calls.borrow();
    assert_eq!(calls.len(), 20);
    assert!(calls.iter().all(|&(_, total)| total == 20));
    assert_eq!(calls.last(), Some(&(20, 20)));
}

#[test]
fn proximity_without_vehicles_writes_nothing() {
    let out = tempfile::tempdir().unwrap();
    let backend = SyntheticBackend::new().with_video("stub://cam/a.mp4", video(10.0, 50));
    let mut ctx = context(&backend, ScriptedBackend::new(), &out, |_| {});
    let hits = rank_proximity(
        &mut ctx,
        Path::new("stub://cam/a.mp4"),
        BoundingBox::new(0, 0, 20, 20),
        0.0,
    )
    .unwrap();
    assert!(hits.is_empty());
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

const CUP_BOX: (i32, i32, i32, i32) = (100, 100, 200, 200);
const CUP_REFERENCE: BoundingBox = BoundingBox::new(100, 100, 200, 200);

fn sparse_loss(config: &mut AnalysisConfig) {
    config.loss.cadence = Cadence::FrameStride { interval_secs: 10.0 };
    config.loss.tolerance_secs = 5.0;
}

#[test]
fn short_absence_is_not_a_loss() {
    let out = tempfile::tempdir().unwrap();
    let backend = SyntheticBackend::new().with_video("stub://cam/a.mp4", video(1.0, 40));
    let detector = ScriptedBackend::new()
        .over_frames(0..10, prediction(CUP_BOX, 0.8, CUP))
        .over_frames(20..40, prediction(CUP_BOX, 0.8, CUP));
    let mut ctx = context(&backend, detector, &out, sparse_loss);

    let lost = detect_loss_time(&mut ctx, Path::new("stub://cam/a.mp4"), "cup", CUP_REFERENCE).unwrap();
    assert_eq!(lost, None);
}

#[test]
fn sustained_absence_reports_first_missing_time() {
    let out = tempfile::tempdir().unwrap();
    let backend = SyntheticBackend::new().with_video("stub://cam/a.mp4", video(1.0, 40));
    let detector = ScriptedBackend::new()
        .over_frames(0..10, prediction(CUP_BOX, 0.8, CUP))
        .over_frames(30..40, prediction(CUP_BOX, 0.8, CUP));
    let mut ctx = context(&backend, detector, &out, sparse_loss);

    let lost = detect_loss_time(&mut ctx, Path::new("stub://cam/a.mp4"), "cup", CUP_REFERENCE).unwrap();
    assert_eq!(lost, Some(10.0));
}

#[test]
fn moved_object_counts_as_missing() {
    let out = tempfile::tempdir().unwrap();
    let backend = SyntheticBackend::new().with_video("stub://cam/a.mp4", video(1.0, 40));
    let detector = ScriptedBackend::new()
        .over_frames(0..10, prediction(CUP_BOX, 0.8, CUP))
        .over_frames(10..40, prediction((400, 300, 500, 400), 0.8, CUP));
    let mut ctx = context(&backend, detector, &out, sparse_loss);

    let lost = detect_loss_time(&mut ctx, Path::new("stub://cam/a.mp4"), "cup", CUP_REFERENCE).unwrap();
    assert_eq!(lost, Some(10.0));
}

#[test]
fn batch_stops_at_first_recording_with_a_loss() {
    let out = tempfile::tempdir().unwrap();
    // a.mp4 ends before the tolerance elapses; b.mp4 runs long enough
    let backend = SyntheticBackend::new()
        .with_video("stub://cams/a.mp4", video(1.0, 20))
        .with_video("stub://cams/b.mp4", video(1.0, 40))
        .with_video("stub://cams/c.mp4", video(1.0, 40));
    let detector = ScriptedBackend::new()
        .over_frames(0..10, prediction(CUP_BOX, 0.8, CUP))
        .over_frames(30..40, prediction(CUP_BOX, 0.8, CUP));
    let mut ctx = context(&backend, detector, &out, sparse_loss);

    let report = detect_object_loss(&mut ctx, Path::new("stub://cams"), "cup", CUP_REFERENCE)
        .unwrap()
        .expect("loss in b.mp4");

    assert_eq!(report.file_name, "stub://cams/b.mp4");
    assert_eq!(report.lost_time, 10.0);
    assert_eq!(
        backend.opened(),
        vec![PathBuf::from("stub://cams/a.mp4"), PathBuf::from("stub://cams/b.mp4")]
    );
}

#[test]
fn batch_without_loss_is_none() {
    let out = tempfile::tempdir().unwrap();
    let backend = SyntheticBackend::new()
        .with_video("stub://cams/a.mp4", video(1.0, 40))
        .with_video("stub://cams/b.mp4", video(1.0, 40));
    let detector = ScriptedBackend::new().over_frames(0..40, prediction(CUP_BOX, 0.8, CUP));
    let mut ctx = context(&backend, detector, &out, sparse_loss);

    let report = detect_object_loss(&mut ctx, Path::new("stub://cams"), "cup", CUP_REFERENCE).unwrap();
    assert_eq!(report, None);
    assert_eq!(backend.opened().len(), 2);
}

#[test]
fn clip_copies_window_with_overlays() {
    let out = tempfile::tempdir().unwrap();
    let backend = SyntheticBackend::new().with_video("stub://cam/a.mp4", video(30.0, 300));
    let mut ctx = context(&backend, ScriptedBackend::new(), &out, |_| {});
    let target = out.path().join("nested/clip.mp4");
    let spec = ClipSpec::new("stub://cam/a.mp4", 5.0, 8.0).with_overlay(Overlay::new(
        BoundingBox::new(100, 100, 200, 200),
        "Target",
        RED,
    ));

    let clip = extract_clip(&mut ctx, &spec, &target).unwrap();

    assert_eq!(clip.frames_written, 90);
    assert_eq!(backend.frames_written(&target), Some(90));
    let bytes = std::fs::read(&target).unwrap();
    assert_eq!(bytes.len(), 90);
    assert_eq!(bytes[0], 150);
}

#[test]
fn search_keeps_best_frame_of_each_run() {
    let out = tempfile::tempdir().unwrap();
    let images = out.path().join("images");
    let backend = SyntheticBackend::new().with_video("stub://cam/a.mp4", video(30.0, 300));
    let detector = ScriptedBackend::new()
        .at_frame(60, vec![prediction((10, 10, 60, 60), 0.6, DOG)])
        .at_frame(90, vec![prediction((12, 10, 62, 60), 0.9, DOG)])
        .at_frame(150, vec![prediction((10, 10, 60, 60), 0.3, DOG)])
        .at_frame(240, vec![
            prediction((10, 10, 60, 60), 0.7, DOG),
            prediction((100, 10, 160, 60), 0.55, DOG),
        ]);
    let mut ctx = context(&backend, detector, &out, |_| {});

    let outcome = find_objects(&mut ctx, Path::new("stub://cam"), &images, "dog", 0.5).unwrap();

    let hits = outcome.hits();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].seconds, 3.0);
    assert_eq!(hits[0].max_confidence, 0.9);
    assert_eq!(hits[0].image_path, images.join("01-00-00-03.jpg"));
    assert_eq!(hits[1].seconds, 8.0);
    assert_eq!(hits[1].matches, 2);
    assert!(hits.iter().all(|h| h.image_path.exists()));
}

#[test]
fn search_without_matches_is_not_found() {
    let out = tempfile::tempdir().unwrap();
    let backend = SyntheticBackend::new().with_video("stub://cam/a.mp4", video(30.0, 90));
    let detector = ScriptedBackend::new().at_frame(30, vec![prediction((10, 10, 60, 60), 0.9, DOG)]);
    let mut ctx = context(&backend, detector, &out, |_| {});

    let outcome =
        find_objects(&mut ctx, Path::new("stub://cam"), &out.path().join("images"), "cat", 0.5)
            .unwrap();
    assert_eq!(outcome, SearchOutcome::NotFound);
}

#[test]
fn summarizes_recordings_in_name_order() {
    let out = tempfile::tempdir().unwrap();
    let backend = SyntheticBackend::new()
        .with_video("stub://cam/b.mp4", video(25.0, 250))
        .with_video("stub://cam/a.mp4", video(30.0, 95));
    let ctx = context(&backend, ScriptedBackend::new(), &out, |_| {});

    let summaries = summarize_dir(&ctx, Path::new("stub://cam")).unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].file, "a.mp4");
    assert_eq!(summaries[0].total_frames, 95);
    assert_eq!(summaries[0].duration, 3);
    assert_eq!(summaries[1].file, "b.mp4");
    assert_eq!(summaries[1].duration, 10);
    assert_eq!(summaries[1].resolution, "640, 480");
}
