//! End-to-end capture on real hardware
//!
//! Run with `CAPTURE_SAMPLE_VIDEO=/path/to/clip.mp4 cargo test -- --ignored`.
//! The clip must be H.264, HEVC or AV1 and decodable by a local GPU.

use std::path::PathBuf;
use std::sync::Arc;

use immersive_capture::{
    BackendKind, CaptureProperty, CaptureRuntime, CaptureSettings, FileSource, HwDevice,
};

fn sample_video() -> Option<PathBuf> {
    let path = PathBuf::from(std::env::var_os("CAPTURE_SAMPLE_VIDEO")?);
    path.exists().then_some(path)
}

fn runtime() -> Option<CaptureRuntime<HwDevice>> {
    let device = HwDevice::open_first(BackendKind::platform_order()).ok()?;
    CaptureRuntime::initialize(Arc::new(device), CaptureSettings::default()).ok()
}

#[test]
#[ignore]
fn test_decodes_sample_to_end_and_rewinds() {
    let (Some(path), Some(runtime)) = (sample_video(), runtime()) else {
        eprintln!("CAPTURE_SAMPLE_VIDEO unset or no hardware device; skipping");
        return;
    };

    let mut capture = runtime.session();
    capture.open(&path).expect("open sample");
    assert!(capture.get(CaptureProperty::FrameWidth.id()) > 0.0);
    assert!(capture.get(CaptureProperty::Fps.id()) > 0.0);

    let mut frames = 0;
    let mut last_pts = f64::MIN;
    while let Some(frame) = capture.read().expect("read") {
        assert!(frame.is_valid());
        assert!(frame.pts >= last_pts);
        last_pts = frame.pts;
        frames += 1;
    }
    assert!(frames > 0);
    assert!(capture.is_eof());

    assert!(capture.set(CaptureProperty::PosFrames.id(), 0.0));
    let first = capture.read().expect("read after seek").expect("frame after seek");
    assert!(first.pts < 1.0);

    capture.release();
    assert!(!capture.is_opened());
}

#[test]
#[ignore]
fn test_custom_io_matches_path_open() {
    let (Some(path), Some(runtime)) = (sample_video(), runtime()) else {
        eprintln!("CAPTURE_SAMPLE_VIDEO unset or no hardware device; skipping");
        return;
    };

    let mut by_path = runtime.session();
    by_path.open(&path).expect("open by path");

    let mut by_source = runtime.session();
    by_source
        .open_source(FileSource::open(&path).expect("file source"), None)
        .expect("open by source");

    for property in [
        CaptureProperty::FrameWidth,
        CaptureProperty::FrameHeight,
        CaptureProperty::Fourcc,
    ] {
        assert_eq!(by_path.property(property), by_source.property(property));
    }

    let a = by_path.read().expect("read").expect("frame");
    let b = by_source.read().expect("read").expect("frame");
    assert_eq!(a.pts, b.pts);
}
