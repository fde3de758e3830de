//! Example: Decode a video file on the GPU and print frame information
//!
//! Usage: cargo run --example decode_file <video_file> [max_frames]
//!
//! Opens the file through a hardware device, reads frames until the end of
//! the stream (or `max_frames`), then seeks back to the start and reads one
//! more frame.

use std::env;
use std::path::Path;
use std::sync::Arc;

use immersive_capture::telemetry::init_logging_default;
use immersive_capture::{BackendKind, CaptureProperty, CaptureRuntime, CaptureSettings, HwDevice, RenderDevice};

fn main() {
    let _guard = init_logging_default().ok().flatten();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <video_file> [max_frames]", args[0]);
        eprintln!("Example: {} test.mp4 100", args[0]);
        std::process::exit(1);
    }

    let video_path = Path::new(&args[1]);
    let max_frames: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(usize::MAX);

    if !video_path.exists() {
        eprintln!("Error: File not found: {}", video_path.display());
        std::process::exit(1);
    }

    let settings = CaptureSettings::load();
    let device = match HwDevice::open_first(&settings.backend_order()) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("No hardware device available: {}", e);
            eprintln!("Tried: {:?}", BackendKind::platform_order());
            std::process::exit(1);
        }
    };
    println!("Using device: {}", device.label());

    let runtime = match CaptureRuntime::initialize(Arc::new(device), settings) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to initialize capture: {}", e);
            std::process::exit(1);
        }
    };

    println!("\n=== Hardware Backends ===");
    for record in runtime.registry().records() {
        println!("{:<14} available={} codecs={:?}", record.name, record.available, record.codecs());
    }

    let mut capture = runtime.session();
    if let Err(e) = capture.open(video_path) {
        eprintln!("Failed to open video: {}", e);
        std::process::exit(1);
    }

    println!("\n=== Video Information ===");
    println!("Backend: {}", capture.backend());
    println!(
        "Resolution: {}x{}",
        capture.get(CaptureProperty::FrameWidth.id()),
        capture.get(CaptureProperty::FrameHeight.id())
    );
    println!("Frame rate: {:.2} fps", capture.get(CaptureProperty::Fps.id()));
    println!("Frame count: {}", capture.get(CaptureProperty::FrameCount.id()));
    println!();

    let mut decoded = 0;
    while decoded < max_frames {
        match capture.read() {
            Ok(Some(frame)) => {
                println!(
                    "Frame {}: {}x{} {} PTS: {:.3}s{}",
                    decoded,
                    frame.width,
                    frame.height,
                    frame.format,
                    frame.pts,
                    if frame.is_keyframe { " [key]" } else { "" }
                );
                decoded += 1;
            }
            Ok(None) => {
                println!("End of video reached");
                break;
            }
            Err(e) => {
                eprintln!("Decode error: {}", e);
                break;
            }
        }
    }

    println!("\n=== Seeking to start ===");
    if capture.set(CaptureProperty::PosFrames.id(), 0.0) {
        match capture.read() {
            Ok(Some(frame)) => println!("First frame after seek: PTS {:.3}s", frame.pts),
            Ok(None) => println!("No frame after seek"),
            Err(e) => eprintln!("Decode error after seek: {}", e),
        }
    } else {
        println!("Source is not seekable");
    }

    capture.release();
    println!("\nDecoded {} frames", decoded);
}
