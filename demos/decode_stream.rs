//! Example: Feed a raw Annex-B stream through a live streaming source
//!
//! Usage: cargo run --example decode_stream <stream.h264|stream.hevc>
//!
//! A producer thread splits the file into chunks and pushes them through a
//! `StreamFeeder` as if they were arriving from the network. The capture
//! polls, treating `Stalled` as "try again shortly".

use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use immersive_capture::source::ConnectionState;
use immersive_capture::telemetry::init_logging_default;
use immersive_capture::{CaptureError, CaptureRuntime, CaptureSettings, HwDevice, StreamingSource, VideoCodec};

const CHUNK_SIZE: usize = 16 * 1024;

fn main() {
    let _guard = init_logging_default().ok().flatten();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <stream.h264|stream.hevc>", args[0]);
        std::process::exit(1);
    }

    let path = Path::new(&args[1]);
    let codec = match path.extension().and_then(|e| e.to_str()) {
        Some("hevc") | Some("h265") | Some("265") => VideoCodec::Hevc,
        _ => VideoCodec::H264,
    };

    let data = match fs::read(path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to read {}: {}", path.display(), e);
            std::process::exit(1);
        }
    };

    let settings = CaptureSettings::load();
    let capacity = settings.feed_capacity;
    let device = match HwDevice::open_first(&settings.backend_order()) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("No hardware device available: {}", e);
            std::process::exit(1);
        }
    };
    let runtime = match CaptureRuntime::initialize(Arc::new(device), settings) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to initialize capture: {}", e);
            std::process::exit(1);
        }
    };

    let (mut source, feeder) = StreamingSource::new(codec, capacity);

    let producer = thread::spawn(move || {
        let _ = feeder.report_state(ConnectionState::Connected);
        for chunk in data.chunks(CHUNK_SIZE) {
            if feeder.push_unit(chunk.to_vec()).is_err() {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        let _ = feeder.report_state(ConnectionState::Closed);
    });

    if !source.wait_for_data(Duration::from_secs(5)) {
        eprintln!("No stream data arrived");
        std::process::exit(1);
    }

    let mut capture = runtime.session();
    if let Err(e) = capture.open_stream(source) {
        eprintln!("Failed to open stream: {}", e);
        std::process::exit(1);
    }

    let mut decoded = 0;
    loop {
        match capture.read() {
            Ok(Some(frame)) => {
                decoded += 1;
                println!("Frame {}: {}x{} {}", decoded, frame.width, frame.height, frame.format);
            }
            Ok(None) => {
                println!("Stream closed");
                break;
            }
            Err(CaptureError::Stalled) => thread::sleep(Duration::from_millis(5)),
            Err(e) => {
                eprintln!("Decode error: {}", e);
                break;
            }
        }
    }

    capture.release();
    let _ = producer.join();
    println!("Decoded {} frames", decoded);
}
