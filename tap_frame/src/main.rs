//! frame_probe: inspect a raw contact-frame dump.
//!
//! Prints what every candidate stride reads for the second record, which
//! stride detection settles on, and the decoded positions.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tap_frame::{probe_stride, read_position, FrameDecoder, CANDIDATE_STRIDES};

/// Inspect a raw multitouch frame dump
#[derive(Parser, Debug)]
#[command(name = "frame_probe", version, about)]
struct Args {
    /// File holding the raw bytes of one frame
    dump: PathBuf,

    /// Number of fingers the device reported for this frame
    #[arg(short, long)]
    fingers: usize,

    /// Decode with this stride instead of detecting one
    #[arg(short, long)]
    stride: Option<usize>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let raw = match std::fs::read(&args.dump) {
        Ok(b)  => b,
        Err(e) => {
            eprintln!("frame_probe: {}: {}", args.dump.display(), e);
            return ExitCode::FAILURE;
        }
    };

    println!();
    println!("  ┌─ {}  ({} bytes, {} fingers)", args.dump.display(), raw.len(), args.fingers);
    println!("  │");
    println!("  │  candidate   second-record (x, y)");
    for &c in &CANDIDATE_STRIDES {
        let cell = match read_position(&raw, c) {
            Ok((x, y)) => format!("({:>9.5}, {:>9.5})", x, y),
            Err(_)     => "out of bounds".to_string(),
        };
        let mark = if probe_stride(&raw, c).is_some() { "  ✓" } else { "" };
        println!("  │  {:>5}       {}{}", c, cell, mark);
    }

    let mut decoder = match args.stride {
        Some(s) => FrameDecoder::with_stride(s),
        None    => FrameDecoder::new(),
    };
    let frame = decoder.decode(&raw, args.fingers, 0.0);

    println!("  │");
    match decoder.stride() {
        Some(s) => println!("  │  stride: {} bytes", s),
        None    => println!("  │  stride: undetected (count/duration-only mode)"),
    }
    for (i, r) in frame.records.iter().enumerate() {
        let tag = if r.valid { "" } else { "  (invalid)" };
        println!("  │  finger {}: ({:.4}, {:.4}){}", i, r.position.x, r.position.y, tag);
    }
    match frame.centroid() {
        Some(c) => println!("  └─ centroid: ({:.4}, {:.4})", c.x, c.y),
        None    => println!("  └─ centroid: n/a"),
    }
    println!();

    ExitCode::SUCCESS
}
