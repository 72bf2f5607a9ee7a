// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! vpipe_player, runs a file of raw frames through a pipeline on the software backend. Capable of
//! computing MD5 checksums of the output and writing the processed frames to a file.

use std::fs::File;
use std::io::Read;
use std::io::Write;
use std::path::PathBuf;

use argh::FromArgs;

use cros_vpipe::backend::software::SoftwareFactory;
use cros_vpipe::backend::software::SoftwareFrame;
use cros_vpipe::config::DeinterlaceMethod;
use cros_vpipe::config::DeinterlaceMode;
use cros_vpipe::config::OutputMode;
use cros_vpipe::config::PipelineConfig;
use cros_vpipe::config::VideoSettings;
use cros_vpipe::decoded_frame_size;
use cros_vpipe::picture::PictureFlags;
use cros_vpipe::picture::PictureInfo;
use cros_vpipe::picture::PictureSurface;
use cros_vpipe::DecodeStatus;
use cros_vpipe::DecodedFormat;
use cros_vpipe::DrainMode;
use cros_vpipe::Pipeline;
use cros_vpipe::Resolution;
use cros_vpipe::StreamInfo;

/// Runs raw frames through a vpipe pipeline
#[derive(Debug, FromArgs)]
struct Args {
    /// input file of raw frames
    #[argh(positional)]
    input: PathBuf,

    /// width of the input frames
    #[argh(option)]
    width: u32,

    /// height of the input frames
    #[argh(option)]
    height: u32,

    /// pixel format of the input frames. Default: i420
    #[argh(option, default = "DecodedFormat::I420")]
    format: DecodedFormat,

    /// output file to write the processed frames to
    #[argh(option)]
    output: Option<PathBuf>,

    /// size of the output frames as WIDTHxHEIGHT. Default: the input size
    #[argh(option, from_str_fn(parse_resolution))]
    output_size: Option<Resolution>,

    /// how pictures reach the consumer (mixer or zero-copy). Default: mixer
    #[argh(option, default = "OutputMode::Mixer")]
    output_mode: OutputMode,

    /// number of output pictures. Default: 8
    #[argh(option, default = "8")]
    pool_size: usize,

    /// whether the input frames are interlaced, top field first
    #[argh(switch)]
    interlaced: bool,

    /// deinterlacing mode (off, auto or force). Default: auto
    #[argh(option, default = "DeinterlaceMode::Auto")]
    deinterlace: DeinterlaceMode,

    /// deinterlacing method, by name or id. Default: auto
    #[argh(option, default = "DeinterlaceMethod::Auto")]
    deinterlace_method: DeinterlaceMethod,

    /// duration of a frame in microseconds. Default: 40000
    #[argh(option, default = "40_000")]
    frame_duration: u64,

    /// whether to display the MD5 of the processed stream
    #[argh(switch)]
    compute_md5: bool,
}

fn parse_resolution(value: &str) -> Result<Resolution, String> {
    let (width, height) = value
        .split_once('x')
        .ok_or_else(|| format!("invalid size {}, expected WIDTHxHEIGHT", value))?;
    let width = width.parse().map_err(|e| format!("invalid width: {}", e))?;
    let height = height.parse().map_err(|e| format!("invalid height: {}", e))?;

    Ok(Resolution { width, height })
}

/// Collects the processed frames.
struct Sink {
    output: Option<File>,
    md5: Option<md5::Context>,
    frames: usize,
    dropped: usize,
}

impl Sink {
    fn consume(&mut self, frame: &SoftwareFrame, info: &PictureInfo) {
        if info.flags.contains(PictureFlags::DROPPED) {
            self.dropped += 1;
            return;
        }

        let data = frame.read();
        if let Some(output) = &mut self.output {
            output
                .write_all(&data)
                .expect("failed to write to output file");
        }
        if let Some(md5) = &mut self.md5 {
            md5.consume(&data);
        }
        self.frames += 1;
    }
}

/// Takes the picture reported by the pipeline, shows it to `sink` and gives it back.
fn take_picture(pipeline: &Pipeline<SoftwareFactory>, sink: &mut Sink) {
    let picture = pipeline.get_picture().expect("failed to get picture");
    pipeline
        .present(&picture.handle)
        .expect("failed to present picture");

    let frame = match &picture.surface {
        PictureSurface::Decode(frame) | PictureSurface::Output(frame) => frame,
    };
    log::debug!("picture {:?}: {:?}", picture.info.pts, frame);
    sink.consume(frame, &picture.info);

    pipeline.release_picture(picture.handle);
}

fn main() {
    env_logger::init();

    let args: Args = argh::from_env();

    let mut input = File::open(&args.input).expect("error opening input file");
    let mut data = Vec::new();
    input
        .read_to_end(&mut data)
        .expect("error reading input file");

    let resolution = Resolution::from((args.width, args.height));
    let frame_size = decoded_frame_size(
        args.format,
        args.width as usize,
        args.height as usize,
    );
    if frame_size == 0 {
        panic!("invalid frame size {}x{}", args.width, args.height);
    }

    let stream = StreamInfo {
        format: args.format,
        coded_resolution: resolution,
        display_resolution: resolution,
    };
    let config = PipelineConfig {
        pool_size: args.pool_size,
        output_mode: args.output_mode,
        output_resolution: args.output_size,
        settings: VideoSettings {
            deinterlace_mode: args.deinterlace,
            deinterlace_method: args.deinterlace_method,
            ..Default::default()
        },
        ..Default::default()
    };
    let pipeline = Pipeline::open(SoftwareFactory::new(args.format), stream, config)
        .expect("failed to open pipeline");
    let mut adapter = pipeline.decode_adapter();

    let mut sink = Sink {
        output: args
            .output
            .as_ref()
            .map(|path| File::create(path).expect("error creating output file")),
        md5: args.compute_md5.then(md5::Context::new),
        frames: 0,
        dropped: 0,
    };

    let mut flags = PictureFlags::empty();
    if args.interlaced {
        flags |= PictureFlags::INTERLACED | PictureFlags::TOP_FIELD_FIRST;
    }

    for (index, frame) in data.chunks_exact(frame_size).enumerate() {
        let buffer = adapter
            .on_frame_needs_surface(false)
            .expect("failed to get a surface");
        adapter
            .on_draw_slice(buffer.surface, frame)
            .expect("failed to draw slice");
        let pts = index as u64 * args.frame_duration;
        let picture = adapter
            .on_frame_complete(
                buffer.surface,
                PictureInfo {
                    pts: Some(pts),
                    dts: Some(pts),
                    width: args.width,
                    height: args.height,
                    flags,
                    ..Default::default()
                },
            )
            .expect("failed to complete frame");

        // Keep polling until the pipeline can take more input.
        let mut status = pipeline.decode(Some(picture), DrainMode::None);
        loop {
            if status.contains(DecodeStatus::ERROR) {
                panic!("pipeline failed at frame {}", index);
            }
            if status.contains(DecodeStatus::PICTURE) {
                take_picture(&pipeline, &mut sink);
            }
            if status.contains(DecodeStatus::BUFFER) {
                break;
            }
            status = pipeline.decode(None, DrainMode::None);
        }
    }

    loop {
        let status = pipeline.decode(None, DrainMode::Hard);
        if status.contains(DecodeStatus::PICTURE) {
            take_picture(&pipeline, &mut sink);
        } else if !status.contains(DecodeStatus::DROPPED) {
            break;
        }
    }

    let stats = pipeline.stats();
    log::info!(
        "{} frames in, {} pictures out, {} dropped",
        stats.decoded,
        sink.frames,
        sink.dropped
    );
    pipeline.close();

    if let Some(md5) = sink.md5 {
        println!("{:x}", md5.compute());
    }
}
