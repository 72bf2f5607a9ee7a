// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Asynchronous picture pipeline for hardware-accelerated video decoding.
//!
//! A codec library decodes into GPU surfaces handed out by the [`pipeline::DecodeAdapter`], a
//! dedicated mixer thread deinterlaces and scales the decoded pictures, and a consumer pulls the
//! finished pictures from the [`Pipeline`] at its own pace. The hardware itself is hidden behind
//! the [`backend::HardwareBackend`] trait.

pub mod backend;
pub mod config;
pub mod image_processing;
pub mod picture;
pub mod pipeline;

use std::str::FromStr;

pub use pipeline::DecodeStatus;
pub use pipeline::DrainMode;
pub use pipeline::Pipeline;
pub use pipeline::PipelineError;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Whether `self` can contain `other`.
    pub fn can_contain(&self, other: Self) -> bool {
        self.width >= other.width && self.height >= other.height
    }

    pub fn get_area(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

/// A rectangle in pixel coordinates. `x1` and `y1` are exclusive.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Rect {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }
}

impl From<Resolution> for Rect {
    fn from(value: Resolution) -> Self {
        Self {
            x0: 0,
            y0: 0,
            x1: value.width,
            y1: value.height,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DecodedFormat {
    #[default]
    NV12,
    I420,
}

impl FromStr for DecodedFormat {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nv12" | "NV12" => Ok(DecodedFormat::NV12),
            "i420" | "I420" => Ok(DecodedFormat::I420),
            _ => Err("unrecognized output format. Valid values: nv12, i420"),
        }
    }
}

/// Returns the size required to store a frame of `format` with size `width`x`height`, without any
/// padding.
pub fn decoded_frame_size(format: DecodedFormat, width: usize, height: usize) -> usize {
    match format {
        DecodedFormat::I420 | DecodedFormat::NV12 => {
            let u_size = width * height;
            // U and V planes need to be aligned to 2.
            let uv_size = ((width + 1) / 2) * ((height + 1) / 2) * 2;

            u_size + uv_size
        }
    }
}

/// Parameters of the stream the pipeline is opened for.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamInfo {
    /// Format of the decode surfaces.
    pub format: DecodedFormat,
    /// Size of the decode surfaces.
    pub coded_resolution: Resolution,
    /// Visible part of the decode surfaces.
    pub display_resolution: Resolution,
}
