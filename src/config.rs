// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Pipeline configuration.
//!
//! Loading these from a settings store is up to the client. Enums can be parsed from strings, and
//! [`DeinterlaceMethod`] from the numerical ids settings stores usually keep.

use std::str::FromStr;
use std::time::Duration;

use enumn::N;

use crate::pipeline::PipelineError;
use crate::Resolution;

/// Smallest and largest supported number of output pictures.
pub const MIN_POOL_SIZE: usize = 4;
pub const MAX_POOL_SIZE: usize = 16;

/// How decoded pictures reach the consumer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Decode surfaces are handed to the consumer directly. No post-processing takes place.
    ZeroCopy,
    /// Decode surfaces go through the mixer thread, which renders them into output surfaces.
    #[default]
    Mixer,
}

impl FromStr for OutputMode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zero-copy" | "zerocopy" => Ok(OutputMode::ZeroCopy),
            "mixer" => Ok(OutputMode::Mixer),
            _ => Err("unrecognized output mode. Valid values: zero-copy, mixer"),
        }
    }
}

/// When to deinterlace.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DeinterlaceMode {
    Off,
    /// Deinterlace pictures flagged as interlaced.
    #[default]
    Auto,
    /// Deinterlace every picture.
    Force,
}

impl FromStr for DeinterlaceMode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(DeinterlaceMode::Off),
            "auto" => Ok(DeinterlaceMode::Auto),
            "force" => Ok(DeinterlaceMode::Force),
            _ => Err("unrecognized deinterlace mode. Valid values: off, auto, force"),
        }
    }
}

/// How to deinterlace.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, N)]
#[repr(u32)]
pub enum DeinterlaceMethod {
    None = 0,
    /// Pick a method depending on the picture height, see [`VideoSettings::resolve_method`].
    #[default]
    Auto = 1,
    Bob = 2,
    Temporal = 3,
    /// Temporal, but only one output picture per frame.
    TemporalHalf = 4,
    TemporalSpatial = 5,
    /// Temporal-spatial, but only one output picture per frame.
    TemporalSpatialHalf = 6,
    InverseTelecine = 7,
}

impl DeinterlaceMethod {
    /// Whether the mixer deinterlaces pictures with this method.
    pub fn is_mixer_method(self) -> bool {
        !matches!(self, DeinterlaceMethod::None)
    }

    /// Number of output pictures produced per interlaced frame.
    pub fn field_passes(self) -> usize {
        match self {
            DeinterlaceMethod::TemporalHalf | DeinterlaceMethod::TemporalSpatialHalf => 1,
            _ => 2,
        }
    }
}

impl FromStr for DeinterlaceMethod {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(DeinterlaceMethod::None),
            "auto" => Ok(DeinterlaceMethod::Auto),
            "bob" => Ok(DeinterlaceMethod::Bob),
            "temporal" => Ok(DeinterlaceMethod::Temporal),
            "temporal-half" => Ok(DeinterlaceMethod::TemporalHalf),
            "temporal-spatial" => Ok(DeinterlaceMethod::TemporalSpatial),
            "temporal-spatial-half" => Ok(DeinterlaceMethod::TemporalSpatialHalf),
            "inverse-telecine" => Ok(DeinterlaceMethod::InverseTelecine),
            _ => s
                .parse::<u32>()
                .ok()
                .and_then(DeinterlaceMethod::n)
                .ok_or("unrecognized deinterlace method"),
        }
    }
}

/// Post-processing knobs. They can be changed while the pipeline runs and are picked up by the
/// mixer on its next cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoSettings {
    pub deinterlace_mode: DeinterlaceMode,
    pub deinterlace_method: DeinterlaceMethod,
    /// Method used by [`DeinterlaceMethod::Auto`] for pictures at least 720 lines high.
    pub hd_method: Option<DeinterlaceMethod>,
    /// Method used by [`DeinterlaceMethod::Auto`] for smaller pictures.
    pub sd_method: Option<DeinterlaceMethod>,
    pub postproc: bool,
    pub noise_reduction: f32,
    pub sharpness: f32,
    /// Quality level of the hardware upscaler. 0 disables it.
    pub upscaling: u32,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            deinterlace_mode: DeinterlaceMode::Auto,
            deinterlace_method: DeinterlaceMethod::Auto,
            hd_method: None,
            sd_method: None,
            postproc: true,
            noise_reduction: 0.0,
            sharpness: 0.0,
            upscaling: 0,
        }
    }
}

impl VideoSettings {
    /// Returns the concrete method to use for pictures `height` lines high.
    pub fn resolve_method(&self, height: u32) -> DeinterlaceMethod {
        match self.deinterlace_method {
            DeinterlaceMethod::Auto => {
                let preferred = if height >= 720 {
                    self.hd_method
                } else {
                    self.sd_method
                };
                match preferred {
                    Some(DeinterlaceMethod::Auto) | None => DeinterlaceMethod::Temporal,
                    Some(method) => method,
                }
            }
            method => method,
        }
    }

    /// Returns the method to apply to a picture `height` lines high, or `None` if the picture
    /// should go through the mixer as a frame.
    pub fn method_for(&self, interlaced: bool, height: u32) -> Option<DeinterlaceMethod> {
        let deinterlace = match self.deinterlace_mode {
            DeinterlaceMode::Off => false,
            DeinterlaceMode::Auto => interlaced,
            DeinterlaceMode::Force => true,
        };
        if !deinterlace {
            return None;
        }

        Some(self.resolve_method(height)).filter(|m| m.is_mixer_method())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Number of output pictures circulating between the mixer and the consumer.
    pub pool_size: usize,
    /// Number of render buffers of the consumer. Fewer pictures are buffered while the consumer
    /// presents fewer or more pictures than this.
    pub num_render_buffers: usize,
    /// Size of the output pictures. Defaults to the display resolution of the stream.
    pub output_resolution: Option<Resolution>,
    pub output_mode: OutputMode,
    /// Number of ready pictures to buffer before reporting them. Computed from the pool size and
    /// the consumer's progress if not set.
    pub target_depth: Option<usize>,
    pub settings: VideoSettings,
    /// How long `check()` waits for a lost device to come back.
    pub device_reset_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            num_render_buffers: 3,
            output_resolution: None,
            output_mode: OutputMode::Mixer,
            target_depth: None,
            settings: Default::default(),
            device_reset_timeout: Duration::from_millis(2000),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(MIN_POOL_SIZE..=MAX_POOL_SIZE).contains(&self.pool_size) {
            return Err(PipelineError::InvalidConfig(format!(
                "pool size {} not in {}..={}",
                self.pool_size, MIN_POOL_SIZE, MAX_POOL_SIZE
            )));
        }

        if self.num_render_buffers == 0 {
            return Err(PipelineError::InvalidConfig(
                "at least one render buffer is needed".into(),
            ));
        }

        if let Some(depth) = self.target_depth {
            if depth == 0 || depth > self.pool_size {
                return Err(PipelineError::InvalidConfig(format!(
                    "target depth {} must be in 1..={}",
                    depth, self.pool_size
                )));
            }
        }

        if let Some(res) = self.output_resolution {
            if res.width == 0 || res.height == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "invalid output resolution {:?}",
                    res
                )));
            }
        }

        Ok(())
    }
}
