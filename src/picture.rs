// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Pictures exchanged between the decoder, the mixer and the consumer.

use bitflags::bitflags;

use crate::pipeline::surface_pool::SurfaceId;
use crate::Rect;

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct PictureFlags: u32 {
        const INTERLACED = 1 << 0;
        const TOP_FIELD_FIRST = 1 << 1;
        const REPEAT_TOP_FIELD = 1 << 2;
        /// The picture should not be displayed.
        const DROPPED = 1 << 3;
        /// Post-processing should be skipped for this picture.
        const NO_POSTPROC = 1 << 4;
    }
}

impl PictureFlags {
    /// Flags describing the field layout of a picture. They do not apply anymore once the mixer
    /// has processed it.
    pub const FIELD_FLAGS: Self = Self::INTERLACED
        .union(Self::TOP_FIELD_FIRST)
        .union(Self::REPEAT_TOP_FIELD);
}

/// Presentation metadata of a picture.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PictureInfo {
    /// Presentation timestamp, in microseconds.
    pub pts: Option<u64>,
    /// Decode timestamp, in microseconds.
    pub dts: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub flags: PictureFlags,
    /// Region of the picture to display. The whole picture if `None`.
    pub region: Option<Rect>,
    /// Whether the codec may use this picture as a prediction reference.
    pub is_reference: bool,
    /// Extra display duration, in units of frames.
    pub repeat_picture: f32,
}

impl PictureInfo {
    pub fn is_interlaced(&self) -> bool {
        self.flags.contains(PictureFlags::INTERLACED)
    }

    pub fn is_dropped(&self) -> bool {
        self.flags.contains(PictureFlags::DROPPED)
    }

    /// Part of the picture to process.
    pub fn source_rect(&self) -> Rect {
        self.region.unwrap_or(Rect {
            x0: 0,
            y0: 0,
            x1: self.width,
            y1: self.height,
        })
    }
}

/// A picture the decoder has finished writing into a decode surface.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedPicture {
    pub surface: SurfaceId,
    pub info: PictureInfo,
}

/// Identifies a picture handed to the consumer. Handles from before a reset or a device loss are
/// stale and ignored when released.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PictureHandle {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

/// Where the pixels of a processed picture live.
#[derive(Clone, Debug)]
pub enum PictureSurface<S, O> {
    /// The decode surface itself, when the mixer is bypassed.
    Decode(S),
    /// A surface the mixer has rendered into.
    Output(O),
}

/// A picture ready to be displayed.
///
/// The consumer must give it back with `Pipeline::release_picture` once it is done with it.
#[derive(Clone, Debug)]
pub struct ProcessedPicture<S, O> {
    pub handle: PictureHandle,
    pub surface: PictureSurface<S, O>,
    pub info: PictureInfo,
}
