// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Callbacks invoked by the codec library on its decode thread.
//!
//! None of them wait for the consumer. Failures are reported as errors, which the glue code
//! turns into the codec's native status with [`CallbackStatus`].

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::RwLockReadGuard;

use crate::backend::HardwareBackend;
use crate::picture::DecodedPicture;
use crate::picture::PictureInfo;
use crate::pipeline::device::DeviceState;
use crate::pipeline::surface_pool::SurfaceId;
use crate::pipeline::PipelineError;
use crate::pipeline::Shared;
use crate::DecodedFormat;
use crate::Resolution;

/// Initial value of the picture age counters, meaning "never seen".
const AGE_INFINITE: u32 = 1 << 30;

/// Status returned to the codec library.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum CallbackStatus {
    Ok = 0,
    Failed = -1,
}

impl<T> From<Result<T, PipelineError>> for CallbackStatus {
    fn from(result: Result<T, PipelineError>) -> Self {
        match result {
            Ok(_) => CallbackStatus::Ok,
            Err(e) => {
                log::debug!("decode callback failed: {}", e);
                CallbackStatus::Failed
            }
        }
    }
}

/// A surface handed to the codec.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CodecBuffer {
    pub surface: SurfaceId,
    /// Number of pictures since the content of the surface was last decoded, used by codecs to
    /// skip redundant work.
    pub age: u32,
}

/// Tracks the reordering distance of reference and non-reference pictures.
#[derive(Clone, Debug, PartialEq, Eq)]
struct PictureAge {
    ip_age: [u32; 2],
    b_age: u32,
}

impl Default for PictureAge {
    fn default() -> Self {
        Self {
            ip_age: [AGE_INFINITE; 2],
            b_age: AGE_INFINITE,
        }
    }
}

impl PictureAge {
    /// Returns the age of the next picture and advances the counters.
    fn advance(&mut self, is_reference: bool) -> u32 {
        if is_reference {
            let age = self.ip_age[0];
            self.ip_age[0] = self.ip_age[1].saturating_add(1);
            self.ip_age[1] = 1;
            self.b_age = self.b_age.saturating_add(1);
            age
        } else {
            let age = self.b_age;
            self.ip_age[0] = self.ip_age[0].saturating_add(1);
            self.ip_age[1] = self.ip_age[1].saturating_add(1);
            self.b_age = 1;
            age
        }
    }
}

/// Codec-facing side of a pipeline. Obtained from `Pipeline::decode_adapter()`.
pub struct DecodeAdapter<B: HardwareBackend> {
    shared: Arc<Shared<B>>,
    format: DecodedFormat,
    resolution: Resolution,
    age: PictureAge,
}

impl<B: HardwareBackend> DecodeAdapter<B> {
    pub(crate) fn new(
        shared: Arc<Shared<B>>,
        format: DecodedFormat,
        resolution: Resolution,
    ) -> Self {
        Self {
            shared,
            format,
            resolution,
            age: Default::default(),
        }
    }

    /// Takes the decoder section and checks that hardware calls are allowed.
    fn decoder_section(&self) -> Result<RwLockReadGuard<Option<B>>, PipelineError> {
        match self.shared.device.state() {
            DeviceState::Open => (),
            DeviceState::Lost | DeviceState::Reset => return Err(PipelineError::DeviceLost),
            DeviceState::Error => return Err(PipelineError::DeviceError),
        }

        let decoder = self.shared.decoder.read().unwrap();
        if decoder.is_none() {
            return Err(PipelineError::NotConfigured);
        }
        Ok(decoder)
    }

    /// Returns a surface for the codec to decode the next picture into. The surface is marked as
    /// referenced until `on_release_buffer()` is called for it.
    pub fn on_frame_needs_surface(
        &mut self,
        is_reference: bool,
    ) -> Result<CodecBuffer, PipelineError> {
        let decoder = self.decoder_section()?;
        let backend = decoder.as_ref().ok_or(PipelineError::NotConfigured)?;

        let surface = self
            .shared
            .surfaces
            .acquire(backend, self.format, self.resolution)?;
        drop(decoder);

        Ok(CodecBuffer {
            surface,
            age: self.age.advance(is_reference),
        })
    }

    /// The codec does not need `surface` as a reference anymore.
    pub fn on_release_buffer(&self, surface: SurfaceId) {
        let _decoder = match self.decoder_section() {
            Ok(decoder) => decoder,
            Err(e) => {
                log::debug!("not releasing buffer {:?}: {}", surface, e);
                return;
            }
        };

        if let Err(e) = self.shared.surfaces.clear_referenced(surface) {
            log::warn!("codec released an unknown buffer: {}", e);
        }
    }

    /// Submits a slice of `surface`'s bitstream to the hardware.
    pub fn on_draw_slice(&self, surface: SurfaceId, data: &[u8]) -> Result<(), PipelineError> {
        let decoder = self.decoder_section()?;
        let backend = decoder.as_ref().ok_or(PipelineError::NotConfigured)?;

        let Some(handle) = self.shared.surfaces.surface(surface) else {
            log::warn!("codec drew into an invalid surface {:?}", surface);
            return Err(PipelineError::InvalidSurface(surface));
        };

        backend.render_slice(&handle, data).map_err(|e| {
            self.shared.device.report_failure(&e);
            PipelineError::from(e)
        })
    }

    /// The codec is done with `surface`. Returns the picture to pass to `Pipeline::decode()`.
    ///
    /// Non-reference pictures stop being referenced right away, reference ones stay referenced
    /// until the codec releases them.
    pub fn on_frame_complete(
        &self,
        surface: SurfaceId,
        info: PictureInfo,
    ) -> Result<DecodedPicture, PipelineError> {
        let _decoder = self.decoder_section()?;
        let surfaces = &self.shared.surfaces;
        if !surfaces.validate(surface) {
            log::warn!("codec completed an invalid surface {:?}", surface);
            return Err(PipelineError::InvalidSurface(surface));
        }

        surfaces.mark_rendering(surface)?;
        if !info.is_reference {
            surfaces.clear_referenced(surface)?;
        }
        self.shared.counters.decoded.fetch_add(1, Ordering::Relaxed);

        Ok(DecodedPicture { surface, info })
    }
}
