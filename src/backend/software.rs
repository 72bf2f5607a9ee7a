// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A backend running entirely on the CPU.
//!
//! Surfaces are plain memory buffers. "Decoding" a slice copies its data into the surface, which
//! lets raw frames be fed through the pipeline, and the mixer scales and bob-deinterlaces with
//! the routines of [`crate::image_processing`]. Temporal references are accepted but not used.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::anyhow;

use crate::backend::library;
use crate::backend::library::LibraryRef;
use crate::backend::BackendFactory;
use crate::backend::BackendResult;
use crate::backend::HardwareBackend;
use crate::backend::MixJob;
use crate::backend::MixerFeatures;
use crate::backend::MixerParams;
use crate::backend::PictureStructure;
use crate::decoded_frame_size;
use crate::image_processing::convert_frame;
use crate::image_processing::Field;
use crate::DecodedFormat;
use crate::Resolution;

const LIBRARY_NAME: &str = "software";

/// A frame in system memory. Clones refer to the same memory.
#[derive(Clone)]
pub struct SoftwareFrame {
    format: DecodedFormat,
    resolution: Resolution,
    data: Arc<Mutex<Vec<u8>>>,
}

impl fmt::Debug for SoftwareFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareFrame")
            .field("format", &self.format)
            .field("resolution", &self.resolution)
            .finish()
    }
}

impl SoftwareFrame {
    fn new(format: DecodedFormat, resolution: Resolution) -> Self {
        let size = decoded_frame_size(
            format,
            resolution.width as usize,
            resolution.height as usize,
        );
        Self {
            format,
            resolution,
            data: Arc::new(Mutex::new(vec![0; size])),
        }
    }

    pub fn format(&self) -> DecodedFormat {
        self.format
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Returns a copy of the content of the frame.
    pub fn read(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

pub struct SoftwareMixer {
    params: MixerParams,
    features: MixerFeatures,
}

pub struct SoftwareBackend {
    /// Format of the output surfaces.
    format: DecodedFormat,
    _library: LibraryRef,
}

impl SoftwareBackend {
    pub fn new(format: DecodedFormat) -> BackendResult<Self> {
        let library = library::acquire(LIBRARY_NAME, || Ok(()))?;
        Ok(Self {
            format,
            _library: library,
        })
    }
}

impl HardwareBackend for SoftwareBackend {
    type Surface = SoftwareFrame;
    type OutputSurface = SoftwareFrame;
    type Mixer = SoftwareMixer;

    fn create_surface(
        &self,
        format: DecodedFormat,
        resolution: Resolution,
    ) -> BackendResult<Self::Surface> {
        Ok(SoftwareFrame::new(format, resolution))
    }

    fn destroy_surface(&self, _: Self::Surface) -> BackendResult<()> {
        Ok(())
    }

    fn render_slice(&self, surface: &Self::Surface, data: &[u8]) -> BackendResult<()> {
        let mut dst = surface.data.lock().unwrap();
        let len = data.len().min(dst.len());
        if len < data.len() {
            log::warn!(
                "slice of {} bytes truncated to fit {:?}",
                data.len(),
                surface
            );
        }
        dst[..len].copy_from_slice(&data[..len]);
        Ok(())
    }

    fn create_output_surface(&self, resolution: Resolution) -> BackendResult<Self::OutputSurface> {
        Ok(SoftwareFrame::new(self.format, resolution))
    }

    fn destroy_output_surface(&self, _: Self::OutputSurface) -> BackendResult<()> {
        Ok(())
    }

    fn create_mixer(&self, params: &MixerParams) -> BackendResult<Self::Mixer> {
        if params.format != self.format {
            return Err(anyhow!(
                "cannot convert {:?} surfaces into {:?} outputs",
                params.format,
                self.format
            )
            .into());
        }

        Ok(SoftwareMixer {
            params: *params,
            features: Default::default(),
        })
    }

    fn configure_mixer(
        &self,
        mixer: &mut Self::Mixer,
        features: &MixerFeatures,
    ) -> BackendResult<()> {
        mixer.features = features.clone();
        Ok(())
    }

    fn mix(
        &self,
        mixer: &mut Self::Mixer,
        job: &MixJob<Self::Surface>,
        target: &Self::OutputSurface,
    ) -> BackendResult<()> {
        let current = job.current;
        if current.resolution != mixer.params.surface_resolution
            || target.resolution != mixer.params.output_resolution
        {
            return Err(anyhow!(
                "cannot mix {:?} into {:?} with a mixer for {:?}",
                current,
                target,
                mixer.params
            )
            .into());
        }

        let field = match job.structure {
            PictureStructure::Frame => None,
            PictureStructure::TopField => Some(Field::Top),
            PictureStructure::BottomField => Some(Field::Bottom),
        };

        let src = current.data.lock().unwrap();
        let mut dst = target.data.lock().unwrap();
        convert_frame(
            mixer.params.format,
            &src,
            current.resolution,
            job.source_rect,
            &mut dst,
            target.resolution,
            field,
        );

        Ok(())
    }

    fn destroy_mixer(&self, _: Self::Mixer) -> BackendResult<()> {
        Ok(())
    }
}

/// Opens [`SoftwareBackend`]s producing `format` outputs.
pub struct SoftwareFactory {
    format: DecodedFormat,
}

impl SoftwareFactory {
    pub fn new(format: DecodedFormat) -> Self {
        Self { format }
    }
}

impl BackendFactory for SoftwareFactory {
    type Backend = SoftwareBackend;

    fn open(&self) -> BackendResult<Self::Backend> {
        SoftwareBackend::new(self.format)
    }
}
