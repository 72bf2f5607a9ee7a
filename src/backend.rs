// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Shared code for hardware backends.
//!
//! A backend is a provider of decode surfaces and of a video mixer, most likely
//! hardware-accelerated. The pipeline only talks to the hardware through [`HardwareBackend`],
//! and (re)opens devices through a [`BackendFactory`] so it can rebuild everything after the
//! device has been lost.

#[cfg(test)]
pub(crate) mod dummy;
pub mod library;
#[cfg(feature = "software")]
pub mod software;

use std::fmt::Debug;

use thiserror::Error;

use crate::config::DeinterlaceMethod;
use crate::DecodedFormat;
use crate::Rect;
use crate::Resolution;

/// Error returned by backend methods.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The device has been taken away from us, e.g. by a display mode change. Resources created
    /// from it are gone and need to be rebuilt once the device is available again.
    #[error("the device has been preempted")]
    Preempted,
    #[error("not enough resources to proceed with the operation now")]
    OutOfResources,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type returned by backend methods.
pub type BackendResult<T> = Result<T, BackendError>;

/// Which part of a picture the mixer should process.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PictureStructure {
    /// Progressive or weaved picture, processed in one pass.
    Frame,
    TopField,
    BottomField,
}

impl PictureStructure {
    /// Returns the other field. Frames stay frames.
    pub fn opposite(self) -> Self {
        match self {
            PictureStructure::Frame => PictureStructure::Frame,
            PictureStructure::TopField => PictureStructure::BottomField,
            PictureStructure::BottomField => PictureStructure::TopField,
        }
    }
}

/// Parameters the mixer is created with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MixerParams {
    pub format: DecodedFormat,
    /// Size of the decode surfaces fed to the mixer.
    pub surface_resolution: Resolution,
    /// Size of the output surfaces the mixer renders into.
    pub output_resolution: Resolution,
}

/// Post-processing features of a mixer. These are knobs read at mix time, the pipeline does not
/// depend on them.
#[derive(Clone, Debug, PartialEq)]
pub struct MixerFeatures {
    pub postproc: bool,
    pub deinterlacer: DeinterlaceMethod,
    pub noise_reduction: f32,
    pub sharpness: f32,
    pub upscaling: u32,
}

impl Default for MixerFeatures {
    fn default() -> Self {
        Self {
            postproc: true,
            deinterlacer: DeinterlaceMethod::None,
            noise_reduction: 0.0,
            sharpness: 0.0,
            upscaling: 0,
        }
    }
}

/// A single pass of the mixer.
#[derive(Debug)]
pub struct MixJob<'a, S> {
    pub structure: PictureStructure,
    /// Reference pictures preceding `current`, most recent first.
    pub past: &'a [Option<S>],
    pub current: &'a S,
    /// Reference pictures following `current`, closest first.
    pub future: &'a [Option<S>],
    /// Part of `current` to process.
    pub source_rect: Rect,
    /// Part of the output surface to render into.
    pub destination_rect: Rect,
}

/// Interface to the hardware a pipeline runs on.
///
/// Surface types are cheap, clonable handles: the pipeline keeps them in its own bookkeeping and
/// passes them back to the backend, which owns the actual memory.
pub trait HardwareBackend: Send + Sync + 'static {
    /// Handle to a surface the decoder writes into.
    type Surface: Clone + Debug + Send + Sync + 'static;
    /// Handle to a surface the mixer renders into.
    type OutputSurface: Clone + Debug + Send + Sync + 'static;
    /// A video mixer instance. Only ever used from the mixer thread.
    type Mixer: Send + 'static;

    fn create_surface(
        &self,
        format: DecodedFormat,
        resolution: Resolution,
    ) -> BackendResult<Self::Surface>;

    fn destroy_surface(&self, surface: Self::Surface) -> BackendResult<()>;

    /// Submits a slice of decode work targeting `surface`.
    fn render_slice(&self, surface: &Self::Surface, data: &[u8]) -> BackendResult<()>;

    fn create_output_surface(&self, resolution: Resolution) -> BackendResult<Self::OutputSurface>;

    fn destroy_output_surface(&self, surface: Self::OutputSurface) -> BackendResult<()>;

    fn create_mixer(&self, params: &MixerParams) -> BackendResult<Self::Mixer>;

    /// Applies `features` to `mixer`. Called again whenever the features change.
    fn configure_mixer(
        &self,
        mixer: &mut Self::Mixer,
        features: &MixerFeatures,
    ) -> BackendResult<()>;

    /// Renders one pass described by `job` into `target`.
    fn mix(
        &self,
        mixer: &mut Self::Mixer,
        job: &MixJob<Self::Surface>,
        target: &Self::OutputSurface,
    ) -> BackendResult<()>;

    fn destroy_mixer(&self, mixer: Self::Mixer) -> BackendResult<()>;

    /// Queues `surface` for display. Backends that leave presentation to the renderer don't need
    /// to do anything here.
    fn present(&self, _surface: &Self::OutputSurface) -> BackendResult<()> {
        Ok(())
    }
}

/// Opens devices. The pipeline keeps its factory around so it can reopen the device after it
/// has been lost and reset.
pub trait BackendFactory: Send + Sync + 'static {
    type Backend: HardwareBackend;

    fn open(&self) -> BackendResult<Self::Backend>;
}
