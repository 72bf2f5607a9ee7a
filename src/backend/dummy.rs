// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy backend whose only purpose is to let the pipeline
//! run so we can test it in isolation.
//!
//! It keeps track of the calls it receives and can be told to fail some of them.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use crate::backend::BackendError;
use crate::backend::BackendFactory;
use crate::backend::BackendResult;
use crate::backend::HardwareBackend;
use crate::backend::MixJob;
use crate::backend::MixerFeatures;
use crate::backend::MixerParams;
use crate::backend::PictureStructure;
use crate::DecodedFormat;
use crate::Resolution;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct DummySurface(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct DummyOutput(pub u32);

pub(crate) struct DummyMixer {
    pub features: MixerFeatures,
}

/// Kind of error to return from the next mix.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum DummyFailure {
    Preempted,
    OutOfResources,
    Other,
}

impl From<DummyFailure> for BackendError {
    fn from(failure: DummyFailure) -> Self {
        match failure {
            DummyFailure::Preempted => BackendError::Preempted,
            DummyFailure::OutOfResources => BackendError::OutOfResources,
            DummyFailure::Other => BackendError::Other(anyhow::anyhow!("injected failure")),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct DummyStats {
    pub surfaces_created: usize,
    pub surfaces_destroyed: usize,
    pub outputs_created: usize,
    pub outputs_destroyed: usize,
    pub mixers_created: usize,
    pub mixers_destroyed: usize,
    pub mixer_configurations: usize,
    pub slices: usize,
    pub presents: usize,
}

/// A mix call as seen by the backend.
#[derive(Clone, Debug)]
pub(crate) struct MixRecord {
    pub structure: PictureStructure,
    pub past: Vec<Option<DummySurface>>,
    pub current: DummySurface,
    pub future: Vec<Option<DummySurface>>,
    pub target: DummyOutput,
    pub features: MixerFeatures,
}

#[derive(Default)]
struct DummyState {
    next_id: AtomicU32,
    fail_surface_creation: AtomicBool,
    fail_next_mix: Mutex<Option<DummyFailure>>,
    stats: Mutex<DummyStats>,
    mixes: Mutex<Vec<MixRecord>>,
}

/// Clones share the same state, so tests can keep one around to inspect what the pipeline did.
#[derive(Clone, Default)]
pub(crate) struct DummyBackend {
    state: Arc<DummyState>,
}

impl DummyBackend {
    pub fn stats(&self) -> DummyStats {
        self.state.stats.lock().unwrap().clone()
    }

    pub fn mixes(&self) -> Vec<MixRecord> {
        self.state.mixes.lock().unwrap().clone()
    }

    pub fn fail_surface_creation(&self, fail: bool) {
        self.state
            .fail_surface_creation
            .store(fail, Ordering::SeqCst);
    }

    pub fn fail_next_mix(&self, failure: DummyFailure) {
        *self.state.fail_next_mix.lock().unwrap() = Some(failure);
    }

    fn next_id(&self) -> u32 {
        self.state.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn update_stats<F: FnOnce(&mut DummyStats)>(&self, f: F) {
        f(&mut self.state.stats.lock().unwrap())
    }
}

impl HardwareBackend for DummyBackend {
    type Surface = DummySurface;
    type OutputSurface = DummyOutput;
    type Mixer = DummyMixer;

    fn create_surface(&self, _: DecodedFormat, _: Resolution) -> BackendResult<Self::Surface> {
        if self.state.fail_surface_creation.load(Ordering::SeqCst) {
            return Err(BackendError::OutOfResources);
        }

        self.update_stats(|s| s.surfaces_created += 1);
        Ok(DummySurface(self.next_id()))
    }

    fn destroy_surface(&self, _: Self::Surface) -> BackendResult<()> {
        self.update_stats(|s| s.surfaces_destroyed += 1);
        Ok(())
    }

    fn render_slice(&self, _: &Self::Surface, _: &[u8]) -> BackendResult<()> {
        self.update_stats(|s| s.slices += 1);
        Ok(())
    }

    fn create_output_surface(&self, _: Resolution) -> BackendResult<Self::OutputSurface> {
        self.update_stats(|s| s.outputs_created += 1);
        Ok(DummyOutput(self.next_id()))
    }

    fn destroy_output_surface(&self, _: Self::OutputSurface) -> BackendResult<()> {
        self.update_stats(|s| s.outputs_destroyed += 1);
        Ok(())
    }

    fn create_mixer(&self, _: &MixerParams) -> BackendResult<Self::Mixer> {
        self.update_stats(|s| s.mixers_created += 1);
        Ok(DummyMixer {
            features: Default::default(),
        })
    }

    fn configure_mixer(
        &self,
        mixer: &mut Self::Mixer,
        features: &MixerFeatures,
    ) -> BackendResult<()> {
        self.update_stats(|s| s.mixer_configurations += 1);
        mixer.features = features.clone();
        Ok(())
    }

    fn mix(
        &self,
        mixer: &mut Self::Mixer,
        job: &MixJob<Self::Surface>,
        target: &Self::OutputSurface,
    ) -> BackendResult<()> {
        if let Some(failure) = self.state.fail_next_mix.lock().unwrap().take() {
            return Err(failure.into());
        }

        self.state.mixes.lock().unwrap().push(MixRecord {
            structure: job.structure,
            past: job.past.to_vec(),
            current: *job.current,
            future: job.future.to_vec(),
            target: *target,
            features: mixer.features.clone(),
        });

        Ok(())
    }

    fn destroy_mixer(&self, _: Self::Mixer) -> BackendResult<()> {
        self.update_stats(|s| s.mixers_destroyed += 1);
        Ok(())
    }

    fn present(&self, _: &Self::OutputSurface) -> BackendResult<()> {
        self.update_stats(|s| s.presents += 1);
        Ok(())
    }
}

/// Hands out clones of the same [`DummyBackend`].
#[derive(Default)]
pub(crate) struct DummyFactory {
    pub backend: DummyBackend,
    opens: AtomicU32,
    fail_open: AtomicBool,
}

impl DummyFactory {
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }
}

impl BackendFactory for DummyFactory {
    type Backend = DummyBackend;

    fn open(&self) -> BackendResult<Self::Backend> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(BackendError::Other(anyhow::anyhow!("no device")));
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.backend.clone())
    }
}
