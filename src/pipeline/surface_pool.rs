// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Arena of decode surfaces shared by the decoder, the mixer and the consumer.
//!
//! Surfaces are addressed by a [`SurfaceId`] made of a slot index and a generation counter, so
//! stale handles held by the codec across a flush or a device reset can be detected in O(1).

use std::sync::Mutex;

use bitflags::bitflags;

use crate::backend::HardwareBackend;
use crate::pipeline::PipelineError;
use crate::DecodedFormat;
use crate::Resolution;

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct SurfaceState: u32 {
        /// The codec may still read the surface to predict other pictures.
        const USED_FOR_REFERENCE = 1 << 0;
        /// The surface is waiting to be mixed or displayed.
        const USED_FOR_RENDER = 1 << 1;
    }
}

/// Handle to a decode surface.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceId {
    index: u32,
    generation: u32,
}

impl SurfaceId {
    pub fn index(&self) -> u32 {
        self.index
    }
}

struct Slot<S> {
    surface: Option<S>,
    generation: u32,
    state: SurfaceState,
    format: DecodedFormat,
    resolution: Resolution,
    /// Set when the surface has been torn down while still in use. Invalid surfaces are never
    /// handed out again and are reclaimed by `sweep()` once they are not rendered anymore.
    invalid: bool,
    /// Set when the device owning the surface is gone, so it must not be passed back to it.
    orphaned: bool,
}

impl<S> Slot<S> {
    fn vacate(&mut self) -> Option<S> {
        self.generation = self.generation.wrapping_add(1);
        self.state = SurfaceState::empty();
        self.invalid = false;
        self.orphaned = false;
        self.surface.take()
    }
}

pub struct SurfacePool<B: HardwareBackend> {
    slots: Mutex<Vec<Slot<B::Surface>>>,
}

impl<B: HardwareBackend> Default for SurfacePool<B> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }
}

impl<B: HardwareBackend> SurfacePool<B> {
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns a surface that is neither referenced nor rendered, creating a new one from
    /// `backend` if there is none.
    ///
    /// The surface is marked as referenced before the pool is unlocked, so concurrent callers
    /// never get the same surface.
    pub fn acquire(
        &self,
        backend: &B,
        format: DecodedFormat,
        resolution: Resolution,
    ) -> Result<SurfaceId, PipelineError> {
        let mut slots = self.slots.lock().unwrap();

        let reusable = slots.iter().position(|slot| {
            slot.surface.is_some()
                && !slot.invalid
                && slot.state.is_empty()
                && slot.format == format
                && slot.resolution == resolution
        });
        if let Some(index) = reusable {
            slots[index].state = SurfaceState::USED_FOR_REFERENCE;
            return Ok(SurfaceId {
                index: index as u32,
                generation: slots[index].generation,
            });
        }

        let surface = backend
            .create_surface(format, resolution)
            .map_err(|e| PipelineError::Allocation(e.into()))?;

        let index = match slots.iter().position(|slot| slot.surface.is_none()) {
            Some(index) => index,
            None => {
                slots.push(Slot {
                    surface: None,
                    generation: 0,
                    state: SurfaceState::empty(),
                    format,
                    resolution,
                    invalid: false,
                    orphaned: false,
                });
                slots.len() - 1
            }
        };

        let slot = &mut slots[index];
        slot.surface = Some(surface);
        slot.state = SurfaceState::USED_FOR_REFERENCE;
        slot.format = format;
        slot.resolution = resolution;
        log::debug!(
            "created decode surface #{} ({}x{})",
            index,
            resolution.width,
            resolution.height
        );

        Ok(SurfaceId {
            index: index as u32,
            generation: slot.generation,
        })
    }

    /// Runs `f` on the slot `id` points to, if the handle is still current.
    fn with_slot<T, F>(&self, id: SurfaceId, f: F) -> Option<T>
    where
        F: FnOnce(&mut Slot<B::Surface>) -> T,
    {
        let mut slots = self.slots.lock().unwrap();
        slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.surface.is_some() && slot.generation == id.generation)
            .map(f)
    }

    /// Whether `id` designates a live surface that can still be used for decoding.
    pub fn validate(&self, id: SurfaceId) -> bool {
        self.with_slot(id, |slot| !slot.invalid).unwrap_or(false)
    }

    /// Returns the backend handle of `id` if it is still valid.
    pub fn surface(&self, id: SurfaceId) -> Option<B::Surface> {
        self.with_slot(id, |slot| (!slot.invalid).then(|| slot.surface.clone()))
            .flatten()
            .flatten()
    }

    pub fn state(&self, id: SurfaceId) -> Option<SurfaceState> {
        self.with_slot(id, |slot| slot.state)
    }

    fn set_state(
        &self,
        id: SurfaceId,
        bits: SurfaceState,
        value: bool,
    ) -> Result<(), PipelineError> {
        self.with_slot(id, |slot| {
            // Setting bits on an invalid surface would keep it alive forever.
            if value && slot.invalid {
                return false;
            }
            slot.state.set(bits, value);
            true
        })
        .filter(|done| *done)
        .map(|_| ())
        .ok_or(PipelineError::InvalidSurface(id))
    }

    pub fn mark_referenced(&self, id: SurfaceId) -> Result<(), PipelineError> {
        self.set_state(id, SurfaceState::USED_FOR_REFERENCE, true)
    }

    pub fn clear_referenced(&self, id: SurfaceId) -> Result<(), PipelineError> {
        self.set_state(id, SurfaceState::USED_FOR_REFERENCE, false)
    }

    pub fn mark_rendering(&self, id: SurfaceId) -> Result<(), PipelineError> {
        self.set_state(id, SurfaceState::USED_FOR_RENDER, true)
    }

    pub fn clear_rendering(&self, id: SurfaceId) -> Result<(), PipelineError> {
        self.set_state(id, SurfaceState::USED_FOR_RENDER, false)
    }

    /// Clears the render bit of all `ids`, logging the ones that are not current anymore.
    pub fn release_all<I: IntoIterator<Item = SurfaceId>>(&self, ids: I) {
        for id in ids {
            if let Err(e) = self.clear_rendering(id) {
                log::debug!("not releasing surface: {}", e);
            }
        }
    }

    /// Destroys all surfaces that are not being rendered. Rendered surfaces are invalidated and
    /// kept until a later `sweep()` finds them released.
    ///
    /// Returns the number of surfaces that could not be destroyed.
    pub fn teardown(&self, backend: &B) -> usize {
        let mut slots = self.slots.lock().unwrap();
        let mut leaked = 0;

        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.surface.is_none() {
                continue;
            }

            if slot.state.contains(SurfaceState::USED_FOR_RENDER) {
                log::warn!("decode surface #{} is still being rendered, leaking it", index);
                slot.invalid = true;
                leaked += 1;
                continue;
            }

            let orphaned = slot.orphaned;
            if let Some(surface) = slot.vacate() {
                if !orphaned {
                    if let Err(e) = backend.destroy_surface(surface) {
                        log::error!("failed to destroy decode surface #{}: {}", index, e);
                    }
                }
            }
        }

        leaked
    }

    /// Invalidates every surface without calling into the backend, e.g. because the device is
    /// gone. The handles are dropped by the next `sweep()` or `teardown()`.
    pub fn invalidate_all(&self) {
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.iter_mut().filter(|slot| slot.surface.is_some()) {
            slot.invalid = true;
            slot.orphaned = true;
        }
    }

    /// Reclaims invalidated surfaces that are not rendered anymore.
    ///
    /// Returns the number of reclaimed surfaces.
    pub fn sweep(&self, backend: &B) -> usize {
        let mut slots = self.slots.lock().unwrap();
        let mut reclaimed = 0;

        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.surface.is_none()
                || !slot.invalid
                || slot.state.contains(SurfaceState::USED_FOR_RENDER)
            {
                continue;
            }

            let orphaned = slot.orphaned;
            if let Some(surface) = slot.vacate() {
                reclaimed += 1;
                if !orphaned {
                    if let Err(e) = backend.destroy_surface(surface) {
                        log::error!("failed to destroy leaked decode surface #{}: {}", index, e);
                    }
                }
            }
        }

        reclaimed
    }

    /// Number of registered surfaces, including leaked ones.
    pub fn num_surfaces(&self) -> usize {
        let slots = self.slots.lock().unwrap();
        slots.iter().filter(|slot| slot.surface.is_some()).count()
    }

    /// Number of surfaces `acquire()` could hand out without allocating.
    pub fn num_free(&self) -> usize {
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .filter(|slot| slot.surface.is_some() && !slot.invalid && slot.state.is_empty())
            .count()
    }
}
