// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fixed pool of output pictures circulating between the mixer and the consumer.
//!
//! Every picture is in exactly one of the `free`, `mixing`, `used` or `presented` queues, and
//! goes through them in this order before becoming free again. Pictures are only created by
//! `configure()`, so the total never changes while the pipeline runs.

use std::collections::VecDeque;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use crate::backend::HardwareBackend;
use crate::picture::DecodedPicture;
use crate::picture::PictureHandle;
use crate::picture::PictureInfo;
use crate::picture::PictureSurface;
use crate::picture::ProcessedPicture;
use crate::pipeline::surface_pool::SurfaceId;
use crate::pipeline::surface_pool::SurfacePool;
use crate::pipeline::PipelineError;

/// Processed picture type handed out by a pipeline running on `B`.
pub type BackendPicture<B> =
    ProcessedPicture<<B as HardwareBackend>::Surface, <B as HardwareBackend>::OutputSurface>;

/// How long the mixer sleeps between two looks at the free queue.
const SLOT_WAIT: Duration = Duration::from_millis(10);

struct OutputPicture<B: HardwareBackend> {
    generation: u32,
    reported: bool,
    info: PictureInfo,
    /// Decode surface this picture keeps the render bit of, released when the picture is freed.
    source: Option<SurfaceId>,
    decode_surface: Option<B::Surface>,
    output_surface: Option<B::OutputSurface>,
}

impl<B: HardwareBackend> OutputPicture<B> {
    fn new(output_surface: Option<B::OutputSurface>) -> Self {
        Self {
            generation: 0,
            reported: false,
            info: Default::default(),
            source: None,
            decode_surface: None,
            output_surface,
        }
    }
}

/// Number of pictures in each queue.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub free: usize,
    pub mixing: usize,
    pub used: usize,
    pub presented: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.free + self.mixing + self.used + self.presented
    }
}

/// What the consumer has not seen yet in the `used` queue.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct UsedScan {
    pub used: usize,
    /// Number of reported pictures before the first unreported one.
    pub reported: usize,
    /// Position and dropped status of the first unreported picture.
    pub first_unreported: Option<(usize, bool)>,
}

struct Queues<B: HardwareBackend> {
    pictures: Vec<OutputPicture<B>>,
    free: VecDeque<usize>,
    mixing: VecDeque<usize>,
    used: VecDeque<usize>,
    presented: VecDeque<usize>,
    /// Presented picture the consumer has not acknowledged yet.
    pending_present: Option<usize>,
    next_generation: u32,
}

impl<B: HardwareBackend> Queues<B> {
    fn counts(&self) -> QueueCounts {
        QueueCounts {
            free: self.free.len(),
            mixing: self.mixing.len(),
            used: self.used.len(),
            presented: self.presented.len(),
        }
    }

    /// Starts a new cycle for picture `index` so handles from the previous one become stale.
    fn renew(&mut self, index: usize) -> &mut OutputPicture<B> {
        self.next_generation = self.next_generation.wrapping_add(1);
        let picture = &mut self.pictures[index];
        picture.generation = self.next_generation;
        picture.reported = false;
        picture
    }

    /// Returns picture `index` to the free queue. Gives back the surface to release.
    fn free_picture(&mut self, index: usize) -> Option<SurfaceId> {
        if self.pending_present == Some(index) {
            self.pending_present = None;
        }
        let picture = &mut self.pictures[index];
        picture.reported = false;
        picture.decode_surface = None;
        self.free.push_back(index);
        picture.source.take()
    }

    /// Removes the presented picture designated by `handle`, if it is still current.
    fn take_presented(&mut self, handle: PictureHandle) -> Option<usize> {
        let position = self.presented.iter().position(|&index| {
            index == handle.index && self.pictures[index].generation == handle.generation
        })?;
        self.presented.remove(position)
    }

    fn handle(&self, index: usize) -> PictureHandle {
        PictureHandle {
            index,
            generation: self.pictures[index].generation,
        }
    }
}

pub struct OutputPool<B: HardwareBackend> {
    queues: Mutex<Queues<B>>,
    /// Signalled when a picture is added to `used`.
    picture_ready: Condvar,
    /// Signalled when a picture is added to `free`.
    slot_free: Condvar,
}

impl<B: HardwareBackend> Default for OutputPool<B> {
    fn default() -> Self {
        Self {
            queues: Mutex::new(Queues {
                pictures: Vec::new(),
                free: VecDeque::new(),
                mixing: VecDeque::new(),
                used: VecDeque::new(),
                presented: VecDeque::new(),
                pending_present: None,
                next_generation: 0,
            }),
            picture_ready: Condvar::new(),
            slot_free: Condvar::new(),
        }
    }
}

impl<B: HardwareBackend> OutputPool<B> {
    pub fn new() -> Self {
        Default::default()
    }

    fn lock(&self) -> MutexGuard<Queues<B>> {
        self.queues.lock().unwrap()
    }

    /// Replaces all pictures with one free picture per entry of `outputs`. Zero-copy pipelines
    /// pass `None` entries since their pictures use the decode surfaces directly.
    pub fn configure(&self, outputs: Vec<Option<B::OutputSurface>>) {
        let mut queues = self.lock();
        if queues.counts().free != queues.pictures.len() {
            log::error!("reconfiguring output pool with pictures still in use");
        }

        queues.pictures = outputs.into_iter().map(OutputPicture::new).collect();
        let count = queues.pictures.len();
        queues.free = (0..count).collect();
        queues.mixing.clear();
        queues.used.clear();
        queues.presented.clear();
        queues.pending_present = None;
        drop(queues);

        self.slot_free.notify_all();
    }

    /// Returns every picture to the free queue and takes their output surfaces away so they
    /// can be destroyed.
    pub fn teardown(&self, surfaces: &SurfacePool<B>) -> Vec<B::OutputSurface> {
        let mut queues = self.lock();
        let mut released = Vec::new();

        let q = &mut *queues;
        let in_use: Vec<usize> = q
            .mixing
            .drain(..)
            .chain(q.used.drain(..))
            .chain(q.presented.drain(..))
            .collect();
        for index in in_use {
            released.extend(queues.free_picture(index));
        }
        queues.pending_present = None;

        let outputs = queues
            .pictures
            .iter_mut()
            .filter_map(|picture| picture.output_surface.take())
            .collect();
        drop(queues);

        surfaces.release_all(released);
        self.slot_free.notify_all();
        outputs
    }

    pub fn counts(&self) -> QueueCounts {
        self.lock().counts()
    }

    /// Takes a free picture for the mixer, waiting for one in bounded steps until `abort`
    /// returns `true`.
    pub fn acquire_for_mixing<F>(&self, abort: F) -> Option<(usize, B::OutputSurface)>
    where
        F: Fn() -> bool,
    {
        let mut queues = self.lock();
        loop {
            if abort() {
                return None;
            }

            if let Some(index) = queues.free.pop_front() {
                let Some(target) = queues.pictures[index].output_surface.clone() else {
                    log::error!("output picture {} has no surface to mix into", index);
                    queues.free.push_back(index);
                    return None;
                };
                queues.mixing.push_back(index);
                return Some((index, target));
            }

            queues = self.slot_free.wait_timeout(queues, SLOT_WAIT).unwrap().0;
        }
    }

    /// Moves picture `index` from the mixer to the `used` queue.
    pub fn publish(&self, index: usize, info: PictureInfo) {
        let mut queues = self.lock();
        let Some(position) = queues.mixing.iter().position(|&i| i == index) else {
            log::error!("publishing output picture {} which is not being mixed", index);
            return;
        };
        queues.mixing.remove(position);

        let picture = queues.renew(index);
        picture.info = info;
        queues.used.push_back(index);
        drop(queues);

        self.picture_ready.notify_all();
    }

    /// Gives picture `index` back from the mixer without publishing it.
    pub fn abandon(&self, index: usize) {
        let mut queues = self.lock();
        let Some(position) = queues.mixing.iter().position(|&i| i == index) else {
            return;
        };
        queues.mixing.remove(position);
        queues.free.push_back(index);
        drop(queues);

        self.slot_free.notify_all();
    }

    /// Queues `picture` for display without going through the mixer. The picture keeps the
    /// render bit of its decode surface until it is freed.
    ///
    /// Returns `false` if no picture is free.
    pub fn push_decoded(&self, picture: &DecodedPicture, surface: B::Surface) -> bool {
        let mut queues = self.lock();
        let Some(index) = queues.free.pop_front() else {
            return false;
        };

        let output = queues.renew(index);
        output.info = picture.info.clone();
        output.source = Some(picture.surface);
        output.decode_surface = Some(surface);
        queues.used.push_back(index);
        drop(queues);

        self.picture_ready.notify_all();
        true
    }

    pub fn scan_used(&self) -> UsedScan {
        let queues = self.lock();
        let mut scan = UsedScan {
            used: queues.used.len(),
            ..Default::default()
        };

        for (position, &index) in queues.used.iter().enumerate() {
            let picture = &queues.pictures[index];
            if !picture.reported {
                scan.first_unreported = Some((position, picture.info.is_dropped()));
                break;
            }
            scan.reported += 1;
        }

        scan
    }

    /// Marks the first unreported picture of `used` as reported.
    pub fn report_next(&self) -> bool {
        let mut queues = self.lock();
        let Queues { pictures, used, .. } = &mut *queues;
        match used.iter().find(|&&index| !pictures[index].reported) {
            Some(&index) => {
                pictures[index].reported = true;
                true
            }
            None => false,
        }
    }

    /// Frees the front of `used` if it is an unreported dropped picture.
    pub fn drop_front(&self, surfaces: &SurfacePool<B>) -> bool {
        let mut queues = self.lock();
        let droppable = queues.used.front().map(|&index| {
            let picture = &queues.pictures[index];
            !picture.reported && picture.info.is_dropped()
        });
        if droppable != Some(true) {
            return false;
        }

        let released = queues.used.pop_front().and_then(|index| queues.free_picture(index));
        drop(queues);

        surfaces.release_all(released);
        self.slot_free.notify_all();
        true
    }

    /// Moves the front of `used` to `presented` and returns it.
    ///
    /// If the previous picture returned by this method has not been presented or released yet,
    /// it is considered stale and discarded.
    pub fn get_picture(
        &self,
        surfaces: &SurfacePool<B>,
    ) -> Result<BackendPicture<B>, PipelineError> {
        let mut queues = self.lock();

        let index = match queues.used.front() {
            Some(&index) if queues.pictures[index].reported => index,
            _ => {
                log::error!("no reported picture to return");
                return Err(PipelineError::NoPicture);
            }
        };

        let picture = &queues.pictures[index];
        let surface = match (&picture.output_surface, &picture.decode_surface) {
            (Some(output), _) => PictureSurface::Output(output.clone()),
            (None, Some(decode)) => PictureSurface::Decode(decode.clone()),
            (None, None) => {
                log::error!("output picture {} has no surface to display", index);
                return Err(PipelineError::NoPicture);
            }
        };
        let processed = ProcessedPicture {
            handle: queues.handle(index),
            surface,
            info: picture.info.clone(),
        };

        let mut released = None;
        if let Some(stale) = queues.pending_present.take() {
            log::warn!("discarding output picture {} which was never presented", stale);
            if let Some(position) = queues.presented.iter().position(|&i| i == stale) {
                queues.presented.remove(position);
                released = queues.free_picture(stale);
            }
        }

        queues.used.pop_front();
        queues.presented.push_back(index);
        queues.pending_present = Some(index);
        drop(queues);

        if released.is_some() {
            surfaces.release_all(released);
            self.slot_free.notify_all();
        }

        Ok(processed)
    }

    /// Acknowledges that the consumer took the picture `handle` into a render buffer. Returns
    /// the surface to present if the picture went through the mixer.
    pub fn present(
        &self,
        handle: PictureHandle,
    ) -> Result<Option<B::OutputSurface>, PipelineError> {
        let mut queues = self.lock();
        let current = queues.presented.contains(&handle.index)
            && queues.pictures[handle.index].generation == handle.generation;
        if !current {
            log::warn!("ignoring presentation of stale picture {:?}", handle);
            return Err(PipelineError::StalePicture(handle));
        }

        if queues.pending_present == Some(handle.index) {
            queues.pending_present = None;
        }
        Ok(queues.pictures[handle.index].output_surface.clone())
    }

    /// Returns the picture `handle` to the free queue. Stale handles are ignored.
    pub fn release(&self, handle: PictureHandle, surfaces: &SurfacePool<B>) -> bool {
        let mut queues = self.lock();
        let Some(index) = queues.take_presented(handle) else {
            log::debug!("ignoring release of stale picture {:?}", handle);
            return false;
        };
        let released = queues.free_picture(index);
        drop(queues);

        surfaces.release_all(released);
        self.slot_free.notify_all();
        true
    }

    /// Frees the last picture returned by `get_picture()` if it has not been presented yet.
    pub fn discard_pending(&self, surfaces: &SurfacePool<B>) -> bool {
        let mut queues = self.lock();
        let Some(index) = queues.pending_present else {
            return false;
        };
        let handle = queues.handle(index);
        let released = queues.take_presented(handle).and_then(|i| queues.free_picture(i));
        drop(queues);

        surfaces.release_all(released);
        self.slot_free.notify_all();
        true
    }

    /// Returns all used and presented pictures to the free queue.
    pub fn flush(&self, surfaces: &SurfacePool<B>) {
        let mut queues = self.lock();
        if !queues.mixing.is_empty() {
            log::error!("{} pictures still being mixed after flush", queues.mixing.len());
        }

        let q = &mut *queues;
        let flushed: Vec<usize> = q.used.drain(..).chain(q.presented.drain(..)).collect();
        let released: Vec<SurfaceId> = flushed
            .into_iter()
            .filter_map(|index| queues.free_picture(index))
            .collect();
        queues.pending_present = None;
        drop(queues);

        surfaces.release_all(released);
        self.slot_free.notify_all();
    }

    /// Waits up to `timeout` for `used` to contain a picture that has not been reported yet.
    /// Returns `false` on timeout.
    pub fn wait_unreported(&self, timeout: Duration) -> bool {
        let queues = self.lock();
        let (_queues, result) = self
            .picture_ready
            .wait_timeout_while(queues, timeout, |q| {
                !q.used.iter().any(|&index| !q.pictures[index].reported)
            })
            .unwrap();
        !result.timed_out()
    }
}
