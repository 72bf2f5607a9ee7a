// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The mixer stage, running on its own thread.
//!
//! Decoded pictures are sent to the mixer through a [`MixerInbox`]. The mixer keeps a small
//! window of recent pictures so temporal deinterlacers can look at the pictures around the one
//! being processed, renders each picture (or each field of it) into a free output picture, and
//! publishes the result to the `used` queue of the output pool.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use bitflags::bitflags;

use crate::backend::BackendResult;
use crate::backend::HardwareBackend;
use crate::backend::MixJob;
use crate::backend::MixerFeatures;
use crate::backend::MixerParams;
use crate::backend::PictureStructure;
use crate::config::DeinterlaceMethod;
use crate::config::VideoSettings;
use crate::picture::DecodedPicture;
use crate::picture::PictureFlags;
use crate::picture::PictureInfo;
use crate::pipeline::surface_pool::SurfaceId;
use crate::pipeline::PipelineError;
use crate::pipeline::Shared;
use crate::Rect;
use crate::Resolution;

/// How long the mixer waits for input before checking its commands again.
const INPUT_WAIT: Duration = Duration::from_millis(20);

/// Number of past pictures kept in the window once they have been mixed.
const WINDOW_SIZE: usize = 3;

/// Input of the mixer thread.
#[derive(Debug)]
pub enum Message {
    Frame(DecodedPicture),
    /// Mix whatever is still waiting for a look-ahead picture.
    DrainMarker,
}

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct MixerCommands: u32 {
        /// Drop all input and acknowledge through the flush condition variable.
        const FLUSH = 1 << 0;
        /// Skip the mixing of the next message to catch up.
        const HURRY = 1 << 1;
        /// Leave the thread.
        const STOP = 1 << 2;
    }
}

#[derive(Default)]
struct InboxState {
    messages: VecDeque<Message>,
    commands: MixerCommands,
}

/// Messages and commands sent to the mixer thread.
#[derive(Default)]
pub struct MixerInbox {
    state: Mutex<InboxState>,
    /// Signalled when a message or a command is posted.
    new_input: Condvar,
    /// Signalled when the mixer has processed a flush.
    flush_done: Condvar,
}

/// What the mixer should do next.
enum Step {
    Stop,
    Flush,
    Message { message: Message, hurry: bool },
    Idle,
}

/// Surfaces whose render bit is held by `messages`.
fn message_surfaces(messages: impl Iterator<Item = Message>) -> Vec<SurfaceId> {
    messages
        .filter_map(|message| match message {
            Message::Frame(picture) => Some(picture.surface),
            Message::DrainMarker => None,
        })
        .collect()
}

impl MixerInbox {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn push(&self, message: Message) {
        self.state.lock().unwrap().messages.push_back(message);
        self.new_input.notify_all();
    }

    /// Number of messages not picked up by the mixer yet.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_hurry(&self) {
        self.state.lock().unwrap().commands |= MixerCommands::HURRY;
    }

    /// Whether the mixer should give up what it is doing.
    pub fn aborting(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .commands
            .intersects(MixerCommands::FLUSH | MixerCommands::STOP)
    }

    /// Drops all pending messages and asks the mixer to flush. Returns the surfaces the dropped
    /// messages were holding.
    pub fn request_flush(&self) -> Vec<SurfaceId> {
        let mut state = self.state.lock().unwrap();
        let dropped = message_surfaces(state.messages.drain(..));
        state.commands |= MixerCommands::FLUSH;
        drop(state);

        self.new_input.notify_all();
        dropped
    }

    /// Waits up to `timeout` for the mixer to acknowledge a flush. Returns `false` on timeout.
    pub fn wait_flush_done(&self, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap();
        let (mut state, result) = self
            .flush_done
            .wait_timeout_while(state, timeout, |s| s.commands.contains(MixerCommands::FLUSH))
            .unwrap();

        if result.timed_out() {
            state.commands.remove(MixerCommands::FLUSH);
            return false;
        }
        true
    }

    /// Drops all pending messages and commands. Returns the surfaces the messages were holding.
    pub fn clear(&self) -> Vec<SurfaceId> {
        let mut state = self.state.lock().unwrap();
        state.commands = MixerCommands::empty();
        message_surfaces(state.messages.drain(..))
    }

    fn request_stop(&self) {
        self.state.lock().unwrap().commands |= MixerCommands::STOP;
        self.new_input.notify_all();
    }

    fn ack_flush(&self) {
        self.state.lock().unwrap().commands.remove(MixerCommands::FLUSH);
        self.flush_done.notify_all();
    }

    /// Returns the next thing to do, waiting a bit for input if there is nothing.
    fn next(&self, timeout: Duration) -> Step {
        let mut state = self.state.lock().unwrap();
        let mut waited = false;

        loop {
            if state.commands.contains(MixerCommands::STOP) {
                return Step::Stop;
            }
            if state.commands.contains(MixerCommands::FLUSH) {
                return Step::Flush;
            }
            if let Some(message) = state.messages.pop_front() {
                let hurry = state.commands.contains(MixerCommands::HURRY);
                state.commands.remove(MixerCommands::HURRY);
                return Step::Message { message, hurry };
            }
            if waited {
                return Step::Idle;
            }

            state = self.new_input.wait_timeout(state, timeout).unwrap().0;
            waited = true;
        }
    }
}

/// Returns the past and future references of the picture at `current` in `window`, where index
/// 0 is the most recent picture.
///
/// Frames get 2 past and 1 future references. Fields get 4 past and 2 future fields, taken
/// from the frames around `current`, the current frame providing the other field.
pub fn select_references<T: Copy>(
    window: &[T],
    current: usize,
    structure: PictureStructure,
    second_field: bool,
) -> (Vec<Option<T>>, Vec<Option<T>>) {
    let at = |i: Option<usize>| i.and_then(|i| window.get(i).copied());
    let this = at(Some(current));
    let prev1 = at(Some(current + 1));
    let prev2 = at(Some(current + 2));
    let next = at(current.checked_sub(1));

    match (structure, second_field) {
        (PictureStructure::Frame, _) => (vec![prev1, prev2], vec![next]),
        (_, false) => (vec![prev1, prev1, prev2, prev2], vec![this, next]),
        (_, true) => (vec![this, prev1, prev1, prev2], vec![next, next]),
    }
}

/// Structure of each pass needed to process a picture with `method`.
pub fn field_plan(method: Option<DeinterlaceMethod>, flags: PictureFlags) -> Vec<PictureStructure> {
    let Some(method) = method else {
        return vec![PictureStructure::Frame];
    };

    let first = if flags.contains(PictureFlags::TOP_FIELD_FIRST) {
        PictureStructure::TopField
    } else {
        PictureStructure::BottomField
    };

    std::iter::successors(Some(first), |s| Some(s.opposite()))
        .take(method.field_passes())
        .collect()
}

/// Metadata of the output picture produced by pass `pass` out of `passes` over `source`.
fn output_info(
    source: &PictureInfo,
    passes: usize,
    pass: usize,
    prev_pts: Option<u64>,
    next_pts: Option<u64>,
    resolution: Resolution,
) -> PictureInfo {
    let mut info = source.clone();
    // The mixer has taken care of the fields.
    info.flags -= PictureFlags::FIELD_FLAGS;
    info.width = resolution.width;
    info.height = resolution.height;
    info.region = None;

    if passes == 2 {
        info.repeat_picture = -0.5;
        if pass == 1 {
            info.pts = source.pts.map(|pts| match (prev_pts, next_pts) {
                (_, Some(next)) if next > pts => pts + (next - pts) / 2,
                (Some(prev), None) if pts > prev => pts + (pts - prev) / 2,
                _ => pts,
            });
            info.dts = info.pts;
        }
    }

    info
}

fn mixer_features(
    settings: &VideoSettings,
    method: Option<DeinterlaceMethod>,
    flags: PictureFlags,
) -> MixerFeatures {
    MixerFeatures {
        postproc: settings.postproc && !flags.contains(PictureFlags::NO_POSTPROC),
        deinterlacer: method.unwrap_or(DeinterlaceMethod::None),
        noise_reduction: settings.noise_reduction,
        sharpness: settings.sharpness,
        upscaling: settings.upscaling,
    }
}

/// Why mixing a picture did not complete.
#[derive(Debug, PartialEq, Eq)]
enum MixAbort {
    /// A flush or stop has been requested.
    Interrupted,
    /// The hardware failed, the device state has been updated.
    Failed,
}

pub(crate) struct MixerStage<B: HardwareBackend> {
    shared: Arc<Shared<B>>,
    params: MixerParams,
    mixer: Option<B::Mixer>,
    /// Features last applied to `mixer`.
    features: Option<MixerFeatures>,
    /// Recent pictures, most recent first. Each of them holds the render bit of its surface.
    window: VecDeque<DecodedPicture>,
    /// Number of pictures at the front of `window` that have not been mixed yet.
    unmixed: usize,
}

impl<B: HardwareBackend> MixerStage<B> {
    pub(crate) fn new(shared: Arc<Shared<B>>, params: MixerParams) -> Self {
        Self {
            shared,
            params,
            mixer: None,
            features: None,
            window: VecDeque::new(),
            unmixed: 0,
        }
    }

    fn run(mut self) {
        log::debug!("mixer thread started");

        loop {
            match self.shared.inbox.next(INPUT_WAIT) {
                Step::Stop => break,
                Step::Flush => {
                    self.drain_window();
                    self.shared.inbox.ack_flush();
                }
                Step::Message { message, hurry } => self.handle_message(message, hurry),
                Step::Idle => (),
            }
        }

        self.shutdown();
        log::debug!("mixer thread stopped");
    }

    pub(crate) fn handle_message(&mut self, message: Message, hurry: bool) {
        if !self.shared.device.is_open() {
            // Hardware calls are forbidden, let the input go.
            if let Message::Frame(picture) = message {
                self.shared.surfaces.release_all([picture.surface]);
            }
            self.drain_window();
            return;
        }

        let min_unmixed = match message {
            Message::Frame(picture) => {
                self.window.push_front(picture);
                self.unmixed += 1;
                // Keep one picture as look-ahead.
                2
            }
            Message::DrainMarker => 1,
        };

        while self.unmixed >= min_unmixed {
            match self.mix_next(hurry) {
                Ok(()) => self.unmixed -= 1,
                Err(MixAbort::Interrupted) => return,
                Err(MixAbort::Failed) => {
                    self.drain_window();
                    return;
                }
            }
        }

        self.trim_window();
    }

    /// Mixes the oldest unmixed picture of the window.
    fn mix_next(&mut self, hurry: bool) -> Result<(), MixAbort> {
        let current = self.unmixed - 1;
        let picture = self.window[current].clone();
        let settings = self.shared.settings.lock().unwrap().clone();

        let method = settings.method_for(picture.info.is_interlaced(), picture.info.height);
        self.shared
            .deinterlacing
            .store(method.is_some(), Ordering::Relaxed);
        let plan = field_plan(method, picture.info.flags);
        let features = mixer_features(&settings, method, picture.info.flags);

        let ids: Vec<SurfaceId> = self.window.iter().map(|p| p.surface).collect();
        let prev_pts = self.window.get(current + 1).and_then(|p| p.info.pts);
        let next_pts = current
            .checked_sub(1)
            .and_then(|i| self.window[i].info.pts);
        let skip = hurry || picture.info.is_dropped();

        for (pass, &structure) in plan.iter().enumerate() {
            let shared = Arc::clone(&self.shared);
            let Some((index, target)) = shared
                .output
                .acquire_for_mixing(|| shared.inbox.aborting())
            else {
                return Err(MixAbort::Interrupted);
            };

            let mut info = output_info(
                &picture.info,
                plan.len(),
                pass,
                prev_pts,
                next_pts,
                self.params.output_resolution,
            );

            if skip {
                // Keep the cadence even though nothing is rendered.
                info.flags |= PictureFlags::DROPPED;
            } else {
                let (past, future) = select_references(&ids, current, structure, pass == 1);
                let result = self.render(
                    structure,
                    &past,
                    ids[current],
                    &future,
                    picture.info.source_rect(),
                    &features,
                    &target,
                );

                match result {
                    Ok(true) => (),
                    Ok(false) => {
                        log::warn!("decode surface of picture {:?} is gone", picture.info.pts);
                        info.flags |= PictureFlags::DROPPED;
                    }
                    Err(e) => {
                        shared.output.abandon(index);
                        if shared.device.report_failure(&e) {
                            continue;
                        }
                        return Err(MixAbort::Failed);
                    }
                }
            }

            if shared.inbox.aborting() {
                shared.output.abandon(index);
                return Err(MixAbort::Interrupted);
            }

            shared.output.publish(index, info);
            shared.counters.processed.fetch_add(1, Ordering::Relaxed);
        }

        Ok(())
    }

    /// Runs one pass of the hardware mixer. Returns `Ok(false)` if `current` is not valid
    /// anymore.
    #[allow(clippy::too_many_arguments)]
    fn render(
        &mut self,
        structure: PictureStructure,
        past: &[Option<SurfaceId>],
        current: SurfaceId,
        future: &[Option<SurfaceId>],
        source_rect: Rect,
        features: &MixerFeatures,
        target: &B::OutputSurface,
    ) -> BackendResult<bool> {
        let shared = Arc::clone(&self.shared);
        let decoder = shared.decoder.read().unwrap();
        let Some(backend) = decoder.as_ref() else {
            return Ok(false);
        };

        let surfaces = &shared.surfaces;
        let Some(current) = surfaces.surface(current) else {
            return Ok(false);
        };
        let resolve = |ids: &[Option<SurfaceId>]| -> Vec<Option<B::Surface>> {
            ids.iter()
                .map(|id| id.and_then(|id| surfaces.surface(id)))
                .collect()
        };
        let past = resolve(past);
        let future = resolve(future);

        if self.mixer.is_none() {
            self.mixer = Some(backend.create_mixer(&self.params)?);
            self.features = None;
        }
        let Some(mixer) = self.mixer.as_mut() else {
            return Ok(false);
        };

        if self.features.as_ref() != Some(features) {
            backend.configure_mixer(mixer, features)?;
            self.features = Some(features.clone());
        }

        let job = MixJob {
            structure,
            past: &past,
            current: &current,
            future: &future,
            source_rect,
            destination_rect: Rect::from(self.params.output_resolution),
        };
        backend.mix(mixer, &job, target)?;

        Ok(true)
    }

    /// Releases the pictures that are too old to be used as references.
    fn trim_window(&mut self) {
        while self.window.len() > WINDOW_SIZE.max(self.unmixed) {
            if let Some(picture) = self.window.pop_back() {
                self.shared.surfaces.release_all([picture.surface]);
            }
        }
    }

    /// Releases all pictures of the window.
    fn drain_window(&mut self) {
        let released: Vec<SurfaceId> = self.window.drain(..).map(|p| p.surface).collect();
        self.shared.surfaces.release_all(released);
        self.unmixed = 0;
    }

    fn shutdown(&mut self) {
        self.drain_window();

        let Some(mixer) = self.mixer.take() else {
            return;
        };
        let decoder = self.shared.decoder.read().unwrap();
        match decoder.as_ref() {
            Some(backend) if self.shared.device.is_open() => {
                if let Err(e) = backend.destroy_mixer(mixer) {
                    log::error!("failed to destroy mixer: {}", e);
                }
            }
            // The device is gone and the mixer with it.
            _ => drop(mixer),
        }
    }
}

/// Handle to a running mixer thread.
pub struct MixerThread {
    handle: JoinHandle<()>,
}

impl MixerThread {
    pub(crate) fn spawn<B: HardwareBackend>(
        shared: Arc<Shared<B>>,
        params: MixerParams,
    ) -> Result<Self, PipelineError> {
        // Leftovers from a previous thread must not stop this one.
        shared.surfaces.release_all(shared.inbox.clear());

        let stage = MixerStage::new(shared, params);
        let handle = thread::Builder::new()
            .name("vpipe-mixer".into())
            .spawn(move || stage.run())
            .map_err(|e| PipelineError::Allocation(e.into()))?;

        Ok(Self { handle })
    }

    /// Stops the thread and waits for it to finish.
    pub(crate) fn stop(self, inbox: &MixerInbox) {
        inbox.request_stop();
        if self.handle.join().is_err() {
            log::error!("mixer thread panicked");
        }
    }
}
