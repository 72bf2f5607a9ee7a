// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The picture pipeline.
//!
//! A [`Pipeline`] ties the stages together:
//!
//! * the codec library decodes into surfaces of the [`surface_pool`] through the callbacks of
//!   the [`decode_adapter`],
//! * completed pictures are passed to [`Pipeline::decode()`], which either queues them for display
//!   right away (zero-copy) or sends them to the [`mixer`] thread,
//! * the consumer takes the finished pictures from the [`output_pool`] with
//!   [`Pipeline::get_picture()`] and gives them back with [`Pipeline::release_picture()`].
//!
//! Loss of the device is tracked by the [`device`] state machine and recovered from the decode
//! thread by [`Pipeline::check()`].

pub mod decode_adapter;
pub mod device;
pub mod mixer;
pub mod output_pool;
pub mod surface_pool;

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::time::Duration;
use std::time::Instant;

use bitflags::bitflags;
use thiserror::Error;

use crate::backend::BackendError;
use crate::backend::BackendFactory;
use crate::backend::HardwareBackend;
use crate::backend::MixerParams;
use crate::config::OutputMode;
use crate::config::PipelineConfig;
use crate::config::VideoSettings;
use crate::picture::DecodedPicture;
use crate::picture::PictureHandle;
use crate::Resolution;
use crate::StreamInfo;

pub use decode_adapter::CallbackStatus;
pub use decode_adapter::CodecBuffer;
pub use decode_adapter::DecodeAdapter;
use device::DeviceState;
use device::DeviceStateMachine;
use mixer::Message;
use mixer::MixerInbox;
use mixer::MixerThread;
pub use output_pool::BackendPicture;
use output_pool::OutputPool;
pub use output_pool::QueueCounts;
use surface_pool::SurfaceId;
use surface_pool::SurfacePool;

/// Pictures the mixer backlog and the output pool may hold together before the decoder is asked
/// to slow down.
const MAX_PIC_Q_LENGTH: usize = 20;
/// How long `reset()` waits for the mixer to acknowledge a flush.
const FLUSH_TIMEOUT: Duration = Duration::from_millis(200);
/// How long `decode()` waits for a picture when the mixer backlog is at its maximum.
const STARVATION_TIMEOUT: Duration = Duration::from_millis(200);
/// How long `decode()` waits for a picture in each drain mode.
const NORMAL_WAIT: Duration = Duration::from_millis(10);
const SOFT_DRAIN_WAIT: Duration = Duration::from_millis(50);
const HARD_DRAIN_WAIT: Duration = Duration::from_millis(200);
/// Time without progress after which a hard drain pushes the last pictures out of the mixer.
const DRAIN_MARKER_DELAY: Duration = Duration::from_millis(30);
/// Granularity of the waits of `decode()`.
const WAIT_STEP: Duration = Duration::from_millis(10);
const MAX_DECODE_ITERATIONS: usize = 64;
/// Consecutive dropping requests after which dropping is allowed while deinterlacing.
const MAX_DEINTERLACED_DROPS: u32 = 5;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to allocate resources: {0:#}")]
    Allocation(anyhow::Error),
    #[error("the device has been lost")]
    DeviceLost,
    #[error("the device is in an unrecoverable state")]
    DeviceError,
    #[error("the mixer did not produce any picture in time")]
    StarvationTimeout,
    #[error("invalid surface {0:?}")]
    InvalidSurface(SurfaceId),
    #[error("no picture is ready")]
    NoPicture,
    #[error("picture {0:?} is not current anymore")]
    StalePicture(PictureHandle),
    #[error("the pipeline is not configured")]
    NotConfigured,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

bitflags! {
    /// Result of [`Pipeline::decode()`].
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct DecodeStatus: u32 {
        /// The pipeline can take another picture.
        const BUFFER = 1 << 0;
        /// A picture is ready to be taken with `get_picture()`.
        const PICTURE = 1 << 1;
        /// A picture has been dropped.
        const DROPPED = 1 << 2;
        /// The pipeline has been rebuilt after a device reset. All surfaces handed to the codec
        /// are gone.
        const FLUSHED = 1 << 3;
        /// The pipeline cannot work anymore and must be closed.
        const ERROR = 1 << 4;
    }
}

/// How hard `decode()` should try to get pictures out.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DrainMode {
    /// Keep enough pictures buffered to absorb decoding hiccups.
    #[default]
    None,
    /// Report pictures as soon as they are ready.
    Soft,
    /// End of stream: also push out the pictures the mixer keeps for look-ahead.
    Hard,
}

/// Snapshot of the activity of a pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PipelineStats {
    /// Pictures completed by the codec.
    pub decoded: u64,
    /// Output pictures produced, including dropped ones.
    pub processed: u64,
    /// Pictures presented by the consumer.
    pub presented: u64,
    pub queues: QueueCounts,
    /// Messages waiting for the mixer.
    pub pending_messages: usize,
    /// Decode surfaces currently allocated.
    pub surfaces: usize,
    pub device_state: DeviceState,
}

/// What `decode()` does with a dropped picture.
enum DropAction {
    /// Not dropped, can be reported.
    Keep,
    /// Freed and signalled as `DROPPED`.
    Freed,
    /// Has to stay in `used` for now.
    Wait,
}

#[derive(Default)]
struct Counters {
    decoded: AtomicU64,
    processed: AtomicU64,
    presented: AtomicU64,
}

/// State shared by the decode, mixer and consumer threads.
pub(crate) struct Shared<B: HardwareBackend> {
    /// Shared for hardware calls, exclusive while the backend is being replaced.
    decoder: RwLock<Option<B>>,
    device: DeviceStateMachine,
    surfaces: SurfacePool<B>,
    output: OutputPool<B>,
    inbox: MixerInbox,
    settings: Mutex<VideoSettings>,
    /// Whether the mixer deinterlaced the last picture it processed.
    deinterlacing: AtomicBool,
    counters: Counters,
}

impl<B: HardwareBackend> Shared<B> {
    pub(crate) fn new(backend: B, config: &PipelineConfig) -> Self {
        Self {
            decoder: RwLock::new(Some(backend)),
            device: DeviceStateMachine::new(),
            surfaces: SurfacePool::new(),
            output: OutputPool::new(),
            inbox: MixerInbox::new(),
            settings: Mutex::new(config.settings.clone()),
            deinterlacing: AtomicBool::new(false),
            counters: Default::default(),
        }
    }
}

/// A decode picture pipeline running on the devices opened by `F`.
///
/// All methods take `&self` so the pipeline can be shared between the decode and consumer
/// threads.
pub struct Pipeline<F: BackendFactory> {
    factory: F,
    stream: StreamInfo,
    config: PipelineConfig,
    shared: Arc<Shared<F::Backend>>,
    mixer: Mutex<Option<MixerThread>>,
    /// Serializes recovery, loss handling and closing.
    recovery: Mutex<()>,
    drop_state: AtomicBool,
    drop_count: AtomicU32,
    closed: AtomicBool,
}

impl<F: BackendFactory> Pipeline<F> {
    /// Opens a device from `factory` and builds a pipeline for `stream` on it.
    pub fn open(
        factory: F,
        stream: StreamInfo,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        if stream.coded_resolution.get_area() == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "invalid coded resolution {:?}",
                stream.coded_resolution
            )));
        }

        let backend = factory.open()?;
        let shared = Arc::new(Shared::new(backend, &config));

        let pipeline = Self {
            factory,
            stream,
            config,
            shared,
            mixer: Mutex::new(None),
            recovery: Mutex::new(()),
            drop_state: AtomicBool::new(false),
            drop_count: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        };
        pipeline.start_output()?;

        log::debug!(
            "pipeline opened: {:?} {}x{} -> {:?}, {} pictures",
            pipeline.stream.format,
            pipeline.stream.coded_resolution.width,
            pipeline.stream.coded_resolution.height,
            pipeline.config.output_mode,
            pipeline.config.pool_size
        );

        Ok(pipeline)
    }

    /// Returns the callbacks to give to the codec library.
    pub fn decode_adapter(&self) -> DecodeAdapter<F::Backend> {
        DecodeAdapter::new(
            Arc::clone(&self.shared),
            self.stream.format,
            self.stream.coded_resolution,
        )
    }

    /// Size of the pictures returned by `get_picture()` in mixer mode.
    pub fn output_resolution(&self) -> Resolution {
        let display = self.stream.display_resolution;
        let default = if display.get_area() == 0 {
            self.stream.coded_resolution
        } else {
            display
        };
        self.config.output_resolution.unwrap_or(default)
    }

    fn mixer_params(&self) -> MixerParams {
        MixerParams {
            format: self.stream.format,
            surface_resolution: self.stream.coded_resolution,
            output_resolution: self.output_resolution(),
        }
    }

    /// Creates the output pictures and starts the mixer if needed.
    fn start_output(&self) -> Result<(), PipelineError> {
        let pool_size = self.config.pool_size;

        match self.config.output_mode {
            OutputMode::ZeroCopy => {
                self.shared
                    .output
                    .configure((0..pool_size).map(|_| None).collect());
            }
            OutputMode::Mixer => {
                let decoder = self.shared.decoder.read().unwrap();
                let backend = decoder.as_ref().ok_or(PipelineError::NotConfigured)?;

                let resolution = self.output_resolution();
                let mut outputs = Vec::with_capacity(pool_size);
                for _ in 0..pool_size {
                    match backend.create_output_surface(resolution) {
                        Ok(surface) => outputs.push(Some(surface)),
                        Err(e) => {
                            self.shared.device.report_failure(&e);
                            for surface in outputs.into_iter().flatten() {
                                if let Err(e) = backend.destroy_output_surface(surface) {
                                    log::error!("failed to destroy output surface: {}", e);
                                }
                            }
                            return Err(PipelineError::Allocation(e.into()));
                        }
                    }
                }
                self.shared.output.configure(outputs);
                drop(decoder);

                let thread = MixerThread::spawn(Arc::clone(&self.shared), self.mixer_params())?;
                *self.mixer.lock().unwrap() = Some(thread);
            }
        }

        Ok(())
    }

    /// Stops the mixer thread, releasing everything it holds.
    fn stop_mixer(&self) {
        let thread = self.mixer.lock().unwrap().take();
        if let Some(thread) = thread {
            thread.stop(&self.shared.inbox);
        }
        self.shared.surfaces.release_all(self.shared.inbox.clear());
    }

    /// Returns all output pictures and destroys their surfaces with `backend`. Without a backend
    /// the surfaces are considered gone with the device.
    fn teardown_output(&self, backend: Option<&F::Backend>) {
        let outputs = self.shared.output.teardown(&self.shared.surfaces);
        let Some(backend) = backend else {
            return;
        };

        for surface in outputs {
            if let Err(e) = backend.destroy_output_surface(surface) {
                log::error!("failed to destroy output surface: {}", e);
            }
        }
    }

    /// Checks the device state and recovers from a device reset if needed.
    ///
    /// Returns `FLUSHED` if the pipeline has been rebuilt, `ERROR` if it cannot be used anymore,
    /// and an empty status if it can be used normally. A lost device is waited for up to the
    /// configured reset timeout.
    pub fn check(&self) -> DecodeStatus {
        let mut state = self.shared.device.state();
        if state == DeviceState::Lost {
            if !self
                .shared
                .device
                .wait_for_reset(self.config.device_reset_timeout)
            {
                log::error!(
                    "device not reset after {:?}, giving up",
                    self.config.device_reset_timeout
                );
                self.shared.device.mark_error();
            }
            state = self.shared.device.state();
        }

        match state {
            DeviceState::Open => DecodeStatus::empty(),
            DeviceState::Reset => self.recover(),
            DeviceState::Lost | DeviceState::Error => self.fail(),
        }
    }

    /// Rebuilds the pipeline on a new device after a reset.
    fn recover(&self) -> DecodeStatus {
        let _recovery = self.recovery.lock().unwrap();
        match self.shared.device.state() {
            DeviceState::Reset => (),
            // Someone else recovered in the meantime.
            DeviceState::Open => return DecodeStatus::FLUSHED,
            DeviceState::Lost | DeviceState::Error => return DecodeStatus::ERROR,
        }

        log::debug!("rebuilding pipeline after device reset");
        // Everything created from the old device is gone with it.
        self.abandon_resources();

        match self.factory.open() {
            Ok(backend) => *self.shared.decoder.write().unwrap() = Some(backend),
            Err(e) => {
                log::error!("failed to reopen device: {}", e);
                self.shared.device.mark_error();
                return DecodeStatus::ERROR;
            }
        }

        self.shared.device.mark_open();
        if let Err(e) = self.start_output() {
            log::error!("failed to rebuild output: {}", e);
            self.shared.device.mark_error();
            self.abandon_resources();
            return DecodeStatus::ERROR;
        }

        self.drop_count.store(0, Ordering::Relaxed);
        self.shared.deinterlacing.store(false, Ordering::Relaxed);
        DecodeStatus::FLUSHED
    }

    /// Tears down a pipeline whose device is in an unrecoverable state.
    fn fail(&self) -> DecodeStatus {
        self.shared.device.mark_error();

        let _recovery = self.recovery.lock().unwrap();
        if self.shared.decoder.read().unwrap().is_some() {
            log::error!("device failed, dropping the pipeline resources");
        }
        self.abandon_resources();

        DecodeStatus::ERROR
    }

    /// Drops the mixer, the output pictures, the decode surfaces and the backend without
    /// calling into the device. `recovery` must be held.
    fn abandon_resources(&self) {
        // The mixer takes the decoder section itself, stop it before locking.
        self.stop_mixer();

        let mut decoder = self.shared.decoder.write().unwrap();
        self.teardown_output(None);
        self.shared.surfaces.invalidate_all();
        if let Some(backend) = decoder.take() {
            let reclaimed = self.shared.surfaces.sweep(&backend);
            log::debug!("dropped {} surfaces of the previous device", reclaimed);
        }
    }

    /// The device is about to be lost or has been lost. Tears down the output stage and waits
    /// for `on_reset_device()`.
    pub fn on_lost_device(&self) {
        let _recovery = self.recovery.lock().unwrap();
        if !self.shared.device.is_open() {
            return;
        }
        log::debug!("device lost, tearing down output");

        self.stop_mixer();
        let decoder = self.shared.decoder.write().unwrap();
        self.teardown_output(decoder.as_ref());
        if let Some(backend) = decoder.as_ref() {
            self.shared.surfaces.teardown(backend);
        }
        self.shared.device.mark_lost();
    }

    /// The device is available again. The next `check()` rebuilds the pipeline.
    pub fn on_reset_device(&self) {
        self.shared.device.mark_reset();
    }

    /// Number of pictures to keep in `used` before reporting them, unless draining.
    fn target_depth(&self) -> usize {
        if let Some(depth) = self.config.target_depth {
            return depth;
        }

        let pool_size = self.config.pool_size;
        let depth = match self.config.output_mode {
            OutputMode::Mixer => pool_size.saturating_sub(1).min(3),
            OutputMode::ZeroCopy => pool_size.min(3),
        };
        // Buffer less while the renderer is short of pictures or has more than it can show.
        let presented = self.shared.output.counts().presented;
        let depth = if presented == self.config.num_render_buffers {
            depth
        } else {
            depth.saturating_sub(1)
        };

        depth.max(1)
    }

    /// Whether the pipeline cannot take more pictures for now.
    fn queue_full(&self) -> bool {
        let counts = self.shared.output.counts();
        match self.config.output_mode {
            OutputMode::ZeroCopy => counts.free == 0,
            OutputMode::Mixer => {
                let factor = self.field_factor();
                let pending = self.shared.inbox.len();
                counts.total() - counts.free + factor * (pending + 2) >= MAX_PIC_Q_LENGTH
                    || counts.free < 2
            }
        }
    }

    /// Number of output pictures produced per mixer input.
    fn field_factor(&self) -> usize {
        if self.shared.deinterlacing.load(Ordering::Relaxed) {
            2
        } else {
            1
        }
    }

    /// Handles the first unreported picture of `used` if it is a dropped one. Only the front
    /// of `used` is freed, at most once per call of `decode()`.
    fn try_drop(&self, status: &mut DecodeStatus, position: usize, dropped: bool) -> DropAction {
        if !dropped {
            return DropAction::Keep;
        }
        if position != 0 || status.contains(DecodeStatus::DROPPED) {
            return DropAction::Wait;
        }

        if self.shared.output.drop_front(&self.shared.surfaces) {
            log::debug!("dropped a picture");
            *status |= DecodeStatus::DROPPED;
            DropAction::Freed
        } else {
            DropAction::Wait
        }
    }

    /// Passes a decoded picture to the pipeline and reports whether a picture is ready for the
    /// consumer and whether the pipeline can take more.
    ///
    /// `picture` must come from `DecodeAdapter::on_frame_complete()`. Its surface is released
    /// by the pipeline once displayed. `None` can be passed to only poll for pictures, usually
    /// along with a drain mode at the end of a stream.
    pub fn decode(&self, picture: Option<DecodedPicture>, drain: DrainMode) -> DecodeStatus {
        if self.closed.load(Ordering::Relaxed) {
            if let Some(picture) = picture {
                self.shared.surfaces.release_all([picture.surface]);
            }
            return DecodeStatus::ERROR;
        }

        let status = self.check();
        if !status.is_empty() {
            if let Some(picture) = picture {
                self.shared.surfaces.release_all([picture.surface]);
            }
            return status;
        }

        if let Some(backend) = self.shared.decoder.read().unwrap().as_ref() {
            let reclaimed = self.shared.surfaces.sweep(backend);
            if reclaimed > 0 {
                log::debug!("reclaimed {} leaked surfaces", reclaimed);
            }
        }

        match self.config.output_mode {
            OutputMode::ZeroCopy => self.decode_zero_copy(picture, drain),
            OutputMode::Mixer => self.decode_mixed(picture, drain),
        }
    }

    fn decode_zero_copy(&self, picture: Option<DecodedPicture>, drain: DrainMode) -> DecodeStatus {
        let shared = &self.shared;
        let mut status = DecodeStatus::empty();

        if let Some(picture) = picture {
            let queued = match shared.surfaces.surface(picture.surface) {
                Some(surface) => shared.output.push_decoded(&picture, surface),
                None => {
                    log::warn!("decoded picture {:?} has an invalid surface", picture.info.pts);
                    false
                }
            };

            if queued {
                shared.counters.processed.fetch_add(1, Ordering::Relaxed);
            } else {
                log::warn!("no free output picture, dropping {:?}", picture.info.pts);
                shared.surfaces.release_all([picture.surface]);
                status |= DecodeStatus::DROPPED;
            }
        }

        let target = self.target_depth();
        for _ in 0..MAX_DECODE_ITERATIONS {
            let scan = shared.output.scan_used();
            let Some((position, dropped)) = scan.first_unreported else {
                break;
            };
            match self.try_drop(&mut status, position, dropped) {
                DropAction::Freed => continue,
                DropAction::Wait => break,
                DropAction::Keep => (),
            }

            if drain == DrainMode::None && scan.used < target && !self.queue_full() {
                break;
            }

            shared.output.report_next();
            status |= DecodeStatus::PICTURE;
            break;
        }

        if !self.queue_full() {
            status |= DecodeStatus::BUFFER;
        }
        status
    }

    fn decode_mixed(&self, picture: Option<DecodedPicture>, drain: DrainMode) -> DecodeStatus {
        let shared = &self.shared;
        let mut status = DecodeStatus::empty();

        if let Some(picture) = picture {
            if self.drop_state.load(Ordering::Relaxed) {
                shared.inbox.set_hurry();
                self.drop_count.fetch_add(1, Ordering::Relaxed);
            } else {
                self.drop_count.store(0, Ordering::Relaxed);
            }
            shared.inbox.push(Message::Frame(picture));
        }

        let target = self.target_depth();
        let start = Instant::now();
        let mut marker_sent = false;
        let mut prev_not_empty = false;

        for _ in 0..MAX_DECODE_ITERATIONS {
            let scan = shared.output.scan_used();
            if let Some((position, dropped)) = scan.first_unreported {
                match self.try_drop(&mut status, position, dropped) {
                    DropAction::Freed => continue,
                    // Dropped pictures are never reported, wait for it to reach the front.
                    DropAction::Wait => break,
                    DropAction::Keep => (),
                }

                if drain == DrainMode::None && scan.used < target && !self.queue_full() {
                    status |= DecodeStatus::BUFFER;
                    break;
                }

                shared.output.report_next();
                status |= DecodeStatus::PICTURE;
                break;
            }

            // Everything in `used` has been reported.
            let pending = shared.inbox.len();
            if drain != DrainMode::Hard && pending == 0 {
                break;
            }

            if pending * self.field_factor() >= MAX_PIC_Q_LENGTH - 1 {
                if shared.output.wait_unreported(STARVATION_TIMEOUT) {
                    continue;
                }
                log::error!("{}", PipelineError::StarvationTimeout);
                status |= DecodeStatus::ERROR;
                break;
            }

            let elapsed = start.elapsed();
            let limit = match drain {
                DrainMode::None => NORMAL_WAIT,
                DrainMode::Soft => SOFT_DRAIN_WAIT,
                DrainMode::Hard => {
                    if pending != 0 {
                        prev_not_empty = true;
                    } else if !marker_sent && (prev_not_empty || elapsed >= DRAIN_MARKER_DELAY) {
                        shared.inbox.push(Message::DrainMarker);
                        marker_sent = true;
                    }
                    HARD_DRAIN_WAIT
                }
            };
            if elapsed >= limit {
                break;
            }

            shared
                .output
                .wait_unreported((limit - elapsed).min(WAIT_STEP));
        }

        if !self.queue_full() || shared.inbox.is_empty() {
            status |= DecodeStatus::BUFFER;
        }
        status
    }

    /// Takes the picture reported by the last `decode()` call.
    ///
    /// The picture must then be given to `present()` once it is in a render buffer, and to
    /// `release_picture()` once it is not displayed anymore. Calling this again before
    /// `present()` discards the previous picture.
    pub fn get_picture(&self) -> Result<BackendPicture<F::Backend>, PipelineError> {
        self.shared.output.get_picture(&self.shared.surfaces)
    }

    /// The picture `handle` has been taken into a render buffer.
    ///
    /// Fails with `StalePicture` if the picture has been released or flushed since.
    pub fn present(&self, handle: &PictureHandle) -> Result<(), PipelineError> {
        let Some(surface) = self.shared.output.present(*handle)? else {
            self.shared.counters.presented.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };

        let decoder = self.shared.decoder.read().unwrap();
        let backend = decoder.as_ref().ok_or(PipelineError::NotConfigured)?;
        if !self.shared.device.is_open() {
            return Err(PipelineError::DeviceLost);
        }

        backend.present(&surface).map_err(|e| {
            self.shared.device.report_failure(&e);
            PipelineError::from(e)
        })?;
        self.shared.counters.presented.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Returns the picture `handle` to the pipeline. Returns `false` if the handle is stale,
    /// e.g. because the pipeline has been reset since.
    pub fn release_picture(&self, handle: PictureHandle) -> bool {
        self.shared.output.release(handle, &self.shared.surfaces)
    }

    /// Returns the last picture from `get_picture()` to the pipeline if it has not been
    /// presented.
    pub fn discard_present_picture(&self) -> bool {
        self.shared.output.discard_pending(&self.shared.surfaces)
    }

    /// Drops all pictures in flight. Can be called from any thread, any number of times.
    pub fn reset(&self) {
        let shared = &self.shared;

        let running = self.mixer.lock().unwrap().is_some();
        if running {
            shared.surfaces.release_all(shared.inbox.request_flush());
            if !shared.inbox.wait_flush_done(FLUSH_TIMEOUT) {
                log::error!("mixer did not acknowledge flush within {:?}", FLUSH_TIMEOUT);
            }
        } else {
            shared.surfaces.release_all(shared.inbox.clear());
        }

        shared.output.flush(&shared.surfaces);
        self.drop_count.store(0, Ordering::Relaxed);
        log::debug!("pipeline reset");
    }

    /// Asks the mixer to skip the processing of the next pictures.
    pub fn set_drop_state(&self, drop: bool) {
        self.drop_state.store(drop, Ordering::Relaxed);
    }

    /// Whether dropping pictures would not break the deinterlacer's cadence.
    pub fn allow_frame_dropping(&self) -> bool {
        !(self.shared.deinterlacing.load(Ordering::Relaxed)
            && self.drop_count.load(Ordering::Relaxed) < MAX_DEINTERLACED_DROPS)
    }

    /// Replaces the post-processing settings. The mixer picks them up on its next picture.
    pub fn set_video_settings(&self, settings: VideoSettings) {
        *self.shared.settings.lock().unwrap() = settings;
    }

    pub fn video_settings(&self) -> VideoSettings {
        self.shared.settings.lock().unwrap().clone()
    }

    pub fn stats(&self) -> PipelineStats {
        let counters = &self.shared.counters;
        PipelineStats {
            decoded: counters.decoded.load(Ordering::Relaxed),
            processed: counters.processed.load(Ordering::Relaxed),
            presented: counters.presented.load(Ordering::Relaxed),
            queues: self.shared.output.counts(),
            pending_messages: self.shared.inbox.len(),
            surfaces: self.shared.surfaces.num_surfaces(),
            device_state: self.shared.device.state(),
        }
    }

    /// Stops the mixer and destroys all resources. Called on drop.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _recovery = self.recovery.lock().unwrap();
        self.stop_mixer();

        let mut decoder = self.shared.decoder.write().unwrap();
        let backend = decoder.take();
        match backend.as_ref() {
            Some(backend) if self.shared.device.is_open() => {
                self.teardown_output(Some(backend));
                let leaked = self.shared.surfaces.teardown(backend);
                if leaked > 0 {
                    log::warn!("{} decode surfaces still in use at close", leaked);
                }
            }
            _ => {
                self.teardown_output(None);
                self.shared.surfaces.invalidate_all();
            }
        }

        log::debug!("pipeline closed");
    }
}

impl<F: BackendFactory> Drop for Pipeline<F> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::backend::dummy::DummyFactory;
    use crate::backend::dummy::DummyFailure;
    use crate::picture::PictureFlags;
    use crate::picture::PictureInfo;
    use crate::picture::PictureSurface;
    use crate::pipeline::surface_pool::SurfaceState;
    use crate::DecodedFormat;

    fn stream() -> StreamInfo {
        StreamInfo {
            format: DecodedFormat::NV12,
            coded_resolution: Resolution::from((64, 48)),
            display_resolution: Resolution::from((64, 48)),
        }
    }

    fn open(config: PipelineConfig) -> (DummyBackend, Pipeline<DummyFactory>) {
        let factory = DummyFactory::default();
        let backend = factory.backend.clone();
        let pipeline = Pipeline::open(factory, stream(), config).unwrap();
        (backend, pipeline)
    }

    fn mixer_config(pool_size: usize) -> PipelineConfig {
        PipelineConfig {
            pool_size,
            output_mode: OutputMode::Mixer,
            ..Default::default()
        }
    }

    fn zero_copy_config(pool_size: usize, target_depth: Option<usize>) -> PipelineConfig {
        PipelineConfig {
            pool_size,
            output_mode: OutputMode::ZeroCopy,
            target_depth,
            ..Default::default()
        }
    }

    /// Decodes a non-reference picture through the codec callbacks.
    fn decode_picture(
        adapter: &mut DecodeAdapter<DummyBackend>,
        pts: u64,
        flags: PictureFlags,
    ) -> DecodedPicture {
        let buffer = adapter.on_frame_needs_surface(false).unwrap();
        adapter.on_draw_slice(buffer.surface, &[0u8; 16]).unwrap();
        adapter
            .on_frame_complete(
                buffer.surface,
                PictureInfo {
                    pts: Some(pts),
                    width: 64,
                    height: 48,
                    flags,
                    ..Default::default()
                },
            )
            .unwrap()
    }

    /// Takes and gives back the reported picture, returning its metadata.
    fn consume(pipeline: &Pipeline<DummyFactory>) -> PictureInfo {
        let picture = pipeline.get_picture().unwrap();
        pipeline.present(&picture.handle).unwrap();
        assert!(pipeline.release_picture(picture.handle));
        picture.info
    }

    /// Hard-drains `pipeline`, consuming everything it reports.
    fn drain(pipeline: &Pipeline<DummyFactory>, infos: &mut Vec<PictureInfo>) -> DecodeStatus {
        let mut statuses = DecodeStatus::empty();
        for _ in 0..32 {
            let status = pipeline.decode(None, DrainMode::Hard);
            statuses |= status;
            if status.contains(DecodeStatus::PICTURE) {
                infos.push(consume(pipeline));
            } else if !status.contains(DecodeStatus::DROPPED) {
                break;
            }
        }
        statuses
    }

    fn assert_all_free(pipeline: &Pipeline<DummyFactory>) {
        let stats = pipeline.stats();
        assert_eq!(stats.queues.free, pipeline.config.pool_size);
        assert_eq!(stats.pending_messages, 0);
        assert_eq!(pipeline.shared.surfaces.num_free(), stats.surfaces);
    }

    #[test]
    fn open_validates_config() {
        let factory = DummyFactory::default();
        assert!(matches!(
            Pipeline::open(factory, stream(), mixer_config(2)),
            Err(PipelineError::InvalidConfig(_))
        ));

        let factory = DummyFactory::default();
        factory.fail_open(true);
        assert!(matches!(
            Pipeline::open(factory, stream(), mixer_config(8)),
            Err(PipelineError::Backend(_))
        ));
    }

    #[test]
    fn default_target_depth() {
        let (_, pipeline) = open(mixer_config(8));
        assert_eq!(pipeline.target_depth(), 2);

        let (_, pipeline) = open(zero_copy_config(4, None));
        assert_eq!(pipeline.target_depth(), 2);

        let (_, pipeline) = open(zero_copy_config(4, Some(4)));
        assert_eq!(pipeline.target_depth(), 4);
    }

    #[test]
    fn zero_copy_buffers_up_to_target_depth() {
        const POOL_SIZE: usize = 6;
        let (_, pipeline) = open(zero_copy_config(POOL_SIZE, Some(3)));
        let mut adapter = pipeline.decode_adapter();
        let mut held = Vec::new();

        for pts in 0..5 {
            let picture = decode_picture(&mut adapter, pts, PictureFlags::empty());
            let status = pipeline.decode(Some(picture), DrainMode::None);

            assert_eq!(status.contains(DecodeStatus::PICTURE), pts >= 2, "picture {}", pts);
            assert!(status.contains(DecodeStatus::BUFFER));
            if status.contains(DecodeStatus::PICTURE) {
                let picture = pipeline.get_picture().unwrap();
                assert!(matches!(picture.surface, PictureSurface::Decode(_)));
                pipeline.present(&picture.handle).unwrap();
                held.push(picture.handle);
            }

            let queues = pipeline.stats().queues;
            assert!(queues.used + queues.presented <= POOL_SIZE);
            assert_eq!(queues.total(), POOL_SIZE);
        }

        for handle in held {
            assert!(pipeline.release_picture(handle));
        }
        pipeline.reset();
        assert_all_free(&pipeline);
    }

    #[test]
    fn zero_copy_without_consumer() {
        const POOL_SIZE: usize = 6;
        let (_, pipeline) = open(zero_copy_config(POOL_SIZE, Some(3)));
        let mut adapter = pipeline.decode_adapter();

        // Nobody calls get_picture().
        for pts in 0..5 {
            let picture = decode_picture(&mut adapter, pts, PictureFlags::empty());
            let status = pipeline.decode(Some(picture), DrainMode::None);

            assert_eq!(status.contains(DecodeStatus::PICTURE), pts >= 2, "picture {}", pts);
            assert!(!status.contains(DecodeStatus::DROPPED));
            let queues = pipeline.stats().queues;
            assert_eq!(queues.used, pts as usize + 1);
            assert!(queues.used + queues.presented <= POOL_SIZE);
        }
        assert_eq!(pipeline.stats().queues.free, 1);
    }

    #[test]
    fn zero_copy_hard_drain_reports_buffered_pictures() {
        const POOL_SIZE: usize = 6;
        let (_, pipeline) = open(zero_copy_config(POOL_SIZE, Some(3)));
        let mut adapter = pipeline.decode_adapter();

        for pts in 0..2 {
            let picture = decode_picture(&mut adapter, pts, PictureFlags::empty());
            let status = pipeline.decode(Some(picture), DrainMode::None);
            assert!(!status.contains(DecodeStatus::PICTURE));
        }

        let mut infos = Vec::new();
        drain(&pipeline, &mut infos);
        let pts: Vec<_> = infos.iter().map(|info| info.pts).collect();
        assert_eq!(pts, vec![Some(0), Some(1)]);
        assert_all_free(&pipeline);
    }

    #[test]
    fn target_depth_follows_the_render_buffers() {
        let config = PipelineConfig {
            num_render_buffers: 1,
            ..zero_copy_config(6, None)
        };
        let (_, pipeline) = open(config);
        let mut adapter = pipeline.decode_adapter();
        assert_eq!(pipeline.target_depth(), 2);

        for pts in 0..2 {
            let picture = decode_picture(&mut adapter, pts, PictureFlags::empty());
            pipeline.decode(Some(picture), DrainMode::None);
        }
        let picture = pipeline.get_picture().unwrap();
        pipeline.present(&picture.handle).unwrap();

        // As many pictures presented as the renderer has buffers.
        assert_eq!(pipeline.target_depth(), 3);
    }

    #[test]
    fn zero_copy_drops_when_no_picture_is_free() {
        const POOL_SIZE: usize = 4;
        let (_, pipeline) = open(zero_copy_config(POOL_SIZE, Some(POOL_SIZE)));
        let mut adapter = pipeline.decode_adapter();

        for pts in 0..POOL_SIZE as u64 {
            let picture = decode_picture(&mut adapter, pts, PictureFlags::empty());
            pipeline.decode(Some(picture), DrainMode::None);
        }
        let picture = decode_picture(&mut adapter, 42, PictureFlags::empty());
        let surface = picture.surface;
        let status = pipeline.decode(Some(picture), DrainMode::None);

        assert!(status.contains(DecodeStatus::DROPPED));
        assert!(!status.contains(DecodeStatus::BUFFER));
        assert_eq!(
            pipeline.shared.surfaces.state(surface),
            Some(SurfaceState::empty())
        );
    }

    #[test]
    fn dropped_pictures_are_freed_from_the_front_only() {
        const POOL_SIZE: usize = 4;
        let (_, pipeline) = open(zero_copy_config(POOL_SIZE, Some(1)));
        let mut adapter = pipeline.decode_adapter();

        let picture = decode_picture(&mut adapter, 0, PictureFlags::DROPPED);
        let surface = picture.surface;
        let status = pipeline.decode(Some(picture), DrainMode::None);
        assert_eq!(status, DecodeStatus::DROPPED | DecodeStatus::BUFFER);
        assert_eq!(pipeline.stats().queues.free, POOL_SIZE);
        assert_eq!(
            pipeline.shared.surfaces.state(surface),
            Some(SurfaceState::empty())
        );

        // Behind a reported picture, dropped pictures wait for the front.
        let picture = decode_picture(&mut adapter, 1, PictureFlags::empty());
        assert!(pipeline
            .decode(Some(picture), DrainMode::None)
            .contains(DecodeStatus::PICTURE));
        for pts in 2..4 {
            let picture = decode_picture(&mut adapter, pts, PictureFlags::DROPPED);
            let status = pipeline.decode(Some(picture), DrainMode::None);
            assert_eq!(status, DecodeStatus::BUFFER, "picture {}", pts);
        }
        assert_eq!(pipeline.stats().queues.used, 3);

        assert_eq!(consume(&pipeline).pts, Some(1));
        assert!(matches!(pipeline.get_picture(), Err(PipelineError::NoPicture)));

        // One signal per call.
        let status = pipeline.decode(None, DrainMode::None);
        assert_eq!(status, DecodeStatus::DROPPED | DecodeStatus::BUFFER);
        assert_eq!(pipeline.stats().queues.used, 1);
        let status = pipeline.decode(None, DrainMode::None);
        assert_eq!(status, DecodeStatus::DROPPED | DecodeStatus::BUFFER);
        assert_eq!(pipeline.decode(None, DrainMode::None), DecodeStatus::BUFFER);
        assert_all_free(&pipeline);
    }

    #[test]
    fn stale_presentations_are_not_counted() {
        let (_, pipeline) = open(zero_copy_config(4, Some(1)));
        let mut adapter = pipeline.decode_adapter();

        let picture = decode_picture(&mut adapter, 0, PictureFlags::empty());
        pipeline.decode(Some(picture), DrainMode::None);
        let picture = pipeline.get_picture().unwrap();
        assert!(pipeline.release_picture(picture.handle));

        assert!(matches!(
            pipeline.present(&picture.handle),
            Err(PipelineError::StalePicture(_))
        ));
        assert_eq!(pipeline.stats().presented, 0);
    }

    #[test]
    fn mixer_keeps_decode_order() {
        const POOL_SIZE: usize = 8;
        let (backend, pipeline) = open(mixer_config(POOL_SIZE));
        let mut adapter = pipeline.decode_adapter();
        let mut infos = Vec::new();

        for pts in 1..=3 {
            let picture = decode_picture(&mut adapter, pts, PictureFlags::empty());
            let status = pipeline.decode(Some(picture), DrainMode::None);
            if status.contains(DecodeStatus::PICTURE) {
                infos.push(consume(&pipeline));
            }
            assert_eq!(pipeline.stats().queues.total(), POOL_SIZE);
        }
        drain(&pipeline, &mut infos);

        let pts: Vec<_> = infos.iter().map(|info| info.pts).collect();
        assert_eq!(pts, vec![Some(1), Some(2), Some(3)]);
        assert!(infos.iter().all(|info| info.width == 64 && info.height == 48));
        let mixes = backend.mixes();
        assert_eq!(mixes.len(), 3);
        assert_eq!(backend.stats().presents, 3);
        // Each picture was mixed into its own output picture.
        let mut targets: Vec<_> = mixes.iter().map(|mix| mix.target).collect();
        targets.sort_by_key(|target| target.0);
        targets.dedup();
        assert_eq!(targets.len(), 3);

        let stats = pipeline.stats();
        assert_eq!(stats.decoded, 3);
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.presented, 3);
        assert_eq!(stats.queues.free, POOL_SIZE);
    }

    #[test]
    fn interlaced_pictures_are_split_into_fields() {
        let (_, pipeline) = open(mixer_config(8));
        let mut adapter = pipeline.decode_adapter();
        let mut infos = Vec::new();
        let flags = PictureFlags::INTERLACED | PictureFlags::TOP_FIELD_FIRST;

        for pts in [0, 40_000, 80_000] {
            let picture = decode_picture(&mut adapter, pts, flags);
            if pipeline
                .decode(Some(picture), DrainMode::None)
                .contains(DecodeStatus::PICTURE)
            {
                infos.push(consume(&pipeline));
            }
        }
        drain(&pipeline, &mut infos);

        let pts: Vec<_> = infos.iter().filter_map(|info| info.pts).collect();
        assert_eq!(pts, vec![0, 20_000, 40_000, 60_000, 80_000, 100_000]);
        for info in &infos {
            assert_eq!(info.repeat_picture, -0.5);
            assert!(!info.is_interlaced());
        }

        // Dropping would break the field cadence.
        assert!(!pipeline.allow_frame_dropping());
    }

    #[test]
    fn frame_dropping_is_allowed_after_repeated_requests() {
        let (_, pipeline) = open(mixer_config(8));
        let mut adapter = pipeline.decode_adapter();
        let flags = PictureFlags::INTERLACED | PictureFlags::TOP_FIELD_FIRST;
        pipeline.shared.deinterlacing.store(true, Ordering::Relaxed);
        assert!(!pipeline.allow_frame_dropping());

        pipeline.set_drop_state(true);
        for pts in 0..MAX_DEINTERLACED_DROPS as u64 {
            let picture = decode_picture(&mut adapter, pts, flags);
            pipeline.decode(Some(picture), DrainMode::None);
        }
        assert!(pipeline.allow_frame_dropping());

        pipeline.set_drop_state(false);
        let picture = decode_picture(&mut adapter, 42, flags);
        pipeline.decode(Some(picture), DrainMode::None);
        pipeline.shared.deinterlacing.store(true, Ordering::Relaxed);
        assert!(!pipeline.allow_frame_dropping());
    }

    #[test]
    fn hurried_pictures_are_dropped() {
        const POOL_SIZE: usize = 8;
        let (backend, pipeline) = open(mixer_config(POOL_SIZE));
        let mut adapter = pipeline.decode_adapter();
        let mut infos = Vec::new();
        let mut statuses = DecodeStatus::empty();

        pipeline.set_drop_state(true);
        for pts in 0..3 {
            let picture = decode_picture(&mut adapter, pts, PictureFlags::empty());
            let status = pipeline.decode(Some(picture), DrainMode::None);
            statuses |= status;
            if status.contains(DecodeStatus::PICTURE) {
                infos.push(consume(&pipeline));
            }

            // The hurry request applies to the next message the mixer takes.
            let start = Instant::now();
            while pipeline.stats().pending_messages > 0 {
                assert!(start.elapsed() < Duration::from_secs(1));
                thread::sleep(Duration::from_millis(1));
            }
        }
        pipeline.set_drop_state(false);
        statuses |= drain(&pipeline, &mut infos);

        // Every picture has gone through the output pool, even the skipped ones.
        assert_eq!(pipeline.stats().processed, 3);
        assert!(statuses.contains(DecodeStatus::DROPPED));
        assert_eq!(backend.mixes().len(), 1);
        assert_eq!(pipeline.stats().queues.free, POOL_SIZE);
    }

    /// Waits until the mixer has taken every message or is stuck waiting for a free picture.
    fn wait_mixer_idle(pipeline: &Pipeline<DummyFactory>) {
        let start = Instant::now();
        loop {
            let stats = pipeline.stats();
            if stats.pending_messages == 0 || stats.queues.free == 0 {
                return;
            }
            assert!(start.elapsed() < Duration::from_secs(1), "{:?}", stats);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn backpressure_does_not_block() {
        const POOL_SIZE: usize = 4;
        let (_, pipeline) = open(mixer_config(POOL_SIZE));
        let mut adapter = pipeline.decode_adapter();
        let mut statuses = Vec::new();

        // The consumer never takes anything.
        for pts in 0..10 {
            let picture = decode_picture(&mut adapter, pts, PictureFlags::empty());
            let start = Instant::now();
            statuses.push(pipeline.decode(Some(picture), DrainMode::None));
            assert!(start.elapsed() < Duration::from_secs(1));
            assert_eq!(pipeline.stats().queues.total(), POOL_SIZE);
            wait_mixer_idle(&pipeline);
        }
        assert_eq!(pipeline.stats().queues.free, 0);
        assert!(pipeline.stats().pending_messages > 0);

        let status = pipeline.decode(None, DrainMode::None);
        assert!(!status.contains(DecodeStatus::BUFFER));
        assert!(statuses
            .iter()
            .chain([&status])
            .all(|status| !status.contains(DecodeStatus::ERROR)));

        // The mixer is blocked on a free picture, reset must still get through.
        let start = Instant::now();
        pipeline.reset();
        assert!(start.elapsed() < FLUSH_TIMEOUT);
        assert_all_free(&pipeline);
    }

    #[test]
    fn reset_is_idempotent() {
        const POOL_SIZE: usize = 8;
        let (_, pipeline) = open(mixer_config(POOL_SIZE));
        let mut adapter = pipeline.decode_adapter();

        for pts in 0..4 {
            let picture = decode_picture(&mut adapter, pts, PictureFlags::empty());
            pipeline.decode(Some(picture), DrainMode::None);
        }
        pipeline.reset();
        assert_all_free(&pipeline);
        pipeline.reset();
        assert_all_free(&pipeline);

        // Still works afterwards.
        let mut infos = Vec::new();
        for pts in 10..12 {
            let picture = decode_picture(&mut adapter, pts, PictureFlags::empty());
            if pipeline
                .decode(Some(picture), DrainMode::None)
                .contains(DecodeStatus::PICTURE)
            {
                infos.push(consume(&pipeline));
            }
        }
        drain(&pipeline, &mut infos);
        assert_eq!(infos.len(), 2);
    }

    #[test]
    fn reset_from_another_thread() {
        let (_, pipeline) = open(mixer_config(4));
        let pipeline = Arc::new(pipeline);
        let mut adapter = pipeline.decode_adapter();

        for pts in 0..6 {
            let picture = decode_picture(&mut adapter, pts, PictureFlags::empty());
            pipeline.decode(Some(picture), DrainMode::None);
        }

        let resetter = {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || pipeline.reset())
        };
        resetter.join().unwrap();
        pipeline.reset();
        assert_all_free(&pipeline);
    }

    #[test]
    fn get_picture_needs_a_reported_picture() {
        let (_, pipeline) = open(zero_copy_config(4, Some(4)));
        let mut adapter = pipeline.decode_adapter();

        assert!(matches!(pipeline.get_picture(), Err(PipelineError::NoPicture)));
        let picture = decode_picture(&mut adapter, 0, PictureFlags::empty());
        pipeline.decode(Some(picture), DrainMode::None);
        assert!(matches!(pipeline.get_picture(), Err(PipelineError::NoPicture)));

        assert!(pipeline
            .decode(None, DrainMode::Soft)
            .contains(DecodeStatus::PICTURE));
        let picture = pipeline.get_picture().unwrap();
        assert!(pipeline.discard_present_picture());
        assert!(!pipeline.release_picture(picture.handle));
        assert_all_free(&pipeline);
    }

    #[test]
    fn device_loss_with_pictures_in_flight() {
        const POOL_SIZE: usize = 8;
        let factory = DummyFactory::default();
        let backend = factory.backend.clone();
        let pipeline = Pipeline::open(factory, stream(), mixer_config(POOL_SIZE)).unwrap();
        let mut adapter = pipeline.decode_adapter();

        for pts in 0..3 {
            let picture = decode_picture(&mut adapter, pts, PictureFlags::empty());
            pipeline.decode(Some(picture), DrainMode::None);
        }

        pipeline.on_lost_device();
        assert_eq!(pipeline.stats().device_state, DeviceState::Lost);
        assert!(matches!(
            adapter.on_frame_needs_surface(false),
            Err(PipelineError::DeviceLost)
        ));

        let resetter = {
            let shared = Arc::clone(&pipeline.shared);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                shared.device.mark_reset();
            })
        };
        assert_eq!(pipeline.decode(None, DrainMode::None), DecodeStatus::FLUSHED);
        resetter.join().unwrap();

        assert_eq!(pipeline.factory.opens(), 2);
        assert_eq!(pipeline.stats().device_state, DeviceState::Open);
        assert_eq!(pipeline.stats().surfaces, 0);
        assert_all_free(&pipeline);
        let stats = backend.stats();
        assert_eq!(stats.outputs_created, 2 * POOL_SIZE);
        assert_eq!(stats.outputs_destroyed, POOL_SIZE);
        assert_eq!(stats.surfaces_created, stats.surfaces_destroyed);

        // Decoding starts over.
        let mut infos = Vec::new();
        let picture = decode_picture(&mut adapter, 100, PictureFlags::empty());
        pipeline.decode(Some(picture), DrainMode::None);
        drain(&pipeline, &mut infos);
        assert_eq!(infos.len(), 1);
    }

    #[test]
    fn device_not_coming_back_is_an_error() {
        let config = PipelineConfig {
            device_reset_timeout: Duration::from_millis(20),
            ..mixer_config(4)
        };
        let (_, pipeline) = open(config);

        pipeline.on_lost_device();
        assert_eq!(pipeline.decode(None, DrainMode::None), DecodeStatus::ERROR);
        assert_eq!(pipeline.stats().device_state, DeviceState::Error);
        assert_eq!(pipeline.check(), DecodeStatus::ERROR);
    }

    #[test]
    fn preemption_while_mixing_is_recovered() {
        let (backend, pipeline) = open(mixer_config(8));
        let mut adapter = pipeline.decode_adapter();
        backend.fail_next_mix(DummyFailure::Preempted);

        for pts in 0..2 {
            let picture = decode_picture(&mut adapter, pts, PictureFlags::empty());
            pipeline.decode(Some(picture), DrainMode::None);
        }
        let start = Instant::now();
        while pipeline.stats().device_state != DeviceState::Lost {
            assert!(start.elapsed() < Duration::from_secs(1));
            thread::sleep(Duration::from_millis(1));
        }

        pipeline.on_reset_device();
        assert_eq!(pipeline.check(), DecodeStatus::FLUSHED);
        assert_eq!(pipeline.check(), DecodeStatus::empty());
        assert_all_free(&pipeline);
    }

    #[test]
    fn unexpected_failure_is_terminal() {
        let (backend, pipeline) = open(mixer_config(8));
        let mut adapter = pipeline.decode_adapter();
        backend.fail_next_mix(DummyFailure::Other);

        for pts in 0..2 {
            let picture = decode_picture(&mut adapter, pts, PictureFlags::empty());
            pipeline.decode(Some(picture), DrainMode::None);
        }
        let start = Instant::now();
        while pipeline.stats().device_state != DeviceState::Error {
            assert!(start.elapsed() < Duration::from_secs(1));
            thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(pipeline.decode(None, DrainMode::None), DecodeStatus::ERROR);
        assert!(matches!(
            adapter.on_frame_needs_surface(false),
            Err(PipelineError::DeviceError)
        ));
    }

    #[test]
    fn settings_reach_the_mixer() {
        let (backend, pipeline) = open(mixer_config(8));
        let mut adapter = pipeline.decode_adapter();

        pipeline.set_video_settings(VideoSettings {
            sharpness: 0.5,
            ..Default::default()
        });
        assert_eq!(pipeline.video_settings().sharpness, 0.5);

        let picture = decode_picture(&mut adapter, 0, PictureFlags::empty());
        pipeline.decode(Some(picture), DrainMode::None);
        let mut infos = Vec::new();
        drain(&pipeline, &mut infos);

        let mixes = backend.mixes();
        assert_eq!(mixes.len(), 1);
        assert_eq!(mixes[0].features.sharpness, 0.5);
    }

    #[test]
    fn close_destroys_everything() {
        let (backend, pipeline) = open(mixer_config(8));
        let mut adapter = pipeline.decode_adapter();

        for pts in 0..4 {
            let picture = decode_picture(&mut adapter, pts, PictureFlags::empty());
            if pipeline
                .decode(Some(picture), DrainMode::None)
                .contains(DecodeStatus::PICTURE)
            {
                // Keep it on screen.
                let picture = pipeline.get_picture().unwrap();
                pipeline.present(&picture.handle).unwrap();
            }
        }

        pipeline.close();
        pipeline.close();
        assert_eq!(pipeline.decode(None, DrainMode::None), DecodeStatus::ERROR);

        let stats = backend.stats();
        assert_eq!(stats.outputs_created, stats.outputs_destroyed);
        assert_eq!(stats.surfaces_created, stats.surfaces_destroyed);
        assert_eq!(stats.mixers_created, stats.mixers_destroyed);
    }
}
