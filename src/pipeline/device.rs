// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Tracks whether the device can be used.
//!
//! ```text
//!  Open ---lost/preempted---> Lost ---available again---> Reset ---rebuilt---> Open
//!    \                         |                            |
//!     `-------------------- unexpected failure ------------'---> Error (terminal)
//! ```

use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::RwLock;
use std::time::Duration;

use crate::backend::BackendError;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceState {
    /// The device works normally.
    Open,
    /// The device has been preempted or disconnected. No hardware call may be made.
    Lost,
    /// The device is available again and resources must be rebuilt.
    Reset,
    /// The device failed unexpectedly. The pipeline must be closed and reopened.
    Error,
}

pub struct DeviceStateMachine {
    state: RwLock<DeviceState>,
    /// Signalled when the device leaves the `Lost` state.
    reset_event: (Mutex<()>, Condvar),
}

impl Default for DeviceStateMachine {
    fn default() -> Self {
        Self {
            state: RwLock::new(DeviceState::Open),
            reset_event: (Mutex::new(()), Condvar::new()),
        }
    }
}

impl DeviceStateMachine {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn state(&self) -> DeviceState {
        *self.state.read().unwrap()
    }

    pub fn is_open(&self) -> bool {
        self.state() == DeviceState::Open
    }

    /// Moves to `to` if the current state is one of `from`. Returns whether the transition took
    /// place.
    fn transition(&self, from: &[DeviceState], to: DeviceState) -> bool {
        let changed = {
            let mut state = self.state.write().unwrap();
            if from.contains(&*state) {
                log::debug!("device state {:?} -> {:?}", *state, to);
                *state = to;
                true
            } else {
                false
            }
        };

        if changed {
            // Take the event lock so a waiter between its check and its wait cannot miss us.
            let _guard = self.reset_event.0.lock().unwrap();
            self.reset_event.1.notify_all();
        }

        changed
    }

    /// The device has been lost.
    pub fn mark_lost(&self) -> bool {
        self.transition(&[DeviceState::Open], DeviceState::Lost)
    }

    /// The device is available again after having been lost.
    pub fn mark_reset(&self) -> bool {
        let done = self.transition(&[DeviceState::Lost], DeviceState::Reset);
        if !done {
            log::warn!("ignoring device reset in state {:?}", self.state());
        }
        done
    }

    /// Resources have been rebuilt after a reset.
    pub fn mark_open(&self) -> bool {
        self.transition(&[DeviceState::Reset], DeviceState::Open)
    }

    pub fn mark_error(&self) -> bool {
        self.transition(
            &[DeviceState::Open, DeviceState::Lost, DeviceState::Reset],
            DeviceState::Error,
        )
    }

    /// Updates the state after a hardware call failed with `error`.
    ///
    /// Returns `true` if the failure is transient and the operation may be retried later.
    pub fn report_failure(&self, error: &BackendError) -> bool {
        match error {
            BackendError::Preempted => {
                log::error!("device preempted");
                self.mark_lost();
                false
            }
            BackendError::OutOfResources => {
                log::warn!("hardware call failed: {}", error);
                true
            }
            BackendError::Other(e) => {
                log::error!("hardware call failed: {:#}", e);
                self.mark_error();
                false
            }
        }
    }

    /// Waits up to `timeout` for the device to leave the `Lost` state. Returns `false` if it is
    /// still lost after that.
    pub fn wait_for_reset(&self, timeout: Duration) -> bool {
        let guard = self.reset_event.0.lock().unwrap();
        let (_guard, result) = self
            .reset_event
            .1
            .wait_timeout_while(guard, timeout, |_| self.state() == DeviceState::Lost)
            .unwrap();

        !result.timed_out()
    }
}
