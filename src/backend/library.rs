// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Process-wide handles to driver libraries.
//!
//! Some drivers crash when their library is unloaded and loaded again within the same process.
//! Libraries registered here are therefore loaded once and stay loaded until the process exits.
//! Users still acquire and release them explicitly so we can tell whether a library is in use.
//! This is specific to driver libraries and not a pattern for other resources.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::OnceLock;

#[derive(Debug, Default)]
struct Entry {
    refcount: usize,
}

fn registry() -> &'static Mutex<HashMap<String, Entry>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Entry>>> = OnceLock::new();
    REGISTRY.get_or_init(Default::default)
}

/// A reference to a loaded driver library. Dropping it releases the reference but never unloads
/// the library.
#[derive(Debug)]
pub struct LibraryRef {
    name: String,
}

impl LibraryRef {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LibraryRef {
    fn drop(&mut self) {
        let mut registry = registry().lock().unwrap();
        if let Some(entry) = registry.get_mut(&self.name) {
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount == 0 {
                log::debug!("{} has no users left, keeping it loaded", self.name);
            }
        }
    }
}

/// Acquires a reference to library `name`, calling `load` if the library has never been loaded
/// in this process.
///
/// If `load` fails the library is not registered and the next call will try again.
pub fn acquire<F>(name: &str, load: F) -> anyhow::Result<LibraryRef>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    let mut registry = registry().lock().unwrap();

    match registry.get_mut(name) {
        Some(entry) => entry.refcount += 1,
        None => {
            load()?;
            log::debug!("loaded driver library {}", name);
            registry.insert(name.to_string(), Entry { refcount: 1 });
        }
    }

    Ok(LibraryRef {
        name: name.to_string(),
    })
}

/// Whether `name` has been loaded in this process.
pub fn is_loaded(name: &str) -> bool {
    registry().lock().unwrap().contains_key(name)
}

/// Number of live references to `name`.
pub fn refcount(name: &str) -> usize {
    registry()
        .lock()
        .unwrap()
        .get(name)
        .map(|e| e.refcount)
        .unwrap_or(0)
}
