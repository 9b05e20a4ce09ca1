// This file is part of mp3vault, a continuously-recorded MP3 archive.
// Copyright (C) 2026 The mp3vault Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-3.0-or-later WITH GPL-3.0-linking-exception

//! Clock interface and implementations for testability.
//!
//! The store's refresh throttle and the writer's silence-triggered rotation
//! are both defined in terms of wall-clock time elapsing. Routing all of it
//! through a [`Clocks`] trait lets tests advance time instantly instead of
//! sleeping.

use failure::Error;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Abstract interface to the system clock. This is for testability.
pub trait Clocks: Send + Sync + 'static {
    /// Gets the current wall-clock time.
    fn now(&self) -> SystemTime;

    /// Causes the current thread to sleep for the specified time.
    fn sleep(&self, how_long: Duration);
}

pub fn retry_forever<T, E: Into<Error>>(clocks: &dyn Clocks, f: &mut dyn FnMut() -> Result<T, E>) -> T {
    loop {
        let e = match f() {
            Ok(t) => return t,
            Err(e) => e.into(),
        };
        let sleep_time = Duration::from_secs(1);
        log::warn!("sleeping for {:?} after error: {}", sleep_time, e);
        clocks.sleep(sleep_time);
    }
}

/// Converts a wall-clock time to unix seconds, as the on-disk filename
/// format and the resolver's arithmetic both require.
pub fn unix_secs(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

#[derive(Copy, Clone, Default)]
pub struct RealClocks {}

impl Clocks for RealClocks {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, how_long: Duration) {
        thread::sleep(how_long);
    }
}

/// Logs a warning if the `TimerGuard` lives "too long", using the label
/// created by a supplied function.
pub struct TimerGuard<'a, C: Clocks + ?Sized, S: AsRef<str>, F: FnOnce() -> S + 'a> {
    clocks: &'a C,
    label_f: Option<F>,
    start: SystemTime,
}

impl<'a, C: Clocks + ?Sized, S: AsRef<str>, F: FnOnce() -> S + 'a> TimerGuard<'a, C, S, F> {
    pub fn new(clocks: &'a C, label_f: F) -> Self {
        TimerGuard {
            clocks,
            label_f: Some(label_f),
            start: clocks.now(),
        }
    }
}

impl<'a, C, S, F> Drop for TimerGuard<'a, C, S, F>
where
    C: Clocks + ?Sized,
    S: AsRef<str>,
    F: FnOnce() -> S + 'a,
{
    fn drop(&mut self) {
        if let Ok(elapsed) = self.clocks.now().duration_since(self.start) {
            if elapsed.as_secs() >= 1 {
                let label_f = self.label_f.take().unwrap();
                log::warn!("{} took {:?}!", label_f().as_ref(), elapsed);
            }
        }
    }
}

/// Simulated clock for testing: `now()` only advances when `sleep` or
/// `advance` is called.
#[derive(Clone)]
pub struct SimulatedClocks(Arc<SimulatedClocksInner>);

struct SimulatedClocksInner {
    boot: SystemTime,
    uptime: Mutex<Duration>,
}

impl SimulatedClocks {
    pub fn new(boot: SystemTime) -> Self {
        SimulatedClocks(Arc::new(SimulatedClocksInner {
            boot,
            uptime: Mutex::new(Duration::from_secs(0)),
        }))
    }

    /// Advances the clock by the specified amount without actually sleeping.
    pub fn advance(&self, d: Duration) {
        let mut l = self.0.uptime.lock().unwrap();
        *l += d;
    }
}

impl Clocks for SimulatedClocks {
    fn now(&self) -> SystemTime {
        self.0.boot + *self.0.uptime.lock().unwrap()
    }

    fn sleep(&self, how_long: Duration) {
        self.advance(how_long);
    }
}
