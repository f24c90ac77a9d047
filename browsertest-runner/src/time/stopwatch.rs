// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Timing for test attempts and whole runs.
//!
//! The wall-clock start time is what reporters show. Durations come from the monotonic clock so
//! that clock adjustments during a run can't make them negative.

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};

/// A running stopwatch.
#[derive(Clone, Debug)]
pub(crate) struct Stopwatch {
    started_at: DateTime<Local>,
    started: Instant,
}

impl Stopwatch {
    pub(crate) fn start() -> Self {
        Self {
            started_at: Local::now(),
            started: Instant::now(),
        }
    }

    /// Reads the stopwatch without stopping it.
    pub(crate) fn lap(&self) -> Lap {
        Lap {
            start_time: self.started_at,
            duration: self.started.elapsed(),
        }
    }
}

/// The time elapsed on a [`Stopwatch`] when it was read.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Lap {
    pub(crate) start_time: DateTime<Local>,
    pub(crate) duration: Duration,
}

impl Lap {
    pub(crate) fn end_time(&self) -> DateTime<Local> {
        self.start_time + self.duration
    }
}
