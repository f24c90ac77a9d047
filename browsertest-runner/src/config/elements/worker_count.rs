// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{config::core::get_num_cpus, errors::WorkerCountParseError};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// Type for the `workers` config key: the maximum number of worker processes.
///
/// Counts that depend on the machine are resolved by [`compute`](Self::compute), not while
/// parsing, so the snapshot sent to workers keeps the value as written.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "RawWorkerCount", into = "RawWorkerCount")]
pub enum WorkerCount {
    /// Run at most this many workers.
    Count(usize),

    /// Run one worker per logical CPU.
    NumCpus,

    /// Run one worker per logical CPU, leaving this many CPUs spare. At least one worker runs.
    ///
    /// Written as a negative integer in config files.
    SpareCpus(NonZeroUsize),
}

impl WorkerCount {
    /// Gets the number of workers to run on this machine.
    pub fn compute(self) -> usize {
        match self {
            Self::Count(workers) => workers,
            Self::NumCpus => get_num_cpus(),
            Self::SpareCpus(spare) => get_num_cpus().saturating_sub(spare.get()).max(1),
        }
    }
}

/// The forms `workers` takes in config files and worker snapshots.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
enum RawWorkerCount {
    Number(i64),
    Keyword(String),
}

const NUM_CPUS: &str = "num-cpus";

impl TryFrom<RawWorkerCount> for WorkerCount {
    type Error = WorkerCountParseError;

    fn try_from(raw: RawWorkerCount) -> Result<Self, Self::Error> {
        match raw {
            RawWorkerCount::Number(0) => Err(WorkerCountParseError::Zero),
            RawWorkerCount::Number(n) if n > 0 => usize::try_from(n)
                .map(Self::Count)
                .map_err(|_| WorkerCountParseError::TooLarge(n)),
            RawWorkerCount::Number(n) => usize::try_from(n.unsigned_abs())
                .ok()
                .and_then(NonZeroUsize::new)
                .map(Self::SpareCpus)
                .ok_or(WorkerCountParseError::TooLarge(n)),
            RawWorkerCount::Keyword(keyword) if keyword == NUM_CPUS => Ok(Self::NumCpus),
            RawWorkerCount::Keyword(keyword) => Err(WorkerCountParseError::UnknownKeyword(keyword)),
        }
    }
}

impl From<WorkerCount> for RawWorkerCount {
    fn from(workers: WorkerCount) -> Self {
        match workers {
            WorkerCount::Count(n) => Self::Number(i64::try_from(n).unwrap_or(i64::MAX)),
            WorkerCount::NumCpus => Self::Keyword(NUM_CPUS.to_owned()),
            WorkerCount::SpareCpus(spare) => {
                Self::Number(i64::try_from(spare.get()).map_or(i64::MIN, |spare| -spare))
            }
        }
    }
}
