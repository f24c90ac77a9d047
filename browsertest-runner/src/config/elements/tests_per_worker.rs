// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use std::{fmt, num::NonZeroUsize};

/// Type for the `tests-per-worker` config key: how many calls a worker handles before it is
/// replaced.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TestsPerWorker {
    /// Replace each worker after this many calls.
    Count(NonZeroUsize),

    /// Never replace workers.
    #[default]
    Unlimited,
}

impl TestsPerWorker {
    /// Returns the limit, or `None` if unlimited.
    pub fn limit(self) -> Option<usize> {
        match self {
            Self::Count(count) => Some(count.get()),
            Self::Unlimited => None,
        }
    }
}

impl fmt::Display for TestsPerWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(count) => write!(f, "{count}"),
            Self::Unlimited => write!(f, "unlimited"),
        }
    }
}

impl Serialize for TestsPerWorker {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Count(count) => serializer.serialize_u64(count.get() as u64),
            Self::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for TestsPerWorker {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = TestsPerWorker;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a positive integer or the string \"unlimited\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v == "unlimited" {
                    Ok(TestsPerWorker::Unlimited)
                } else {
                    Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Str(v),
                        &self,
                    ))
                }
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                usize::try_from(v)
                    .ok()
                    .and_then(NonZeroUsize::new)
                    .map(TestsPerWorker::Count)
                    .ok_or_else(|| {
                        serde::de::Error::invalid_value(serde::de::Unexpected::Signed(v), &self)
                    })
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                usize::try_from(v)
                    .ok()
                    .and_then(NonZeroUsize::new)
                    .map(TestsPerWorker::Count)
                    .ok_or_else(|| {
                        serde::de::Error::invalid_value(serde::de::Unexpected::Unsigned(v), &self)
                    })
            }
        }

        deserializer.deserialize_any(V)
    }
}
