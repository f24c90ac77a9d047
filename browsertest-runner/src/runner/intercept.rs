// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{InterceptError, RunnerEventError},
    reporter::{EventName, RunnerEvent},
};
use debug_ignore::DebugIgnore;
use std::sync::Arc;
use tracing::warn;

/// What an [`Interceptor`] does with an event.
#[derive(Clone, Debug)]
pub enum Interception {
    /// Emit the event unchanged.
    PassThrough,

    /// Do not emit the event.
    Suppress,

    /// Emit this event instead. The replacement may have a different name.
    Replace(RunnerEvent),
}

type InterceptFn = dyn Fn(&RunnerEvent) -> Result<Interception, InterceptError> + Send + Sync;

/// Rewrites test and suite events before they reach listeners.
///
/// Interceptors are applied in registration order. The output of one interceptor is offered to
/// the next one registered for the output's name. Within one dispatch each interceptor runs at
/// most once, so chains that map an event back to a name already handled always terminate.
#[derive(Clone, Debug)]
pub struct Interceptor {
    event: EventName,
    handler: DebugIgnore<Arc<InterceptFn>>,
}

impl Interceptor {
    /// Creates an interceptor for events named `event`.
    pub fn new(
        event: EventName,
        handler: impl Fn(&RunnerEvent) -> Result<Interception, InterceptError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            event,
            handler: DebugIgnore(Arc::new(handler)),
        }
    }

    /// Returns the name of the events this interceptor handles.
    pub fn event(&self) -> EventName {
        self.event
    }
}

/// Runs `event` through `interceptors`. Returns the event to emit, if any.
///
/// An interceptor error replaces the event with an [`RunnerEvent::Error`].
pub(super) fn apply_interceptors(
    event: RunnerEvent,
    interceptors: &[Interceptor],
) -> Option<RunnerEvent> {
    let mut used = vec![false; interceptors.len()];
    let mut event = event;
    loop {
        let name = event.name();
        let Some(index) =
            (0..interceptors.len()).find(|&index| !used[index] && interceptors[index].event == name)
        else {
            return Some(event);
        };
        used[index] = true;

        match (interceptors[index].handler)(&event) {
            Ok(Interception::PassThrough) => {}
            Ok(Interception::Suppress) => return None,
            Ok(Interception::Replace(replacement)) => event = replacement,
            Err(error) => {
                warn!(event = %name, "event interceptor failed: {error}");
                return Some(RunnerEvent::Error(RunnerEventError::Interceptor {
                    event: name,
                    error: Arc::new(error),
                }));
            }
        }
    }
}
