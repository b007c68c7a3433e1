use serde::Serialize;

use crate::{Context, Evaluation};

/// Emitted once, when the first datafile becomes available.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadyEvent;

/// Emitted after every successful refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshEvent;

/// Emitted after a refresh that changed the datafile revision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
    /// Revision that was replaced.
    pub previous_revision: String,
    /// Revision now in use.
    pub revision: String,
}

/// Emitted by [`Client::activate`](crate::Client::activate) when a variation is exposed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationEvent {
    /// Key of the activated feature.
    pub feature_key: String,
    /// Variation exposed to the context.
    pub variation_value: String,
    /// Full context passed to `activate`.
    pub context: Context,
    /// Subset of `context` with attributes declared `capture: true` in the datafile.
    pub captured_context: Context,
    /// Evaluation that produced the variation.
    pub evaluation: Evaluation,
}

/// A listener for events of type `E`.
///
/// Implemented for every `Fn(&E)`, so most hosts just pass a closure.
pub trait EventListener<E> {
    /// Called for every event. Panics are caught and logged.
    fn on_event(&self, event: &E);
}

impl<E, T: Fn(&E)> EventListener<E> for T {
    fn on_event(&self, event: &E) {
        self(event);
    }
}

/// Registered listeners for one event kind.
pub(crate) struct Listeners<E> {
    listeners: Vec<Box<dyn EventListener<E> + Send + Sync>>,
}

impl<E> Listeners<E> {
    pub(crate) fn push(&mut self, listener: impl EventListener<E> + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Invoke every listener. A panicking listener does not prevent the others from running.
    pub(crate) fn emit(&self, event_name: &str, event: &E) {
        for listener in &self.listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));
            if result.is_err() {
                log::warn!(target: "featurevisor", event = event_name; "event listener panicked");
            }
        }
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Listeners<E> {
        Listeners {
            listeners: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::{Listeners, UpdateEvent};

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let calls = Arc::new(AtomicUsize::new(0));

        let mut listeners = Listeners::<UpdateEvent>::default();
        listeners.push(|_: &UpdateEvent| panic!("listener failure"));
        {
            let calls = calls.clone();
            listeners.push(move |event: &UpdateEvent| {
                assert_eq!(event.revision, "2");
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        listeners.emit(
            "update",
            &UpdateEvent {
                previous_revision: "1".to_owned(),
                revision: "2".to_owned(),
            },
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn update_event_serializes_camel_case() {
        let event = UpdateEvent {
            previous_revision: "1".to_owned(),
            revision: "2".to_owned(),
        };
        assert_eq!(
            serde_json::to_value(event).unwrap(),
            serde_json::json!({"previousRevision": "1", "revision": "2"})
        );
    }
}
