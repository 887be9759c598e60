//! Application state machine and controller notifications
//!
//! The controller holds exactly one [`ApplicationState`]. Every requested
//! transition publishes [`ControllerEvent::StateWillChange`] and then
//! [`ControllerEvent::StateDidChange`], whether or not the transition is
//! allowed and whether or not the value changes. A disallowed request leaves
//! the state untouched.
//!
//! Allowed edges:
//!
//! ```text
//! Uninitialized -> NoMdf -> Idle <-> Running
//!                            ^
//!                            +--> TestPulsing
//! ```

use crate::types::{AbortReason, ApplicationState};
use crossbeam_channel::{unbounded, Receiver, Sender};

/// Notification published by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// A transition was requested
    StateWillChange {
        from: ApplicationState,
        to: ApplicationState,
    },
    /// A transition request was handled; `current` is the resulting state
    StateDidChange {
        previous: ApplicationState,
        current: ApplicationState,
        accepted: bool,
    },
    /// A sweep finished normally
    SweepDidComplete { ordinal: u32, sweeps_completed: u32 },
    /// A sweep ended early
    SweepDidAbort { ordinal: u32, reason: AbortReason },
    /// The run finished normally
    RunDidComplete { sweeps_completed: u32 },
    /// The run ended early
    RunDidAbort { reason: AbortReason },
    /// The controller became busy with run setup, or ready again
    ReadinessDidChange { is_ready: bool },
}

/// Fan-out of controller events to any number of observers
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<Sender<ControllerEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer; it receives every event published from now on
    pub fn subscribe(&mut self) -> Receiver<ControllerEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver an event; observers that hung up are dropped
    pub fn publish(&mut self, event: ControllerEvent) {
        tracing::trace!("Event: {:?}", event);
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live observers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Whether `from -> to` is an allowed edge
pub fn is_allowed_transition(from: ApplicationState, to: ApplicationState) -> bool {
    use ApplicationState::*;
    matches!(
        (from, to),
        (Uninitialized, NoMdf)
            | (NoMdf, Idle)
            | (Idle, Running)
            | (Running, Idle)
            | (Idle, TestPulsing)
            | (TestPulsing, Idle)
    )
}

/// Holder of the application state
#[derive(Debug, Default)]
pub struct StateMachine {
    state: ApplicationState,
    bus: EventBus,
}

impl StateMachine {
    /// Start in `Uninitialized`
    pub fn new() -> Self {
        Self::default()
    }

    /// Start in `Uninitialized` with an existing bus
    pub fn with_bus(bus: EventBus) -> Self {
        Self {
            state: ApplicationState::Uninitialized,
            bus,
        }
    }

    /// Current state
    pub fn state(&self) -> ApplicationState {
        self.state
    }

    /// The event bus, for publishing non-state events
    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    /// Request a transition. Returns whether it was applied.
    pub fn request(&mut self, to: ApplicationState) -> bool {
        let from = self.state;
        self.bus.publish(ControllerEvent::StateWillChange { from, to });

        let accepted = is_allowed_transition(from, to);
        if accepted {
            self.state = to;
            tracing::info!("State: {} -> {}", from, to);
        } else if from != to {
            tracing::debug!("Ignoring disallowed transition {} -> {}", from, to);
        }

        self.bus.publish(ControllerEvent::StateDidChange {
            previous: from,
            current: self.state,
            accepted,
        });
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ApplicationState::*;

    const ALL: [ApplicationState; 5] = [Uninitialized, NoMdf, Idle, Running, TestPulsing];

    #[test]
    fn test_happy_path_edges() {
        let mut sm = StateMachine::new();
        assert!(sm.request(NoMdf));
        assert!(sm.request(Idle));
        assert!(sm.request(Running));
        assert!(sm.request(Idle));
        assert!(sm.request(TestPulsing));
        assert!(sm.request(Idle));
        assert_eq!(sm.state(), Idle);
    }

    #[test]
    fn test_every_request_emits_both_notifications() {
        for from in ALL {
            for to in ALL {
                let mut bus = EventBus::new();
                let rx = bus.subscribe();
                let mut sm = StateMachine { state: from, bus };

                let accepted = sm.request(to);
                let events: Vec<_> = rx.try_iter().collect();
                assert_eq!(events.len(), 2, "{from:?} -> {to:?}");
                assert_eq!(events[0], ControllerEvent::StateWillChange { from, to });

                let expected = if accepted { to } else { from };
                assert_eq!(
                    events[1],
                    ControllerEvent::StateDidChange {
                        previous: from,
                        current: expected,
                        accepted
                    }
                );
                assert_eq!(accepted, is_allowed_transition(from, to));
                assert_eq!(sm.state(), expected);
            }
        }
    }

    #[test]
    fn test_disallowed_transitions_are_noops() {
        let mut sm = StateMachine::new();
        assert!(!sm.request(Running));
        assert!(!sm.request(Idle));
        assert_eq!(sm.state(), Uninitialized);

        sm.request(NoMdf);
        sm.request(Idle);
        sm.request(TestPulsing);
        assert!(!sm.request(Running));
        assert_eq!(sm.state(), TestPulsing);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let mut bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        bus.publish(ControllerEvent::RunDidAbort {
            reason: AbortReason::User,
        });
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(keep.len(), 1);
    }
}
