//! Subscription filters.

use serde::{Deserialize, Serialize};
use skylark_types::{EventType, SignalKind};
use std::collections::BTreeSet;

use super::BusMessage;

/// The event types and signal kinds a subscriber wants delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFilter {
    pub events: BTreeSet<EventType>,
    pub signals: BTreeSet<SignalKind>,
}

impl MessageFilter {
    /// Matches nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Matches every event type.
    pub fn all_events() -> Self {
        Self::events(EventType::ALL)
    }

    /// Matches every signal kind.
    pub fn all_signals() -> Self {
        Self::signals(SignalKind::ALL)
    }

    /// Matches the given event types.
    pub fn events(types: impl IntoIterator<Item = EventType>) -> Self {
        Self {
            events: types.into_iter().collect(),
            signals: BTreeSet::new(),
        }
    }

    /// Matches the given signal kinds.
    pub fn signals(kinds: impl IntoIterator<Item = SignalKind>) -> Self {
        Self {
            events: BTreeSet::new(),
            signals: kinds.into_iter().collect(),
        }
    }

    /// Also match the given event types.
    pub fn with_events(mut self, types: impl IntoIterator<Item = EventType>) -> Self {
        self.events.extend(types);
        self
    }

    /// Also match the given signal kinds.
    pub fn with_signals(mut self, kinds: impl IntoIterator<Item = SignalKind>) -> Self {
        self.signals.extend(kinds);
        self
    }

    /// Add everything `other` matches.
    pub fn union(&mut self, other: &MessageFilter) {
        self.events.extend(other.events.iter().copied());
        self.signals.extend(other.signals.iter().copied());
    }

    /// Remove everything `other` matches.
    pub fn subtract(&mut self, other: &MessageFilter) {
        self.events.retain(|t| !other.events.contains(t));
        self.signals.retain(|k| !other.signals.contains(k));
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.signals.is_empty()
    }

    /// Whether a message passes this filter.
    pub fn matches(&self, message: &BusMessage) -> bool {
        match message {
            BusMessage::Event(event) => self.events.contains(&event.event_type),
            BusMessage::Signal(signal) => self.signals.contains(&signal.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_and_subtract() {
        let mut filter = MessageFilter::events([EventType::Interaction]);
        filter.union(&MessageFilter::signals([SignalKind::CohortMatch]));
        filter.union(&MessageFilter::signals([SignalKind::CohortMatch]));
        assert_eq!(filter.signals.len(), 1);

        filter.subtract(&MessageFilter::events([EventType::Interaction, EventType::Milestone]));
        assert!(filter.events.is_empty());
        assert!(!filter.is_empty());

        filter.subtract(&MessageFilter::all_signals());
        assert!(filter.is_empty());
    }

    #[test]
    fn test_builder_combines_both_sides() {
        let filter = MessageFilter::signals([SignalKind::StreakBroken])
            .with_events([EventType::SessionStart, EventType::SessionEnd]);
        assert_eq!(filter.events.len(), 2);
        assert!(filter.signals.contains(&SignalKind::StreakBroken));
    }
}
