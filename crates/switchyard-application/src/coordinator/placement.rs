use switchyard_core::state::{StateKind, Tier};

/// Chooses the home tier of a state object on every write.
#[derive(Debug, Clone, Copy)]
pub struct PlacementPolicy {
    size_threshold_bytes: usize,
}

impl PlacementPolicy {
    pub fn new(size_threshold_bytes: usize) -> Self {
        Self {
            size_threshold_bytes,
        }
    }

    /// Durable artifacts always go durable. Otherwise an object goes fast only when it
    /// is session-scoped, has an explicit TTL and is below the size threshold.
    pub fn place(
        &self,
        kind: StateKind,
        session_scoped: bool,
        has_ttl: bool,
        payload_size: usize,
    ) -> Tier {
        if kind.is_durable_artifact() {
            return Tier::Durable;
        }
        if session_scoped && has_ttl && payload_size < self.size_threshold_bytes {
            Tier::Fast
        } else {
            Tier::Durable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placement_rules() {
        let policy = PlacementPolicy::new(64 * 1024);

        assert_eq!(policy.place(StateKind::Session, true, true, 100), Tier::Fast);
        assert_eq!(policy.place(StateKind::Ephemeral, true, true, 100), Tier::Fast);

        // no ttl, no owner, or too large
        assert_eq!(policy.place(StateKind::Ephemeral, true, false, 100), Tier::Durable);
        assert_eq!(policy.place(StateKind::Ephemeral, false, true, 100), Tier::Durable);
        assert_eq!(
            policy.place(StateKind::Ephemeral, true, true, 64 * 1024),
            Tier::Durable
        );

        assert_eq!(
            policy.place(StateKind::ConversationTranscript, true, true, 10),
            Tier::Durable
        );
        assert_eq!(policy.place(StateKind::WorkflowGraph, true, true, 10), Tier::Durable);
    }
}
