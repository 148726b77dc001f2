use serde::{Deserialize, Serialize};

/// Workflow state machine states.
///
/// Every invocation is a fresh run; there is no persisted in-flight state.
/// Reconciliation is an optional stage (buy-with-existing-holding only), and
/// ledger commit is skipped when an invocation turns out to be a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowState {
    Start,
    DefinitionResolved,
    Reconciled,
    OrdersPlaced,
    ResultsPartitioned,
    LedgerCommitted,
    Done,
    Failed,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Start => "START",
            WorkflowState::DefinitionResolved => "DEFINITION_RESOLVED",
            WorkflowState::Reconciled => "RECONCILED",
            WorkflowState::OrdersPlaced => "ORDERS_PLACED",
            WorkflowState::ResultsPartitioned => "RESULTS_PARTITIONED",
            WorkflowState::LedgerCommitted => "LEDGER_COMMITTED",
            WorkflowState::Done => "DONE",
            WorkflowState::Failed => "FAILED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: WorkflowState) -> bool {
        use WorkflowState::*;

        // Failure is reachable from any non-terminal state
        if target == Failed {
            return !matches!(self, Done | Failed);
        }

        match (self, target) {
            (Start, DefinitionResolved) => true,

            // Reconciliation only runs when the client already holds the pocket
            (DefinitionResolved, Reconciled) => true,
            (DefinitionResolved, OrdersPlaced) => true,

            // Outstanding requirements stop a buy before any placement
            (Reconciled, OrdersPlaced) => true,
            (Reconciled, Done) => true,

            (OrdersPlaced, ResultsPartitioned) => true,

            // No-op invocations skip the ledger commit
            (ResultsPartitioned, LedgerCommitted) => true,
            (ResultsPartitioned, Done) => true,

            (LedgerCommitted, Done) => true,

            _ => false,
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_valid() {
        use WorkflowState::*;
        let path = [
            Start,
            DefinitionResolved,
            Reconciled,
            OrdersPlaced,
            ResultsPartitioned,
            LedgerCommitted,
            Done,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be valid",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn failed_is_reachable_from_active_states_only() {
        use WorkflowState::*;
        assert!(Start.can_transition_to(Failed));
        assert!(OrdersPlaced.can_transition_to(Failed));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn backwards_transitions_are_invalid() {
        use WorkflowState::*;
        assert!(!OrdersPlaced.can_transition_to(DefinitionResolved));
        assert!(!Done.can_transition_to(Start));
    }
}
