use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::flow::LevelPolicy;
use crate::domain::user::UserId;
use crate::flows::states::{
    ApprovalState, Decision, LevelDecision, MachineState, TransitionOutcome,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    #[error("approval process is already in terminal state {state:?}")]
    InvalidState { state: MachineState },
    #[error("approver `{approver}` is not a member of approval level {level}")]
    UnauthorizedApprover { approver: String, level: usize },
    #[error("approver `{approver}` has already decided at approval level {level}")]
    DuplicateDecision { approver: String, level: usize },
    #[error("a rejection requires comments explaining the reason")]
    CommentRequired,
}

/// Applies one approver decision to an expense's approval state.
///
/// The machine itself holds no data; all positional bookkeeping lives in
/// `ApprovalState` so that persistence and replay stay trivial.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApprovalStateMachine;

impl ApprovalStateMachine {
    pub fn record_decision(
        &self,
        state: &mut ApprovalState,
        approver: &UserId,
        decision: Decision,
        comments: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, DecisionError> {
        let from = state.machine_state();
        if from.is_terminal() {
            return Err(DecisionError::InvalidState { state: from });
        }

        let level_index = state.current_level;
        let level = &state.levels[level_index];
        let is_member = level.contains(approver);

        // Replay guard: an identical decision from the approver who just
        // satisfied the previous level is a resubmission, not a new vote.
        // An approver who also sits at the current level is casting a
        // fresh one and must not be caught here.
        if level_index > 0 && !is_member {
            let replayed = state
                .decisions_at(level_index - 1)
                .any(|prior| &prior.approver == approver && prior.decision == decision);
            if replayed {
                return Err(DecisionError::DuplicateDecision {
                    approver: approver.0.clone(),
                    level: level_index - 1,
                });
            }
        }

        if !is_member {
            return Err(DecisionError::UnauthorizedApprover {
                approver: approver.0.clone(),
                level: level_index,
            });
        }

        if state.has_decided(level_index, approver) {
            return Err(DecisionError::DuplicateDecision {
                approver: approver.0.clone(),
                level: level_index,
            });
        }

        let comments = comments.filter(|text| !text.trim().is_empty());
        if decision == Decision::Reject && comments.is_none() {
            return Err(DecisionError::CommentRequired);
        }

        let policy = level.policy;
        let approver_count = level.approvers.len();

        state.decisions.push(LevelDecision {
            level: level_index,
            approver: approver.clone(),
            decision,
            comments,
            decided_at: now,
        });
        state.updated_at = now;

        let to = match decision {
            // One rejection at any active level ends the flow, regardless of
            // other pending approvers at that level.
            Decision::Reject => MachineState::Rejected,
            Decision::Approve => {
                let satisfied = match policy {
                    LevelPolicy::AnyOne => true,
                    LevelPolicy::AllRequired => {
                        let approvals = state
                            .decisions_at(level_index)
                            .filter(|prior| prior.decision == Decision::Approve)
                            .count();
                        approvals == approver_count
                    }
                };

                if satisfied {
                    state.current_level += 1;
                    state.machine_state()
                } else {
                    MachineState::AwaitingLevel(level_index)
                }
            }
        };

        Ok(TransitionOutcome {
            from,
            to,
            decision,
            approver: approver.clone(),
            terminal: to.is_terminal(),
        })
    }

    pub fn record_decision_with_audit<S>(
        &self,
        state: &mut ApprovalState,
        approver: &UserId,
        decision: Decision,
        comments: Option<String>,
        now: DateTime<Utc>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, DecisionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.record_decision(state, approver, decision, comments, now);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    audit
                        .event("approval.decision_applied", AuditCategory::Flow, AuditOutcome::Success)
                        .with_metadata("from", format!("{:?}", outcome.from))
                        .with_metadata("to", format!("{:?}", outcome.to))
                        .with_metadata("decision", format!("{:?}", outcome.decision))
                        .with_metadata("approver", outcome.approver.0.clone()),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event("approval.decision_rejected", AuditCategory::Flow, AuditOutcome::Rejected)
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::expense::{CostCenterId, ExpenseId};
    use crate::domain::flow::{ApprovalFlow, ApprovalLevel, FlowId, LevelPolicy};
    use crate::domain::user::UserId;
    use crate::flows::engine::{ApprovalStateMachine, DecisionError};
    use crate::flows::states::{ApprovalState, Decision, MachineState};

    fn flow_with_levels(levels: Vec<ApprovalLevel>) -> ApprovalFlow {
        let now = Utc::now();
        ApprovalFlow {
            id: FlowId("flow-1".to_string()),
            name: "Standard".to_string(),
            description: String::new(),
            min_amount: Decimal::new(50_000, 2),
            max_amount: Some(Decimal::new(250_000, 2)),
            cost_center_id: None,
            is_active: true,
            levels,
            created_at: now,
            updated_at: now,
        }
    }

    /// Flow shaped like the canonical example: `[[userA, userB], [userC]]`
    /// with a $500-$2500 band.
    fn two_level_state() -> ApprovalState {
        let flow = flow_with_levels(vec![
            ApprovalLevel::any_one(vec![UserId::from("u-a"), UserId::from("u-b")]),
            ApprovalLevel::any_one(vec![UserId::from("u-c")]),
        ]);
        ApprovalState::for_flow(ExpenseId("EXP-1".to_string()), &flow, Utc::now())
    }

    #[test]
    fn any_one_approval_advances_to_next_level() {
        let machine = ApprovalStateMachine;
        let mut state = two_level_state();

        let outcome = machine
            .record_decision(&mut state, &UserId::from("u-b"), Decision::Approve, None, Utc::now())
            .expect("level-0 approve");

        assert_eq!(outcome.from, MachineState::AwaitingLevel(0));
        assert_eq!(outcome.to, MachineState::AwaitingLevel(1));
        assert!(!outcome.terminal);
        assert_eq!(state.current_level, 1);
    }

    #[test]
    fn approving_the_last_level_is_terminal() {
        let machine = ApprovalStateMachine;
        let mut state = two_level_state();

        machine
            .record_decision(&mut state, &UserId::from("u-a"), Decision::Approve, None, Utc::now())
            .expect("level-0 approve");
        let outcome = machine
            .record_decision(&mut state, &UserId::from("u-c"), Decision::Approve, None, Utc::now())
            .expect("level-1 approve");

        assert_eq!(outcome.to, MachineState::Approved);
        assert!(outcome.terminal);
        assert_eq!(state.machine_state(), MachineState::Approved);
    }

    #[test]
    fn single_reject_is_terminal_even_after_earlier_approvals() {
        let machine = ApprovalStateMachine;
        let mut state = two_level_state();

        machine
            .record_decision(&mut state, &UserId::from("u-b"), Decision::Approve, None, Utc::now())
            .expect("level-0 approve");
        let outcome = machine
            .record_decision(
                &mut state,
                &UserId::from("u-c"),
                Decision::Reject,
                Some("duplicate".to_string()),
                Utc::now(),
            )
            .expect("level-1 reject");

        assert_eq!(outcome.to, MachineState::Rejected);
        assert!(outcome.terminal);
        assert_eq!(state.rejection_reason(), Some("duplicate"));
    }

    #[test]
    fn reject_at_first_level_ends_flow_with_other_approvers_pending() {
        let machine = ApprovalStateMachine;
        let mut state = two_level_state();

        let outcome = machine
            .record_decision(
                &mut state,
                &UserId::from("u-a"),
                Decision::Reject,
                Some("no receipt".to_string()),
                Utc::now(),
            )
            .expect("level-0 reject");

        assert_eq!(outcome.to, MachineState::Rejected);
        assert_eq!(state.machine_state(), MachineState::Rejected);
    }

    #[test]
    fn reject_without_comments_is_refused() {
        let machine = ApprovalStateMachine;
        let mut state = two_level_state();

        let error = machine
            .record_decision(&mut state, &UserId::from("u-a"), Decision::Reject, None, Utc::now())
            .expect_err("reject needs a reason");
        assert_eq!(error, DecisionError::CommentRequired);

        let error = machine
            .record_decision(
                &mut state,
                &UserId::from("u-a"),
                Decision::Reject,
                Some("   ".to_string()),
                Utc::now(),
            )
            .expect_err("blank comments do not count");
        assert_eq!(error, DecisionError::CommentRequired);
        assert_eq!(state.machine_state(), MachineState::AwaitingLevel(0));
    }

    #[test]
    fn non_member_of_current_level_is_unauthorized() {
        let machine = ApprovalStateMachine;
        let mut state = two_level_state();

        let error = machine
            .record_decision(&mut state, &UserId::from("u-c"), Decision::Approve, None, Utc::now())
            .expect_err("u-c sits at level 1, not level 0");
        assert_eq!(
            error,
            DecisionError::UnauthorizedApprover { approver: "u-c".to_string(), level: 0 }
        );
    }

    #[test]
    fn decision_on_terminal_state_is_invalid() {
        let machine = ApprovalStateMachine;
        let mut state = two_level_state();

        machine
            .record_decision(
                &mut state,
                &UserId::from("u-a"),
                Decision::Reject,
                Some("over budget".to_string()),
                Utc::now(),
            )
            .expect("reject");

        let error = machine
            .record_decision(&mut state, &UserId::from("u-c"), Decision::Approve, None, Utc::now())
            .expect_err("terminal state accepts no decisions");
        assert_eq!(error, DecisionError::InvalidState { state: MachineState::Rejected });
    }

    #[test]
    fn identical_resubmission_after_advancement_is_a_duplicate() {
        let machine = ApprovalStateMachine;
        let mut state = two_level_state();

        machine
            .record_decision(&mut state, &UserId::from("u-a"), Decision::Approve, None, Utc::now())
            .expect("first approve");
        let error = machine
            .record_decision(&mut state, &UserId::from("u-a"), Decision::Approve, None, Utc::now())
            .expect_err("replay must not advance a second level");

        assert_eq!(
            error,
            DecisionError::DuplicateDecision { approver: "u-a".to_string(), level: 0 }
        );
        assert_eq!(state.current_level, 1);
    }

    #[test]
    fn approver_repeated_across_consecutive_levels_decides_both() {
        let machine = ApprovalStateMachine;
        let flow = flow_with_levels(vec![
            ApprovalLevel::any_one(vec![UserId::from("u-a")]),
            ApprovalLevel::any_one(vec![UserId::from("u-a")]),
        ]);
        flow.validate().expect("cross-level repeats are a valid shape");
        let mut state = ApprovalState::for_flow(ExpenseId("EXP-1".to_string()), &flow, Utc::now());

        machine
            .record_decision(&mut state, &UserId::from("u-a"), Decision::Approve, None, Utc::now())
            .expect("level-0 approve");
        let outcome = machine
            .record_decision(&mut state, &UserId::from("u-a"), Decision::Approve, None, Utc::now())
            .expect("u-a is the sole level-1 approver and has not voted there");

        assert_eq!(outcome.to, MachineState::Approved);
        assert!(outcome.terminal);
    }

    #[test]
    fn all_required_level_waits_for_every_approver() {
        let machine = ApprovalStateMachine;
        let flow = flow_with_levels(vec![ApprovalLevel {
            approvers: vec![UserId::from("u-a"), UserId::from("u-b")],
            policy: LevelPolicy::AllRequired,
        }]);
        let mut state = ApprovalState::for_flow(ExpenseId("EXP-1".to_string()), &flow, Utc::now());

        let first = machine
            .record_decision(&mut state, &UserId::from("u-a"), Decision::Approve, None, Utc::now())
            .expect("first of two");
        assert_eq!(first.to, MachineState::AwaitingLevel(0));
        assert!(!first.terminal);

        let error = machine
            .record_decision(&mut state, &UserId::from("u-a"), Decision::Approve, None, Utc::now())
            .expect_err("same approver cannot vote twice at the level");
        assert!(matches!(error, DecisionError::DuplicateDecision { .. }));

        let second = machine
            .record_decision(&mut state, &UserId::from("u-b"), Decision::Approve, None, Utc::now())
            .expect("second of two");
        assert_eq!(second.to, MachineState::Approved);
        assert!(second.terminal);
    }

    #[test]
    fn canonical_walkthrough_matches_expected_states() {
        let machine = ApprovalStateMachine;
        let mut state = two_level_state();
        assert_eq!(state.machine_state(), MachineState::AwaitingLevel(0));

        machine
            .record_decision(&mut state, &UserId::from("u-b"), Decision::Approve, None, Utc::now())
            .expect("userB approves");
        assert_eq!(state.machine_state(), MachineState::AwaitingLevel(1));

        machine
            .record_decision(
                &mut state,
                &UserId::from("u-c"),
                Decision::Reject,
                Some("duplicate".to_string()),
                Utc::now(),
            )
            .expect("userC rejects");
        assert_eq!(state.machine_state(), MachineState::Rejected);
        assert_eq!(state.rejection_reason(), Some("duplicate"));
    }

    #[test]
    fn audit_wrapper_emits_transition_events() {
        let machine = ApprovalStateMachine;
        let sink = InMemoryAuditSink::default();
        let mut state = two_level_state();

        machine
            .record_decision_with_audit(
                &mut state,
                &UserId::from("u-a"),
                Decision::Approve,
                None,
                Utc::now(),
                &sink,
                &AuditContext::new(Some(ExpenseId("EXP-1".to_string())), "req-7", "u-a"),
            )
            .expect("approve");

        let _ = machine.record_decision_with_audit(
            &mut state,
            &UserId::from("u-zz"),
            Decision::Approve,
            None,
            Utc::now(),
            &sink,
            &AuditContext::new(Some(ExpenseId("EXP-1".to_string())), "req-8", "u-zz"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "approval.decision_applied");
        assert_eq!(events[0].correlation_id, "req-7");
        assert_eq!(events[1].event_type, "approval.decision_rejected");
        assert!(events[1].metadata["error"].contains("u-zz"));
    }

    #[test]
    fn replay_is_deterministic_for_same_decision_sequence() {
        let machine = ApprovalStateMachine;
        let decided_at = Utc::now();

        let run = || {
            let mut state = two_level_state();
            machine
                .record_decision(
                    &mut state,
                    &UserId::from("u-a"),
                    Decision::Approve,
                    None,
                    decided_at,
                )
                .expect("approve");
            machine
                .record_decision(
                    &mut state,
                    &UserId::from("u-c"),
                    Decision::Approve,
                    None,
                    decided_at,
                )
                .expect("approve");
            (state.machine_state(), state.decisions.len())
        };

        assert_eq!(run(), run());
    }
}
