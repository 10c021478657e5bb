//! Transition table for the task lifecycle.
//!
//! [`NegotiationStateMachine::transition`] is the single authority on which
//! status may follow which. It looks only at the current status, the action
//! and the role of whoever is acting; field-level preconditions (costs,
//! ownership, schedule) are checked by the engine afterwards.
use super::config::{NegotiationPolicy, RejectTarget};
use super::error::NegotiationError;
use super::task::TaskStatus;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    #[n(0)]
    Requester,
    #[n(1)]
    Agent,
    #[n(2)]
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    BeginReview,
    ProposeCost,
    AcceptCost,
    RejectCost,
    ProposeCounterOffer,
    CancelCounterOffer,
    ProposeDeliveryCounter,
    FinalizeNegotiation,
    Assign,
    Complete,
    Expire,
}

impl Action {
    pub const ALL: [Action; 11] = [
        Action::BeginReview,
        Action::ProposeCost,
        Action::AcceptCost,
        Action::RejectCost,
        Action::ProposeCounterOffer,
        Action::CancelCounterOffer,
        Action::ProposeDeliveryCounter,
        Action::FinalizeNegotiation,
        Action::Assign,
        Action::Complete,
        Action::Expire,
    ];

    /// Roles allowed to perform this action.
    pub const fn permitted_roles(&self) -> &'static [Role] {
        match self {
            Action::BeginReview | Action::ProposeCost | Action::ProposeDeliveryCounter => {
                &[Role::Agent]
            }
            Action::AcceptCost
            | Action::RejectCost
            | Action::ProposeCounterOffer
            | Action::CancelCounterOffer => &[Role::Requester],
            Action::FinalizeNegotiation => &[Role::Requester, Role::System],
            Action::Assign => &[Role::Agent, Role::System],
            Action::Complete => &[Role::Agent, Role::Requester],
            Action::Expire => &[Role::System],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NegotiationStateMachine {
    policy: NegotiationPolicy,
}

impl NegotiationStateMachine {
    pub fn new(policy: NegotiationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &NegotiationPolicy {
        &self.policy
    }

    /// Status reached by applying `action` to `from`, ignoring who acts.
    pub fn target(&self, from: TaskStatus, action: Action) -> Option<TaskStatus> {
        use Action::*;
        use TaskStatus::*;

        if from.is_terminal() {
            return None;
        }

        let to = match (from, action) {
            (Pending | Scheduled, BeginReview) => CostReview,
            (CostReview, ProposeCost) => CostProposed,
            (CostProposed, AcceptCost) => CostAccepted,
            (CostProposed, RejectCost) => match self.policy.reject_target {
                RejectTarget::CostReview => CostReview,
                RejectTarget::Pending => Pending,
            },
            (CostProposed, ProposeCounterOffer) => UserCounterProposed,
            (UserCounterProposed, CancelCounterOffer) => CostProposed,
            (UserCounterProposed, AcceptCost) => CostAccepted,
            (UserCounterProposed, ProposeDeliveryCounter) => DeliveryCounterProposed,
            (DeliveryCounterProposed, AcceptCost) => CostAccepted,
            (DeliveryCounterProposed, ProposeCounterOffer) => UserCounterProposed,
            (CostAccepted, FinalizeNegotiation) => NegotiationFinalized,
            (CostAccepted | NegotiationFinalized, Assign) => Assigned,
            (Assigned, Complete) => Completed,
            (Pending | Scheduled, Expire) => Expired,
            (
                CostReview | CostProposed | UserCounterProposed | DeliveryCounterProposed
                | CostAccepted | NegotiationFinalized,
                Expire,
            ) if self.policy.expire_open_negotiations =>
            {
                Expired
            }
            _ => return None,
        };

        Some(to)
    }

    pub fn transition(
        &self,
        current: TaskStatus,
        action: Action,
        actor: Role,
    ) -> Result<TaskStatus, NegotiationError> {
        let to = self
            .target(current, action)
            .ok_or(NegotiationError::IllegalTransition {
                from: current,
                action,
            })?;

        if !action.permitted_roles().contains(&actor) {
            return Err(NegotiationError::UnauthorizedRole {
                action,
                role: actor,
            });
        }

        Ok(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> NegotiationStateMachine {
        NegotiationStateMachine::default()
    }

    #[test]
    fn happy_path_reaches_completed() {
        let m = machine();
        let steps = [
            (Action::BeginReview, Role::Agent, TaskStatus::CostReview),
            (Action::ProposeCost, Role::Agent, TaskStatus::CostProposed),
            (Action::AcceptCost, Role::Requester, TaskStatus::CostAccepted),
            (Action::Assign, Role::System, TaskStatus::Assigned),
            (Action::Complete, Role::Agent, TaskStatus::Completed),
        ];

        let mut status = TaskStatus::Pending;
        for (action, role, expected) in steps {
            status = m.transition(status, action, role).unwrap();
            assert_eq!(status, expected);
        }
    }

    #[test]
    fn terminal_statuses_have_no_outgoing_actions() {
        let m = NegotiationStateMachine::new(NegotiationPolicy {
            expire_open_negotiations: true,
            ..Default::default()
        });
        for from in [TaskStatus::Completed, TaskStatus::Expired] {
            for action in Action::ALL {
                assert!(m.target(from, action).is_none(), "{from:?} -> {action:?}");
            }
        }
    }

    #[test]
    fn reject_target_follows_policy() {
        let default = machine();
        assert_eq!(
            default.transition(TaskStatus::CostProposed, Action::RejectCost, Role::Requester),
            Ok(TaskStatus::CostReview)
        );

        let legacy = NegotiationStateMachine::new(NegotiationPolicy {
            reject_target: RejectTarget::Pending,
            ..Default::default()
        });
        assert_eq!(
            legacy.transition(TaskStatus::CostProposed, Action::RejectCost, Role::Requester),
            Ok(TaskStatus::Pending)
        );
    }

    #[test]
    fn illegal_pair_is_reported_before_role() {
        let res = machine().transition(TaskStatus::Completed, Action::AcceptCost, Role::Agent);

        assert_eq!(
            res,
            Err(NegotiationError::IllegalTransition {
                from: TaskStatus::Completed,
                action: Action::AcceptCost,
            })
        );
    }

    #[test]
    fn wrong_role_is_unauthorized() {
        let res = machine().transition(TaskStatus::CostReview, Action::ProposeCost, Role::Requester);

        assert_eq!(
            res,
            Err(NegotiationError::UnauthorizedRole {
                action: Action::ProposeCost,
                role: Role::Requester,
            })
        );
    }

    #[test]
    fn open_negotiations_only_expire_when_enabled() {
        assert!(machine()
            .transition(TaskStatus::CostProposed, Action::Expire, Role::System)
            .is_err());

        let lenient = NegotiationStateMachine::new(NegotiationPolicy {
            expire_open_negotiations: true,
            ..Default::default()
        });
        assert_eq!(
            lenient.transition(TaskStatus::CostProposed, Action::Expire, Role::System),
            Ok(TaskStatus::Expired)
        );
        assert_eq!(
            lenient.transition(TaskStatus::NegotiationFinalized, Action::Expire, Role::System),
            Ok(TaskStatus::Expired)
        );
        assert!(lenient
            .transition(TaskStatus::Assigned, Action::Expire, Role::System)
            .is_err());
        assert!(machine()
            .transition(TaskStatus::CostAccepted, Action::Expire, Role::System)
            .is_err());
    }
}
