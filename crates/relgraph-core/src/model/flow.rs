use super::wire_enum;

wire_enum! {
    FlowStatus, "flow status" {
        Inactive => "INACTIVE",
        Active => "ACTIVE",
        Paused => "PAUSED",
        Archived => "ARCHIVED",
    }
}

wire_enum! {
    /// State of one scheduled flow action for one participant.
    ExecutionStatus, "execution status" {
        Scheduled => "SCHEDULED",
        InProgress => "IN_PROGRESS",
        Success => "SUCCESS",
        TechError => "TECH_ERROR",
        BusinessError => "BUSINESS_ERROR",
        Skipped => "SKIPPED",
    }
}

impl ExecutionStatus {
    /// Scheduled or running executions still occupy their slot.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Scheduled | Self::InProgress)
    }
}

wire_enum! {
    FlowParticipantStatus, "flow participant status" {
        OnHold => "ON_HOLD",
        Ready => "READY",
        Scheduled => "SCHEDULED",
        InProgress => "IN_PROGRESS",
        Paused => "PAUSED",
        Completed => "COMPLETED",
        GoalAchieved => "GOAL_ACHIEVED",
    }
}

wire_enum! {
    FlowActionType, "flow action type" {
        FlowStart => "FLOW_START",
        FlowEnd => "FLOW_END",
        Wait => "WAIT",
        EmailNew => "EMAIL_NEW",
        EmailReply => "EMAIL_REPLY",
        LinkedinConnectionRequest => "LINKEDIN_CONNECTION_REQUEST",
        LinkedinMessage => "LINKEDIN_MESSAGE",
    }
}

impl FlowActionType {
    /// Actions that send from a mailbox and count against its daily cap.
    #[must_use]
    pub const fn uses_mailbox(self) -> bool {
        matches!(self, Self::EmailNew | Self::EmailReply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_statuses() {
        assert!(ExecutionStatus::Scheduled.is_pending());
        assert!(ExecutionStatus::InProgress.is_pending());
        assert!(!ExecutionStatus::Success.is_pending());
        assert!(FlowActionType::EmailNew.uses_mailbox());
        assert!(!FlowActionType::Wait.uses_mailbox());
    }
}
