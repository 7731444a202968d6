//! Cross-group messages and their apply phase.
//!
//! Groups, detectors and the scheduler never write another group's flags
//! directly. They emit [`GroupMessage`] values and the tick commits them
//! through [`apply_all`], in emission order. When messages are committed is
//! chosen by [`MessageApply`](crate::config::MessageApply).

use crate::group::{GroupId, SignalGroup};

/// A write to one group's demand, permission or priority flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMessage {
    /// Set or clear the green request; a set is ignored while the group is
    /// green or amber. An accepted write is mirrored to side-request partners.
    RequestGreen {
        /// Target group.
        group: GroupId,
        /// Requested value.
        on: bool,
    },
    /// Raw request write from a side-request partner.
    MirrorRequest {
        /// Target group.
        group: GroupId,
        /// Mirrored value.
        on: bool,
    },
    /// Ask the group to end its green when it can.
    EndGreen {
        /// Target group.
        group: GroupId,
    },
    /// Grant or withdraw green permission.
    Permit {
        /// Target group.
        group: GroupId,
        /// Whether permission is granted.
        granted: bool,
    },
    /// Set the group's own request level.
    OwnLevel {
        /// Target group.
        group: GroupId,
        /// New level.
        level: u8,
    },
    /// Raise the level of competing requests if higher than recorded.
    RaiseOtherLevel {
        /// Target group.
        group: GroupId,
        /// Candidate level.
        level: u8,
    },
    /// Reset the level of competing requests to the default.
    ResetOtherLevel {
        /// Target group.
        group: GroupId,
    },
}

impl GroupMessage {
    /// The group this message writes to.
    pub const fn target(self) -> GroupId {
        match self {
            Self::RequestGreen { group, .. }
            | Self::MirrorRequest { group, .. }
            | Self::EndGreen { group }
            | Self::Permit { group, .. }
            | Self::OwnLevel { group, .. }
            | Self::RaiseOtherLevel { group, .. }
            | Self::ResetOtherLevel { group } => group,
        }
    }
}

/// Commit one message. Messages to unknown groups are dropped.
pub(crate) fn apply(groups: &mut [SignalGroup], message: GroupMessage) {
    let Some(target) = groups.get_mut(message.target().index()) else {
        return;
    };
    match message {
        GroupMessage::RequestGreen { on, .. } => {
            if !target.accept_request(on) {
                return;
            }
            let partners = target.side_requests().to_vec();
            for partner in partners {
                if let Some(group) = groups.get_mut(partner.index()) {
                    group.mirror_request(on);
                }
            }
        }
        GroupMessage::MirrorRequest { on, .. } => target.mirror_request(on),
        GroupMessage::EndGreen { .. } => target.request_end_green(),
        GroupMessage::Permit { granted, .. } => target.set_permit(granted),
        GroupMessage::OwnLevel { level, .. } => target.set_own_level(level),
        GroupMessage::RaiseOtherLevel { level, .. } => target.raise_other_level(level),
        GroupMessage::ResetOtherLevel { .. } => target.reset_other_level(),
    }
}

/// Commit messages in order.
pub(crate) fn apply_all(groups: &mut [SignalGroup], messages: &[GroupMessage]) {
    for message in messages {
        apply(groups, *message);
    }
}
