//! Main phases and the ring order they are scanned in.

use serde::Serialize;

use crate::group::GroupId;

/// A set of mutually non-conflicting groups served together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MainPhase {
    /// 1-based position in the ring.
    pub number: usize,
    /// Member groups in group order.
    pub groups: Vec<GroupId>,
}

impl MainPhase {
    /// Build phase `index` (0-based) from a row of 0/1 cells.
    pub fn from_row(index: usize, row: &[u8]) -> Self {
        Self {
            number: index.saturating_add(1),
            groups: row
                .iter()
                .enumerate()
                .filter(|(_, cell)| **cell == 1)
                .map(|(column, _)| GroupId::new(column))
                .collect(),
        }
    }

    /// Whether `group` is a member.
    pub fn contains(&self, group: GroupId) -> bool {
        self.groups.contains(&group)
    }

    /// The row of 0/1 cells over `group_count` groups.
    pub fn to_row(&self, group_count: usize) -> Vec<u8> {
        (0..group_count)
            .map(|column| u8::from(self.contains(GroupId::new(column))))
            .collect()
    }
}

/// Phase indices in scan order: `current`, the phases after it, then the
/// phases before it.
///
/// With no current phase the scan starts at the first phase.
pub fn ring_order(len: usize, current: Option<usize>) -> Vec<usize> {
    let start = current.filter(|&c| c < len).unwrap_or(0);
    (start..len).chain(0..start).collect()
}
