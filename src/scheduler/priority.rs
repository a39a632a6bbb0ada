use serde::Serialize;

/// Known priority levels and the handling-time budget each one allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Priority {
    /// Level 0: no deadline.
    Routine,
    /// Level 1: loose deadline.
    Urgent,
    /// Level 2: tight deadline.
    Critical,
}

/// `(level, priority, budget in time units)`; `None` means unbounded.
const DEADLINE_TABLE: [(i32, Priority, Option<u64>); 3] = [
    (0, Priority::Routine, None),
    (1, Priority::Urgent, Some(30)),
    (2, Priority::Critical, Some(10)),
];

impl Priority {
    pub fn from_level(level: i32) -> Option<Self> {
        DEADLINE_TABLE
            .iter()
            .find(|(l, _, _)| *l == level)
            .map(|(_, p, _)| *p)
    }

    pub fn level(self) -> i32 {
        DEADLINE_TABLE
            .iter()
            .find(|(_, p, _)| *p == self)
            .map(|(l, _, _)| *l)
            .unwrap_or_default()
    }

    /// Maximum handling time, or `None` when the priority has no deadline.
    pub fn budget(self) -> Option<u64> {
        DEADLINE_TABLE
            .iter()
            .find(|(_, p, _)| *p == self)
            .and_then(|(_, _, b)| *b)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Routine => write!(f, "routine"),
            Priority::Urgent => write!(f, "urgent"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}
