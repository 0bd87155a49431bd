use std::fmt;

/// This candidate's role, derived from the latest candidate set snapshot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RoleState {
    /// No resolution has completed on the current session
    #[default]
    Unknown,
    /// This candidate holds the smallest ordinal
    Leader,
    /// Another candidate leads; `predecessor` is the record being watched
    Follower { predecessor: String },
}

impl RoleState {
    pub fn is_leader(&self) -> bool {
        matches!(self, RoleState::Leader)
    }

    pub fn predecessor(&self) -> Option<&str> {
        match self {
            RoleState::Follower { predecessor } => Some(predecessor),
            _ => None,
        }
    }
}

impl fmt::Display for RoleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleState::Unknown => f.write_str("unknown"),
            RoleState::Leader => f.write_str("leader"),
            RoleState::Follower { predecessor } => write!(f, "follower of {}", predecessor),
        }
    }
}
