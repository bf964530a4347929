//! Transaction lifecycle states and isolation levels.

/// Two-phase-locking lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Acquiring locks; no lock has been released yet.
    Growing,
    /// At least one lock was released; acquisition is restricted.
    Shrinking,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Growing => write!(f, "Growing"),
            Self::Shrinking => write!(f, "Shrinking"),
            Self::Committed => write!(f, "Committed"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadUncommitted => write!(f, "ReadUncommitted"),
            Self::ReadCommitted => write!(f, "ReadCommitted"),
            Self::RepeatableRead => write!(f, "RepeatableRead"),
        }
    }
}
