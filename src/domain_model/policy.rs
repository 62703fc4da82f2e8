/// What an operation does when the store is unreachable: degrade to a
/// permissive default, or surface the outage to the caller.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FailPolicy {
    FailOpen,
    FailClosed,
}

/// The public operation set of this subsystem. Each operation carries an
/// explicit fail policy instead of leaving the open/closed split to
/// convention at call sites.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Operation {
    Blacklist,
    IsBlacklisted,
    IssueRefreshToken,
    ValidateRefreshToken,
    RotateRefreshToken,
    RevokeRefreshToken,
    RevokeAllRefreshTokens,
    ListSessions,
    RecordFailedLogin,
    ClearFailedLogins,
    IsAccountLocked,
}

impl Operation {
    /// Reads that gate access fail closed so an outage is never mistaken
    /// for an invalid credential. Best-effort writes and defense-in-depth
    /// checks fail open so the store never becomes an availability outage
    /// of its own.
    pub const fn fail_policy(self) -> FailPolicy {
        match self {
            Operation::IssueRefreshToken
            | Operation::ValidateRefreshToken
            | Operation::RotateRefreshToken
            | Operation::ListSessions => FailPolicy::FailClosed,
            Operation::Blacklist
            | Operation::IsBlacklisted
            | Operation::RevokeRefreshToken
            | Operation::RevokeAllRefreshTokens
            | Operation::RecordFailedLogin
            | Operation::ClearFailedLogins
            | Operation::IsAccountLocked => FailPolicy::FailOpen,
        }
    }
}
