use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trust status of a remote server.
///
/// The full lifecycle is `Pending -> SecretRequested -> Trusted`, with
/// `Failure` as the terminal state after retry exhaustion. All transition
/// rules live in [`TrustStatus::can_transition`]; callers that mutate a
/// server row must go through it rather than comparing statuses ad hoc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustStatus {
    /// The server was added by an administrator but no handshake has
    /// completed a round yet.
    Pending,
    /// An outbound secret request was delivered to the peer; waiting for
    /// its callback.
    SecretRequested,
    /// A shared secret has been committed for this server.
    Trusted,
    /// Negotiation retries were exhausted. Requires administrator
    /// intervention (remove and re-add, or an explicit retry).
    Failure,
}

impl TrustStatus {
    /// Stable wire/database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustStatus::Pending => "pending",
            TrustStatus::SecretRequested => "secret-requested",
            TrustStatus::Trusted => "trusted",
            TrustStatus::Failure => "failure",
        }
    }

    /// Whether a transition from `self` to `next` is permitted.
    ///
    /// Rules:
    /// - forward movement only: `Pending -> SecretRequested -> Trusted`
    /// - `Failure` is reachable from `Pending` and `SecretRequested`
    /// - `Failure -> Pending` is allowed (explicit administrator retry)
    /// - `Trusted` is absorbing: an established secret is never replaced
    ///   through a status write
    /// - self-transitions are allowed for the two in-flight states so a
    ///   repeated negotiation round is a no-op rather than an error
    pub fn can_transition(self, next: TrustStatus) -> bool {
        use TrustStatus::*;
        match (self, next) {
            (Pending, SecretRequested) => true,
            (Pending, Trusted) => true, // legacy direct-request path
            (SecretRequested, Trusted) => true,
            (Pending, Failure) | (SecretRequested, Failure) => true,
            (Failure, Pending) => true,
            (Pending, Pending) | (SecretRequested, SecretRequested) => true,
            (Trusted, _) => false,
            (Failure, _) => false,
            (SecretRequested, Pending) => false,
        }
    }

    /// Whether a shared secret may be committed from this state.
    pub fn negotiation_eligible(self) -> bool {
        matches!(self, TrustStatus::Pending | TrustStatus::SecretRequested)
    }
}

impl fmt::Display for TrustStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TrustStatus::Pending),
            "secret-requested" => Ok(TrustStatus::SecretRequested),
            "trusted" => Ok(TrustStatus::Trusted),
            "failure" => Ok(TrustStatus::Failure),
            other => Err(format!("unknown trust status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TrustStatus::*;

    const ALL: [TrustStatus; 4] = [Pending, SecretRequested, Trusted, Failure];

    #[test]
    fn forward_path_is_permitted() {
        assert!(Pending.can_transition(SecretRequested));
        assert!(SecretRequested.can_transition(Trusted));
        assert!(Pending.can_transition(Trusted));
    }

    #[test]
    fn trusted_is_absorbing() {
        for next in ALL {
            assert!(
                !Trusted.can_transition(next),
                "trusted must not transition to {next}"
            );
        }
    }

    #[test]
    fn failure_only_recovers_to_pending() {
        assert!(Failure.can_transition(Pending));
        assert!(!Failure.can_transition(SecretRequested));
        assert!(!Failure.can_transition(Trusted));
        assert!(!Failure.can_transition(Failure));
    }

    #[test]
    fn no_backward_movement() {
        assert!(!SecretRequested.can_transition(Pending));
        assert!(!Trusted.can_transition(SecretRequested));
    }

    #[test]
    fn round_trips_through_strings() {
        for status in ALL {
            let parsed: TrustStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<TrustStatus>().is_err());
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&SecretRequested).unwrap();
        assert_eq!(json, "\"secret-requested\"");
    }
}
