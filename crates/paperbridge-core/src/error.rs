use std::fmt;

/// Machine-readable error codes shared by the CLI, the webhook server and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    ConfigInvalid,
    DatasetMissing,
    DatasetMalformed,
    LedgerUnavailable,
    LockContention,
    AuthFailed,
    RemoteTransport,
    RemoteRejected,
    DeliveryExhausted,
    UnknownEventKind,
    MissingPaperId,
    NoMatchingIssue,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::ConfigInvalid => "E1002",
            Self::DatasetMissing => "E2001",
            Self::DatasetMalformed => "E2002",
            Self::LedgerUnavailable => "E3001",
            Self::LockContention => "E3002",
            Self::AuthFailed => "E4001",
            Self::RemoteTransport => "E4002",
            Self::RemoteRejected => "E4003",
            Self::DeliveryExhausted => "E4004",
            Self::UnknownEventKind => "E5001",
            Self::MissingPaperId => "E5002",
            Self::NoMatchingIssue => "E5003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::ConfigInvalid => "Invalid configuration value",
            Self::DatasetMissing => "Dataset file not found",
            Self::DatasetMalformed => "Dataset file is malformed",
            Self::LedgerUnavailable => "Delivery ledger unavailable",
            Self::LockContention => "Another sync pass holds the ledger lock",
            Self::AuthFailed => "Could not acquire a GitHub credential",
            Self::RemoteTransport => "GitHub request failed in transport",
            Self::RemoteRejected => "GitHub rejected the request",
            Self::DeliveryExhausted => "Issue creation retries exhausted",
            Self::UnknownEventKind => "Unknown event kind",
            Self::MissingPaperId => "Event has no paper_id",
            Self::NoMatchingIssue => "No open issue matches the paper_id",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in paperbridge.toml and retry."),
            Self::ConfigInvalid => {
                Some("Set GITHUB_REPO (owner/repo) or `repo` in paperbridge.toml.")
            }
            Self::DatasetMissing => Some("Check the `dataset` path or PAPERBRIDGE_DATASET."),
            Self::DatasetMalformed => {
                Some("Every row needs a non-empty paper_id; check the CSV header.")
            }
            Self::LedgerUnavailable => {
                Some("Check disk space and write permissions on the ledger.")
            }
            Self::LockContention => Some("Retry after the running sync pass finishes."),
            Self::AuthFailed => {
                Some("Verify GITHUB_APP_ID, GITHUB_INSTALLATION_ID and the private key.")
            }
            Self::RemoteTransport => Some("Retry once the network or GitHub recovers."),
            Self::RemoteRejected => None,
            Self::DeliveryExhausted => Some("The next sync pass will retry this record."),
            Self::UnknownEventKind => None,
            Self::MissingPaperId => None,
            Self::NoMatchingIssue => Some("Run a sync pass so the paper has an issue first."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    const ALL: [ErrorCode; 14] = [
        ErrorCode::ConfigParseError,
        ErrorCode::ConfigInvalid,
        ErrorCode::DatasetMissing,
        ErrorCode::DatasetMalformed,
        ErrorCode::LedgerUnavailable,
        ErrorCode::LockContention,
        ErrorCode::AuthFailed,
        ErrorCode::RemoteTransport,
        ErrorCode::RemoteRejected,
        ErrorCode::DeliveryExhausted,
        ErrorCode::UnknownEventKind,
        ErrorCode::MissingPaperId,
        ErrorCode::NoMatchingIssue,
        ErrorCode::InternalUnexpected,
    ];

    #[test]
    fn all_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ALL {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        for code in ALL {
            let raw = code.code();
            assert_eq!(raw.len(), 5);
            assert!(raw.starts_with('E'));
            assert!(raw.chars().skip(1).all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn display_matches_code() {
        assert_eq!(ErrorCode::NoMatchingIssue.to_string(), "E5003");
    }
}
