//! Verdict classification rules
//!
//! Priority order, checked top to bottom:
//! 1. 401 with the fixed invalidation message or a strong-invalid keyword
//!    → `Invalidated` (the credential is dead, first match wins)
//! 2. 401 with a suspect keyword, or a 401 with no recognized phrase at all
//!    → `Unauthorized`
//! 3. 2xx → `Usable`
//! 4. 400 → `Usable` with the status normalized to 200: the Codex responses
//!    endpoint rejects the synthetic probe payload with 400 only after the
//!    credential has been accepted, so a 400 proves the token works
//! 5. 429 → `QuotaLimited`
//! 6. anything else → `ProbeFailed` with the literal status in the reason

/// The full invalidation message CLIProxyAPI relays for a revoked Codex token.
const INVALIDATED_TEXT: &str =
    "401 Your authentication token has been invalidated. Please try signing in again.";

/// Body phrases on a 401 that confirm the token is dead.
///
/// Checked in order; the first match wins and is cited in the reason.
const STRONG_INVALID_KEYWORDS: &[&str] = &[
    "authentication token has been invalidated",
    "please try signing in again",
    "invalid_token",
    "token is invalid",
    "token has expired",
];

/// Body phrases on a 401 that suggest, but don't confirm, invalidation.
const SUSPECT_INVALID_KEYWORDS: &[&str] = &["invalid credentials", "unauthorized"];

/// Validity verdict for a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Probe went through; the credential works
    Usable,
    /// 401 with a confirmed invalidation phrase
    Invalidated,
    /// 401 without a confirmed invalidation phrase
    Unauthorized,
    /// 429 from the downstream endpoint
    QuotaLimited,
    /// Any other status, including 0 (no response received)
    ProbeFailed,
}

impl Verdict {
    /// Whether this verdict marks the credential as a deletion candidate.
    pub fn is_invalid(self) -> bool {
        matches!(self, Verdict::Invalidated | Verdict::Unauthorized)
    }

    /// Status label for snapshots and logging.
    pub fn label(self) -> &'static str {
        match self {
            Verdict::Usable => "usable",
            Verdict::Invalidated => "invalidated",
            Verdict::Unauthorized => "unauthorized",
            Verdict::QuotaLimited => "quota-limited",
            Verdict::ProbeFailed => "probe-failed",
        }
    }
}

/// Result of classifying one probe response.
///
/// Transient: consumed to update a registry entry, never stored as-is.
/// `status_code` is normally the observed HTTP status; the 400-means-reachable
/// rule rewrites it to 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationOutcome {
    pub verdict: Verdict,
    pub status_code: u16,
    pub reason: String,
    pub body: String,
}

/// Classify a probe response into a validity verdict.
///
/// Pure and deterministic. `status_code` of 0 means the probe produced no
/// HTTP response at all (the gateway reports that separately as a transport
/// failure; a 0 arriving here is classified `ProbeFailed` with "status
/// unknown").
pub fn classify(status_code: u16, body: &str) -> ClassificationOutcome {
    if status_code == 401 {
        return classify_401(body);
    }

    let (verdict, status_code, reason) = if (200..300).contains(&status_code) {
        (Verdict::Usable, status_code, "probe ok".to_string())
    } else if status_code == 400 {
        (Verdict::Usable, 200, "reachable".to_string())
    } else if status_code == 429 {
        (Verdict::QuotaLimited, 429, "quota/rate limited".to_string())
    } else if status_code == 0 {
        (Verdict::ProbeFailed, 0, "status unknown".to_string())
    } else {
        (
            Verdict::ProbeFailed,
            status_code,
            format!("non-2xx ({status_code})"),
        )
    };

    ClassificationOutcome {
        verdict,
        status_code,
        reason,
        body: body.to_string(),
    }
}

/// Classify a 401 body against the invalidation phrase tables.
fn classify_401(body: &str) -> ClassificationOutcome {
    let lower = body.to_lowercase();

    if lower.contains(&INVALIDATED_TEXT.to_lowercase()) {
        return ClassificationOutcome {
            verdict: Verdict::Invalidated,
            status_code: 401,
            reason: INVALIDATED_TEXT.to_string(),
            body: body.to_string(),
        };
    }

    for keyword in STRONG_INVALID_KEYWORDS {
        if lower.contains(keyword) {
            return ClassificationOutcome {
                verdict: Verdict::Invalidated,
                status_code: 401,
                reason: format!("401 matched strong invalid keyword: {keyword}"),
                body: body.to_string(),
            };
        }
    }

    for keyword in SUSPECT_INVALID_KEYWORDS {
        if lower.contains(keyword) {
            return ClassificationOutcome {
                verdict: Verdict::Unauthorized,
                status_code: 401,
                reason: format!("401 matched suspect keyword: {keyword}"),
                body: body.to_string(),
            };
        }
    }

    ClassificationOutcome {
        verdict: Verdict::Unauthorized,
        status_code: 401,
        reason: "401 with no recognized invalidation phrase".to_string(),
        body: body.to_string(),
    }
}
