//! Input sanitization, prompt-injection screening, and rate limiting.
//!
//! Three independent guards applied before user text reaches rendering or a
//! model prompt: HTML entity escaping for anything interpolated into markup,
//! signature-based injection screening for anything forwarded to a model,
//! and a sliding-window rate limiter keyed by caller-chosen strings.

use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Escape characters with meaning in HTML so user text renders inertly.
///
/// Escapes exactly once: feeding already-escaped output back in escapes the
/// ampersands of the existing entities. Callers sanitize at the render
/// boundary, not on storage.
pub fn sanitize_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            '`' => out.push_str("&#x60;"),
            '=' => out.push_str("&#x3D;"),
            _ => out.push(c),
        }
    }
    out
}

/// Aggregate risk from the number of distinct threats found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    None,
    Low,
    High,
}

/// Outcome of screening one piece of text.
#[derive(Debug, Clone)]
pub struct InjectionReport {
    pub safe: bool,
    pub threats: Vec<String>,
    pub risk: RiskLevel,
}

// Pattern source strings paired with the threat label reported on match.
// All patterns are case-insensitive.
const SIGNATURES: &[(&str, &str)] = &[
    (
        r"(?i)ignore\s+(all\s+)?(previous|prior|above)\s+(instructions|prompts|rules)",
        "instruction override",
    ),
    (
        r"(?i)disregard\s+(all\s+)?(previous|prior|your)\s+(instructions|prompts|rules|guidelines)",
        "instruction override",
    ),
    (
        r"(?i)you\s+are\s+now\s+(a|an|the)\s+",
        "role hijack",
    ),
    (
        r"(?i)pretend\s+(to\s+be|you\s+are)",
        "role hijack",
    ),
    (
        r"(?i)(reveal|show|print|repeat)\s+(your\s+)?(system\s+prompt|initial\s+instructions|hidden\s+instructions)",
        "system prompt extraction",
    ),
    (
        r"(?i)\b(DAN|jailbreak|developer\s+mode)\b",
        "jailbreak",
    ),
    (
        r"(?i)<\s*(script|iframe|object|embed)\b",
        "markup injection",
    ),
    (
        r"(?i)\b(union\s+select|drop\s+table|insert\s+into|delete\s+from)\b",
        "sql keywords",
    ),
    (
        r"\{\{.*\}\}|\$\{.*\}",
        "template injection",
    ),
];

// Long unbroken base64 runs suggest smuggled payloads.
const BASE64_PATTERN: &str = r"[A-Za-z0-9+/]{48,}={0,2}";

// Structural characters beyond this count suggest markup/code smuggling.
const STRUCTURAL_CHAR_THRESHOLD: usize = 20;

/// Signature-based prompt-injection screen.
///
/// Detection is advisory: the report feeds logging and risk display, it does
/// not block by itself. Patterns are compiled once at construction.
pub struct InjectionDetector {
    signatures: Vec<(Regex, &'static str)>,
    base64: Option<Regex>,
}

impl Default for InjectionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl InjectionDetector {
    pub fn new() -> Self {
        let signatures = SIGNATURES
            .iter()
            .filter_map(|(pattern, label)| Regex::new(pattern).ok().map(|re| (re, *label)))
            .collect();
        Self {
            signatures,
            base64: Regex::new(BASE64_PATTERN).ok(),
        }
    }

    /// Screen `input`, reporting each distinct threat class at most once.
    pub fn screen(&self, input: &str) -> InjectionReport {
        let mut threats: Vec<String> = Vec::new();

        for (pattern, label) in &self.signatures {
            if pattern.is_match(input) && !threats.iter().any(|t| t == label) {
                threats.push((*label).to_string());
            }
        }

        let structural = input
            .chars()
            .filter(|c| matches!(c, '<' | '>' | '{' | '}' | '[' | ']'))
            .count();
        if structural > STRUCTURAL_CHAR_THRESHOLD {
            threats.push("excessive structural characters".to_string());
        }

        if self.base64.as_ref().is_some_and(|re| re.is_match(input)) {
            threats.push("base64 payload".to_string());
        }

        let risk = match threats.len() {
            0 => RiskLevel::None,
            1 | 2 => RiskLevel::Low,
            _ => RiskLevel::High,
        };
        if risk > RiskLevel::None {
            debug!(?risk, threats = ?threats, "input flagged by injection screen");
        }

        InjectionReport {
            safe: threats.is_empty(),
            threats,
            risk,
        }
    }
}

/// Verdict from [`RateLimiter::check`].
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Attempts left in the current window after this decision.
    pub remaining: u32,
    /// When the oldest recorded attempt falls out of the window.
    pub reset_at: Instant,
    pub limit: u32,
}

// Fraction of checks that trigger a sweep of fully-expired keys.
const CLEANUP_PROBABILITY: f64 = 0.01;

/// Sliding-window rate limiter keyed by arbitrary strings.
///
/// Rejected attempts are not recorded, so hammering a limited key does not
/// push the reset time further out.
pub struct RateLimiter {
    windows: DashMap<String, Vec<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Record an attempt for `key` if it fits within `limit` attempts per
    /// `window`, and report the decision either way.
    pub fn check(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision {
        let now = Instant::now();
        let decision = {
            let mut attempts = self.windows.entry(key.to_string()).or_default();
            attempts.retain(|at| now.duration_since(*at) < window);

            let count = attempts.len() as u32;
            let allowed = count < limit;
            if allowed {
                attempts.push(now);
            }
            let reset_at = attempts.first().map(|at| *at + window).unwrap_or(now);
            RateLimitDecision {
                allowed,
                remaining: limit.saturating_sub(count + u32::from(allowed)),
                reset_at,
                limit,
            }
        };

        if !decision.allowed {
            warn!(key, limit, "rate limit exceeded");
        }

        // Sampled sweep keeps abandoned keys from accumulating.
        if rand::thread_rng().gen_bool(CLEANUP_PROBABILITY) {
            self.windows
                .retain(|_, attempts| attempts.iter().any(|at| now.duration_since(*at) < window));
        }

        decision
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Drop all recorded attempts for `key`.
    pub fn clear(&self, key: &str) {
        self.windows.remove(key);
    }
}
