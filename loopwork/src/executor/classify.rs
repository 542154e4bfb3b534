//! Output classification (§4.5): case-insensitive substring matching on the
//! last 2 KiB of combined subprocess output, plus the exit code.

use std::time::Duration;

/// Window, from the end of the combined output, the classifier inspects.
const CLASSIFY_WINDOW: usize = 2 * 1024;

const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "rate-limited", "http 429", "429 too many requests"];
const QUOTA_MARKERS: &[&str] = &["quota exceeded", "quota exhausted", "usage limit reached", "billing hard limit"];

/// Default backoff applied on a detected rate-limit marker.
pub const RATE_LIMIT_SLEEP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success,
    RateLimited { retry_after: Duration },
    QuotaExhausted,
    Failure(String),
}

/// Classify a subprocess's combined output and exit code.
pub fn classify_output(combined_output: &str, exit_code: Option<i32>) -> Classification {
    let byte_start = combined_output.len().saturating_sub(CLASSIFY_WINDOW);
    let tail_start = (byte_start..=combined_output.len()).find(|&i| combined_output.is_char_boundary(i)).unwrap_or(combined_output.len());
    let tail = combined_output[tail_start..].to_lowercase();

    if RATE_LIMIT_MARKERS.iter().any(|m| tail.contains(m)) {
        return Classification::RateLimited { retry_after: RATE_LIMIT_SLEEP };
    }
    if QUOTA_MARKERS.iter().any(|m| tail.contains(m)) {
        return Classification::QuotaExhausted;
    }
    match exit_code {
        Some(0) => Classification::Success,
        Some(code) => Classification::Failure(format!("exit code {code}")),
        None => Classification::Failure("process did not report an exit code".to_string()),
    }
}
