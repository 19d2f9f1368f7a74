use std::time::{Duration, Instant};

/// A fixed point in time after which an operation must give up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    deadline: Instant,
}

/// Stand-in for budgets too large to represent as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

impl Deadline {
    /// Budgets past what the clock can represent are capped at [`FAR_FUTURE`].
    pub fn after(budget: Duration) -> Self {
        let started = Instant::now();
        let deadline = started
            .checked_add(budget)
            .or_else(|| started.checked_add(FAR_FUTURE))
            .unwrap_or(started);
        Self { started, deadline }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn budget(&self) -> Duration {
        self.deadline - self.started
    }
}

/// Format a timestamp as an RFC 7231 IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn http_date(at: chrono::DateTime<chrono::Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn http_date_now() -> String {
    http_date(chrono::Utc::now())
}
