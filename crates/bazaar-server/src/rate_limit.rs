//! Per-user throttling of chat writes.
//!
//! Sends and typing updates draw from separate allowances, so a busy
//! typing indicator never uses up a user's message budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use bazaar_shared::types::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Send,
    Typing,
}

/// Sustained rate and burst size for one [`Action`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    pub per_sec: f64,
    pub burst: f64,
}

#[derive(Debug)]
struct Allowance {
    tokens: f64,
    updated: Instant,
}

impl Allowance {
    fn full(quota: Quota, now: Instant) -> Self {
        Self {
            tokens: quota.burst,
            updated: now,
        }
    }

    /// Spend one token, or report how long until one is earned.
    fn take(&mut self, quota: Quota, now: Instant) -> Result<(), Duration> {
        let earned = now.saturating_duration_since(self.updated).as_secs_f64() * quota.per_sec;
        self.tokens = (self.tokens + earned).min(quota.burst);
        self.updated = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let wait = (1.0 - self.tokens) / quota.per_sec;
        Err(Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX))
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    allowances: Arc<Mutex<HashMap<(UserId, Action), Allowance>>>,
    send: Quota,
    typing: Quota,
}

impl RateLimiter {
    pub fn new(send: Quota, typing: Quota) -> Self {
        Self {
            allowances: Arc::new(Mutex::new(HashMap::new())),
            send,
            typing,
        }
    }

    fn quota(&self, action: Action) -> Quota {
        match action {
            Action::Send => self.send,
            Action::Typing => self.typing,
        }
    }

    /// `Err` carries how long `user` must wait before retrying `action`.
    pub async fn acquire(&self, user: &UserId, action: Action) -> Result<(), Duration> {
        let quota = self.quota(action);
        let now = Instant::now();
        let mut allowances = self.allowances.lock().await;
        allowances
            .entry((user.clone(), action))
            .or_insert_with(|| Allowance::full(quota, now))
            .take(quota, now)
    }

    /// Forget allowances untouched for `max_idle`. A forgotten user starts
    /// again with a full burst, which they would have earned back anyway.
    pub async fn purge_idle(&self, max_idle: Duration) {
        let now = Instant::now();
        let mut allowances = self.allowances.lock().await;
        allowances.retain(|_, a| now.saturating_duration_since(a.updated) < max_idle);
    }
}
