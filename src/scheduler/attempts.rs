//! Persisted exponential-backoff timers.
//!
//! An [`AttemptManager`] owns the timing of one attempt series (card polling,
//! dismissal retry). It carries no business logic: when the timer fires it
//! calls its [`DueSink`] with the series name and the owner decides what an
//! attempt means.
//!
//! The state lives in the store under `attempt:<series>` so that a restarted
//! process can re-arm the timer with [`AttemptManager::restore`].

use crate::clock::Clock;
use crate::error::Result;
use crate::store::{self, KeyValueStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Called with the series name whenever an attempt is due.
pub type DueSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Delay bounds of one attempt series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay armed by [`AttemptManager::start`] without an explicit value.
    pub initial_delay_secs: u64,
    /// Upper bound for doubled delays, and the re-fire period once due.
    pub max_delay_secs: u64,
}

impl BackoffPolicy {
    /// Create a policy with the given bounds.
    pub fn new(initial_delay_secs: u64, max_delay_secs: u64) -> Self {
        Self {
            initial_delay_secs,
            max_delay_secs,
        }
    }

    /// Delay to arm after an attempt that started with `current_secs`.
    pub fn next_delay(&self, current_secs: u64) -> u64 {
        if current_secs == 0 {
            return self.initial_delay_secs.min(self.max_delay_secs);
        }
        current_secs.saturating_mul(2).min(self.max_delay_secs)
    }
}

/// Persisted timing state of one series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttemptState {
    /// Whether the series is armed.
    pub is_active: bool,
    /// Delay of the currently armed attempt.
    pub current_delay_seconds: u64,
    /// When the armed attempt fires (epoch ms).
    pub scheduled_at_epoch_ms: u64,
}

/// Exponential-backoff timer for one named attempt series.
pub struct AttemptManager {
    name: String,
    policy: BackoffPolicy,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    on_due: DueSink,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for AttemptManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttemptManager")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl AttemptManager {
    /// Create a manager for the series `name`. Nothing is armed until
    /// [`start`](Self::start), [`plan_for_next`](Self::plan_for_next) or
    /// [`restore`](Self::restore) is called.
    pub fn new(
        name: impl Into<String>,
        policy: BackoffPolicy,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        on_due: DueSink,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            store,
            clock,
            on_due,
            timer: Mutex::new(None),
        }
    }

    /// Series name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delay bounds of this series.
    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Store key holding this series' [`AttemptState`].
    pub fn storage_key(&self) -> String {
        format!("attempt:{}", self.name)
    }

    /// (Re)start the series with `initial_delay_secs`, or the policy's initial
    /// delay when `None` or zero.
    pub async fn start(&self, initial_delay_secs: Option<u64>) -> Result<()> {
        let delay = initial_delay_secs
            .filter(|&secs| secs > 0)
            .unwrap_or(self.policy.initial_delay_secs);
        info!(series = %self.name, delay_secs = delay, "attempt series started");
        self.arm_and_save(delay).await
    }

    /// Mark that an attempt has begun and pre-arm the retry.
    ///
    /// The armed delay doubles (capped at the policy maximum). Callers override
    /// the retry on success with [`start`](Self::start) or
    /// [`stop`](Self::stop). Returns the armed delay in seconds.
    pub async fn plan_for_next(&self) -> Result<u64> {
        let state = self.state().await?;
        let delay = self.policy.next_delay(state.current_delay_seconds);
        debug!(
            series = %self.name,
            previous_secs = state.current_delay_seconds,
            delay_secs = delay,
            "planning next attempt"
        );
        self.arm_and_save(delay).await?;
        Ok(delay)
    }

    /// Deactivate the series and cancel its timer.
    pub async fn stop(&self) -> Result<()> {
        self.disarm();
        let mut state = self.state().await?;
        if !state.is_active {
            return Ok(());
        }
        state.is_active = false;
        self.save(&state).await?;
        info!(series = %self.name, "attempt series stopped");
        Ok(())
    }

    /// Re-arm the timer from persisted state after a restart.
    ///
    /// An overdue attempt fires right away. Returns whether the series was
    /// active.
    pub async fn restore(&self) -> Result<bool> {
        let state = self.state().await?;
        if !state.is_active {
            debug!(series = %self.name, "attempt series inactive; nothing to restore");
            return Ok(false);
        }

        let now = self.clock.now_epoch_millis();
        let remaining_ms = state.scheduled_at_epoch_ms.saturating_sub(now);
        info!(series = %self.name, remaining_ms, "restoring attempt timer");
        self.arm(Duration::from_millis(remaining_ms));
        Ok(true)
    }

    /// Cancel the in-process timer, leaving persisted state untouched.
    pub fn shutdown(&self) {
        self.disarm();
    }

    /// Persisted state of this series.
    pub async fn state(&self) -> Result<AttemptState> {
        let key = self.storage_key();
        let items = self.store.get(&[key.as_str()]).await?;
        Ok(store::decode_or_default(&items, &key))
    }

    /// Returns `true` if the series is active.
    pub async fn is_running(&self) -> Result<bool> {
        Ok(self.state().await?.is_active)
    }

    async fn arm_and_save(&self, delay_secs: u64) -> Result<()> {
        let now = self.clock.now_epoch_millis();
        let state = AttemptState {
            is_active: true,
            current_delay_seconds: delay_secs,
            scheduled_at_epoch_ms: now.saturating_add(delay_secs.saturating_mul(1000)),
        };
        self.arm(Duration::from_secs(delay_secs));
        self.save(&state).await
    }

    async fn save(&self, state: &AttemptState) -> Result<()> {
        self.store
            .set(store::record_of(&self.storage_key(), state)?)
            .await
    }

    fn arm(&self, delay: Duration) {
        let name = self.name.clone();
        let on_due = Arc::clone(&self.on_due);
        let period = Duration::from_secs(self.policy.max_delay_secs.max(1));

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            loop {
                debug!(series = %name, "attempt due");
                on_due(&name);
                tokio::time::sleep(period).await;
            }
        });

        let previous = self
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn disarm(&self) {
        let previous = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl Drop for AttemptManager {
    fn drop(&mut self) {
        self.disarm();
    }
}
