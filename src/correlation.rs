//! Correlation id for cross-log tracing.
//!
//! One id per browsing session, lazily generated and replaceable at
//! navigation boundaries. Coarse-grained by design: this is session-level
//! correlation, not distributed tracing.

use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct CorrelationContext {
    id: Mutex<Option<String>>,
}

impl CorrelationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lazily create and memoize the session id.
    pub fn get(&self) -> String {
        let mut slot = self.id.lock().expect("correlation mutex poisoned");
        slot.get_or_insert_with(generate).clone()
    }

    /// Force a fresh id (e.g. when the user navigates to a new page).
    pub fn reset(&self) -> String {
        let fresh = generate();
        *self.id.lock().expect("correlation mutex poisoned") = Some(fresh.clone());
        fresh
    }
}

fn generate() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("req-{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
}
