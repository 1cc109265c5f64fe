//! Categorized, bounded diagnostic log.
//!
//! Every entry is also emitted as a `tracing` event under
//! `sweetspot::<category>`, so the same lines reach the console and the
//! telemetry stream.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Sensor,
    Tracking,
    Audio,
    General,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Sensor,
        Category::Tracking,
        Category::Audio,
        Category::General,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticEntry {
    /// Log-wide, strictly increasing.
    pub id: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub category: Category,
    pub severity: Severity,
    pub message: String,
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

macro_rules! emit {
    ($severity:expr, $target:literal, $message:expr) => {
        match $severity {
            Severity::Info => tracing::info!(target: $target, "{}", $message),
            Severity::Warn => tracing::warn!(target: $target, "{}", $message),
            Severity::Error => tracing::error!(target: $target, "{}", $message),
        }
    };
}

#[derive(Debug)]
pub struct DiagnosticLog {
    capacity: usize,
    next_id: AtomicU64,
    categories: [Mutex<VecDeque<DiagnosticEntry>>; 4],
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            next_id: AtomicU64::new(1),
            categories: std::array::from_fn(|_| Mutex::new(VecDeque::with_capacity(capacity))),
        }
    }

    pub fn record(&self, category: Category, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match category {
            Category::Sensor => emit!(severity, "sweetspot::sensor", message),
            Category::Tracking => emit!(severity, "sweetspot::tracking", message),
            Category::Audio => emit!(severity, "sweetspot::audio", message),
            Category::General => emit!(severity, "sweetspot::general", message),
        }

        let entry = DiagnosticEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            timestamp_ms: unix_millis(),
            category,
            severity,
            message,
        };

        let mut entries = self.categories[category.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn info(&self, category: Category, message: impl Into<String>) {
        self.record(category, Severity::Info, message);
    }

    pub fn warn(&self, category: Category, message: impl Into<String>) {
        self.record(category, Severity::Warn, message);
    }

    pub fn error(&self, category: Category, message: impl Into<String>) {
        self.record(category, Severity::Error, message);
    }

    /// Retained entries of one category, oldest first.
    pub fn entries(&self, category: Category) -> Vec<DiagnosticEntry> {
        self.categories[category.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Retained entries of every category with `id > after`, in id order.
    pub fn entries_since(&self, after: u64) -> Vec<DiagnosticEntry> {
        let mut out: Vec<DiagnosticEntry> = Category::ALL
            .iter()
            .flat_map(|&c| self.entries(c))
            .filter(|e| e.id > after)
            .collect();
        out.sort_by_key(|e| e.id);
        out
    }
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(crate::defaults::DIAGNOSTIC_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_are_kept_per_category() {
        let log = DiagnosticLog::new(10);
        log.info(Category::Sensor, "connected");
        log.warn(Category::Audio, "underrun");
        log.error(Category::Sensor, "read failed");

        let sensor = log.entries(Category::Sensor);
        assert_eq!(sensor.len(), 2);
        assert_eq!(sensor[0].message, "connected");
        assert_eq!(sensor[1].severity, Severity::Error);
        assert_eq!(log.entries(Category::Audio).len(), 1);
        assert!(log.entries(Category::Tracking).is_empty());
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let log = DiagnosticLog::new(3);
        for i in 0..5 {
            log.info(Category::General, format!("line {}", i));
        }
        let messages: Vec<String> = log
            .entries(Category::General)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_entries_since_merges_categories_in_order() {
        let log = DiagnosticLog::new(10);
        log.info(Category::Tracking, "a");
        log.info(Category::Sensor, "b");
        log.info(Category::Tracking, "c");

        let all = log.entries_since(0);
        let messages: Vec<&str> = all.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["a", "b", "c"]);

        let later = log.entries_since(all[0].id);
        assert_eq!(later.len(), 2);
        assert!(log.entries_since(all[2].id).is_empty());
    }

    #[test]
    fn test_default_capacity() {
        let log = DiagnosticLog::default();
        for i in 0..150 {
            log.info(Category::Audio, format!("{}", i));
        }
        assert_eq!(log.entries(Category::Audio).len(), 100);
    }

    #[test]
    fn test_timestamps_are_set() {
        let log = DiagnosticLog::new(1);
        log.info(Category::General, "x");
        assert!(log.entries(Category::General)[0].timestamp_ms > 0);
    }
}
