use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lw_bridge::Notification;
use lw_core::config::SchedulerConfig;
use lw_core::types::{DedupKey, Issue, Severity};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Severities that are pushed to the user. Low and info stay passive.
const ACTIVE: [Severity; 3] = [Severity::Critical, Severity::High, Severity::Medium];

/// What happened to an issue handed to [`NotificationScheduler::enqueue_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Critical and not in a rapid-change window: flush as soon as possible.
    Urgent,
    Queued,
    /// Low or info, only visible through [`NotificationScheduler::pending`].
    Passive,
    /// Same finding already queued or shown within the dedup window.
    Suppressed,
}

#[derive(Debug, Default)]
pub struct Flush {
    pub notifications: Vec<Notification>,
    /// Queued issues dropped at flush time because they were shown recently.
    pub suppressed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShownRecord {
    pub summary: String,
    pub severity: Severity,
    pub file: String,
    pub issue_count: usize,
    pub shown_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    pub queued: BTreeMap<Severity, usize>,
    pub total_queued: usize,
    pub user_idle: bool,
    pub rapid_change: bool,
    pub shown: u64,
    pub suppressed: u64,
}

struct Entry {
    issue: Issue,
    enqueued_at: Instant,
}

/// Decides when queued issues reach the user.
///
/// Criticals go out on the next flush unless files are changing rapidly.
/// High and medium wait for the user to be idle and are capped per flush.
/// Three or more issues for one file within the batch window collapse into
/// a single batch notification. The same finding is never shown twice within
/// the dedup window.
///
/// All time-dependent methods have an `_at` variant taking the current
/// instant explicitly.
pub struct NotificationScheduler {
    config: SchedulerConfig,
    queues: BTreeMap<Severity, VecDeque<Entry>>,
    passive: VecDeque<Issue>,
    recently_shown: HashMap<DedupKey, Instant>,
    history: VecDeque<ShownRecord>,
    changes: VecDeque<Instant>,
    last_activity: Instant,
    last_flush: Option<Instant>,
    shown_total: u64,
    suppressed_total: u64,
}

impl NotificationScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::new_at(config, Instant::now())
    }

    pub fn new_at(config: SchedulerConfig, now: Instant) -> Self {
        Self {
            config,
            queues: ACTIVE.iter().map(|s| (*s, VecDeque::new())).collect(),
            passive: VecDeque::new(),
            recently_shown: HashMap::new(),
            history: VecDeque::new(),
            changes: VecDeque::new(),
            last_activity: now,
            last_flush: None,
            shown_total: 0,
            suppressed_total: 0,
        }
    }

    pub fn enqueue(&mut self, issue: Issue) -> EnqueueOutcome {
        self.enqueue_at(issue, Instant::now())
    }

    pub fn enqueue_at(&mut self, issue: Issue, now: Instant) -> EnqueueOutcome {
        let key = issue.dedup_key(self.config.dedup_prefix_chars);
        if self.shown_recently(&key, now) || self.is_queued(&key) {
            self.suppressed_total += 1;
            debug!(
                issue_type = %issue.issue_type,
                file = %issue.file,
                severity = %issue.severity,
                "duplicate notification suppressed"
            );
            return EnqueueOutcome::Suppressed;
        }

        let capacity = self.config.passive_queue_capacity;
        if issue.severity.is_passive() {
            if self.passive.len() >= capacity {
                self.passive.pop_front();
            }
            self.passive.push_back(issue);
            return EnqueueOutcome::Passive;
        }

        let urgent = issue.severity == Severity::Critical && !self.rapid_change_at(now);
        let queue = self.queues.entry(issue.severity).or_default();
        if queue.len() >= capacity {
            if let Some(dropped) = queue.pop_front() {
                warn!(
                    severity = %dropped.issue.severity,
                    file = %dropped.issue.file,
                    "notification queue full, oldest entry dropped"
                );
            }
        }
        queue.push_back(Entry {
            issue,
            enqueued_at: now,
        });
        if urgent {
            EnqueueOutcome::Urgent
        } else {
            EnqueueOutcome::Queued
        }
    }

    /// A file change. Counts toward rapid-change detection and as activity.
    pub fn record_change_at(&mut self, now: Instant) {
        self.changes.push_back(now);
        self.prune_changes(now);
        self.last_activity = now;
    }

    pub fn record_change(&mut self) {
        self.record_change_at(Instant::now());
    }

    pub fn mark_activity_at(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn mark_activity(&mut self) {
        self.mark_activity_at(Instant::now());
    }

    pub fn is_idle_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity)
            >= Duration::from_secs(self.config.idle_threshold_secs)
    }

    pub fn rapid_change_at(&self, now: Instant) -> bool {
        let window = Duration::from_secs(self.config.rapid_change_window_secs);
        let recent = self
            .changes
            .iter()
            .filter(|t| now.saturating_duration_since(**t) <= window)
            .count();
        recent >= self.config.rapid_change_threshold
    }

    pub fn flush(&mut self) -> Flush {
        self.flush_at(Instant::now())
    }

    /// Run one flush cycle. A cycle that shows something starts the flush
    /// debounce; cycles inside it return nothing.
    pub fn flush_at(&mut self, now: Instant) -> Flush {
        let mut flush = Flush::default();
        if let Some(last) = self.last_flush {
            if now.saturating_duration_since(last) < Duration::from_millis(self.config.flush_debounce_ms) {
                return flush;
            }
        }

        self.prune_shown(now);
        self.prune_changes(now);
        let rapid = self.rapid_change_at(now);
        let idle = self.is_idle_at(now);

        for severity in ACTIVE {
            let (allowed, limit) = match severity {
                Severity::Critical => (!rapid, usize::MAX),
                Severity::High => (idle, self.config.max_high_per_flush),
                _ => (idle, self.config.max_medium_per_flush),
            };
            if !allowed {
                continue;
            }
            let entries: Vec<Entry> = match self.queues.get_mut(&severity) {
                Some(queue) if !queue.is_empty() => queue.drain(..).collect(),
                _ => continue,
            };

            let mut fresh = Vec::with_capacity(entries.len());
            for entry in entries {
                let key = entry.issue.dedup_key(self.config.dedup_prefix_chars);
                if self.shown_recently(&key, now) {
                    flush.suppressed += 1;
                    self.suppressed_total += 1;
                    debug!(file = %entry.issue.file, issue_type = %entry.issue.issue_type,
                        "queued notification suppressed as duplicate");
                } else {
                    fresh.push(entry);
                }
            }

            let mut held = VecDeque::new();
            let mut delivered = 0usize;
            for group in self.group(fresh, now) {
                if delivered >= limit {
                    held.extend(group);
                    continue;
                }
                delivered += 1;
                let notification = self.deliver(group, now);
                flush.notifications.push(notification);
            }
            if let Some(queue) = self.queues.get_mut(&severity) {
                held.extend(queue.drain(..));
                *queue = held;
            }
        }

        if !flush.notifications.is_empty() {
            self.last_flush = Some(now);
        }
        flush
    }

    /// Split entries into delivery groups, keeping arrival order. Entries
    /// for a file with at least `batch_threshold` arrivals inside the batch
    /// window share one group.
    fn group(&self, entries: Vec<Entry>, now: Instant) -> Vec<Vec<Entry>> {
        let window = Duration::from_secs(self.config.batch_window_secs);
        let in_window = |e: &Entry| now.saturating_duration_since(e.enqueued_at) <= window;

        let mut per_file: HashMap<String, usize> = HashMap::new();
        for entry in entries.iter().filter(|e| in_window(e)) {
            *per_file.entry(entry.issue.file.clone()).or_default() += 1;
        }

        let mut groups: Vec<Vec<Entry>> = Vec::new();
        let mut batch_slot: HashMap<String, usize> = HashMap::new();
        for entry in entries {
            let batchable = in_window(&entry)
                && per_file.get(&entry.issue.file).copied().unwrap_or(0) >= self.config.batch_threshold;
            if !batchable {
                groups.push(vec![entry]);
                continue;
            }
            match batch_slot.get(&entry.issue.file) {
                Some(&slot) => groups[slot].push(entry),
                None => {
                    batch_slot.insert(entry.issue.file.clone(), groups.len());
                    groups.push(vec![entry]);
                }
            }
        }
        groups
    }

    fn deliver(&mut self, group: Vec<Entry>, now: Instant) -> Notification {
        let mut issues: Vec<Issue> = group.into_iter().map(|e| e.issue).collect();
        for issue in &issues {
            self.recently_shown
                .insert(issue.dedup_key(self.config.dedup_prefix_chars), now);
        }
        let notification = if issues.len() == 1 {
            Notification::Single {
                issue: issues.remove(0),
            }
        } else {
            Notification::Batch {
                file: issues[0].file.clone(),
                issues,
            }
        };

        self.shown_total += 1;
        let record = ShownRecord {
            summary: notification.summary(),
            severity: notification.severity(),
            file: notification.file().to_string(),
            issue_count: notification.issues().len(),
            shown_at: Utc::now(),
        };
        info!(severity = %record.severity, issues = record.issue_count, "{}", record.summary);
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(record);
        notification
    }

    /// Queued issues at least as severe as `min_severity`, most severe first.
    /// This is the only way low and info issues are ever surfaced.
    pub fn pending(&self, min_severity: Severity) -> Vec<Issue> {
        let mut issues: Vec<Issue> = self
            .queues
            .values()
            .flat_map(|q| q.iter().map(|e| e.issue.clone()))
            .chain(self.passive.iter().cloned())
            .filter(|i| i.severity <= min_severity)
            .collect();
        issues.sort_by(|a, b| a.severity.cmp(&b.severity).then(a.created_at.cmp(&b.created_at)));
        issues
    }

    /// Up to `limit` most recent shown notifications, oldest first.
    pub fn history(&self, limit: usize) -> Vec<ShownRecord> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn status_at(&self, now: Instant) -> SchedulerStatus {
        let mut queued: BTreeMap<Severity, usize> =
            self.queues.iter().map(|(s, q)| (*s, q.len())).collect();
        for issue in &self.passive {
            *queued.entry(issue.severity).or_default() += 1;
        }
        SchedulerStatus {
            total_queued: queued.values().sum(),
            queued,
            user_idle: self.is_idle_at(now),
            rapid_change: self.rapid_change_at(now),
            shown: self.shown_total,
            suppressed: self.suppressed_total,
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status_at(Instant::now())
    }

    fn shown_recently(&self, key: &DedupKey, now: Instant) -> bool {
        let window = Duration::from_secs(self.config.dedup_window_secs);
        self.recently_shown
            .get(key)
            .is_some_and(|at| now.saturating_duration_since(*at) < window)
    }

    fn is_queued(&self, key: &DedupKey) -> bool {
        let prefix = self.config.dedup_prefix_chars;
        self.queues
            .values()
            .flatten()
            .any(|e| &e.issue.dedup_key(prefix) == key)
            || self.passive.iter().any(|i| &i.dedup_key(prefix) == key)
    }

    fn prune_shown(&mut self, now: Instant) {
        let window = Duration::from_secs(self.config.dedup_window_secs);
        self.recently_shown
            .retain(|_, at| now.saturating_duration_since(*at) < window);
    }

    fn prune_changes(&mut self, now: Instant) {
        let window = Duration::from_secs(self.config.rapid_change_window_secs);
        while let Some(front) = self.changes.front() {
            if now.saturating_duration_since(*front) > window {
                self.changes.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lw_core::types::IssueType;

    fn issue(sev: Severity, file: &str, msg: &str) -> Issue {
        Issue::new(IssueType::RuntimeError, sev, file, msg)
    }

    #[test]
    fn rapid_change_needs_threshold_inside_window() {
        let t0 = Instant::now();
        let mut s = NotificationScheduler::new_at(SchedulerConfig::default(), t0);
        for i in 0..4 {
            s.record_change_at(t0 + Duration::from_secs(i));
        }
        assert!(!s.rapid_change_at(t0 + Duration::from_secs(4)));
        s.record_change_at(t0 + Duration::from_secs(4));
        assert!(s.rapid_change_at(t0 + Duration::from_secs(4)));
        assert!(!s.rapid_change_at(t0 + Duration::from_secs(30)));
    }

    #[test]
    fn duplicate_while_queued_is_suppressed() {
        let t0 = Instant::now();
        let mut s = NotificationScheduler::new_at(SchedulerConfig::default(), t0);
        assert_eq!(s.enqueue_at(issue(Severity::High, "a.js", "boom"), t0), EnqueueOutcome::Queued);
        assert_eq!(
            s.enqueue_at(issue(Severity::High, "a.js", "boom"), t0),
            EnqueueOutcome::Suppressed
        );
        assert_eq!(s.status_at(t0).suppressed, 1);
    }

    #[test]
    fn grouping_ignores_entries_outside_batch_window() {
        let t0 = Instant::now();
        let mut s = NotificationScheduler::new_at(SchedulerConfig::default(), t0);
        s.enqueue_at(issue(Severity::Critical, "a.js", "one"), t0);
        let later = t0 + Duration::from_secs(120);
        s.enqueue_at(issue(Severity::Critical, "a.js", "two"), later);
        s.enqueue_at(issue(Severity::Critical, "a.js", "three"), later);

        let flush = s.flush_at(later);
        assert_eq!(flush.notifications.len(), 3);
        assert!(flush
            .notifications
            .iter()
            .all(|n| matches!(n, Notification::Single { .. })));
    }
}
