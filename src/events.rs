//! Event logging for the allocation pipeline.
//!
//! Every compiled unit carries an [`EventLog`] capturing what the pipeline did:
//! passes run, critical edges split, registers assigned, intervals split and
//! spilled, moves inserted. Events can be inspected in tests and tooling or
//! safely ignored.
//!
//! # Example
//!
//! ```rust
//! use linscan::events::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::IntervalSpilled)
//!     .at_position(24)
//!     .message("v3 spilled to slot 0");
//! log.info("starting linear scan");
//!
//! assert_eq!(log.count_kind(EventKind::IntervalSpilled), 1);
//! assert_eq!(log.summary(), "1 interval spilled");
//! ```

use std::{collections::HashMap, fmt, time::Duration};

use crate::utils::graph::NodeId;

/// Categories of events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A block was inserted on a critical edge.
    EdgeSplit,
    /// A live interval was created for a value, temp or fixed register.
    IntervalCreated,
    /// An interval was given a register.
    RegisterAssigned,
    /// An interval was split into two siblings.
    IntervalSplit,
    /// An interval was left without a register.
    IntervalSpilled,
    /// A new spill slot was appended to one of the typed pools.
    SpillSlotAllocated,
    /// A move was added to a parallel move.
    MoveInserted,

    /// A pipeline pass started.
    PassStarted,
    /// A pipeline pass completed.
    PassCompleted,

    /// Informational message.
    Info,
    /// Warning (something unexpected but recoverable).
    Warning,
    /// Error (something failed).
    Error,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::EdgeSplit => "edge split",
            Self::IntervalCreated => "interval created",
            Self::RegisterAssigned => "register assigned",
            Self::IntervalSplit => "interval split",
            Self::IntervalSpilled => "interval spilled",
            Self::SpillSlotAllocated => "spill slot allocated",
            Self::MoveInserted => "move inserted",
            Self::PassStarted => "pass started",
            Self::PassCompleted => "pass completed",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Returns true if this event changed the program or its allocation.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::EdgeSplit
                | Self::IntervalSplit
                | Self::IntervalSpilled
                | Self::SpillSlotAllocated
                | Self::MoveInserted
        )
    }

    /// Returns true if this is a diagnostic event.
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Info | Self::Warning | Self::Error)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// The block the event concerns, if any.
    pub block: Option<NodeId>,
    /// The lifetime position the event concerns, if any.
    pub position: Option<usize>,
    /// Human-readable description.
    pub message: String,
    /// The pass that emitted the event, if any.
    pub pass: Option<&'static str>,
}

impl Event {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            block: None,
            position: None,
            message: message.into(),
            pass: None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(position) = self.position {
            write!(f, " @{position}")?;
        }
        write!(f, " {}", self.message)
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is added to the log when the
/// builder is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    block: Option<NodeId>,
    position: Option<usize>,
    message: Option<String>,
    pass: Option<&'static str>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            block: None,
            position: None,
            message: None,
            pass: None,
        }
    }

    /// Sets the block the event concerns.
    pub fn block(mut self, block: NodeId) -> Self {
        self.block = Some(block);
        self
    }

    /// Sets the lifetime position the event concerns.
    pub fn at_position(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    /// Sets a custom message describing the event.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Associates this event with a pass.
    pub fn pass(mut self, pass_name: &'static str) -> Self {
        self.pass = Some(pass_name);
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        self.log.events.push(Event {
            kind: self.kind,
            block: self.block.take(),
            position: self.position.take(),
            message,
            pass: self.pass.take(),
        });
    }
}

/// Append-only collection of events.
///
/// Backed by `boxcar::Vec`, so events can be appended through a shared
/// reference; the log of one unit can be merged into an aggregate log from
/// several worker threads.
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let new_log = Self::new();
        new_log.merge_ref(self);
        new_log
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts building a new event of the given kind.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Info, message));
    }

    /// Records a warning message.
    pub fn warn(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Warning, message));
    }

    /// Records an error message.
    pub fn error(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Error, message));
    }

    /// Appends copies of every event of `other`.
    pub fn merge_ref(&self, other: &EventLog) {
        for (_, event) in &other.events {
            self.events.push(event.clone());
        }
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.iter().any(|e| e.kind == kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.filter_kind(kind).count()
    }

    /// Returns an iterator over all events in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Returns an iterator over events of a specific kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// Returns an iterator over warning events.
    pub fn warnings(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Warning)
    }

    /// Returns an iterator over error events.
    pub fn errors(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Error)
    }

    /// Counts events grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for event in self.iter() {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Generates a human-readable summary of the transformation events.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut parts: Vec<String> = self
            .count_by_kind()
            .iter()
            .filter(|(k, _)| k.is_transformation())
            .map(|(kind, count)| format!("{count} {kind}"))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

/// Statistics derived from an [`EventLog`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedStats {
    /// Number of blocks inserted on critical edges.
    pub edges_split: usize,
    /// Number of intervals created.
    pub intervals: usize,
    /// Number of register assignments.
    pub registers_assigned: usize,
    /// Number of interval splits.
    pub splits: usize,
    /// Number of intervals left without a register.
    pub spills: usize,
    /// Number of spill slots allocated.
    pub spill_slots: usize,
    /// Number of moves inserted.
    pub moves: usize,
    /// Number of warnings.
    pub warnings: usize,
    /// Number of errors.
    pub errors: usize,
    /// Processing time.
    pub total_time: Duration,
}

impl DerivedStats {
    /// Computes statistics from an event log.
    #[must_use]
    pub fn from_log(log: &EventLog) -> Self {
        let counts = log.count_by_kind();
        let get = |kind: EventKind| counts.get(&kind).copied().unwrap_or(0);

        Self {
            edges_split: get(EventKind::EdgeSplit),
            intervals: get(EventKind::IntervalCreated),
            registers_assigned: get(EventKind::RegisterAssigned),
            splits: get(EventKind::IntervalSplit),
            spills: get(EventKind::IntervalSpilled),
            spill_slots: get(EventKind::SpillSlotAllocated),
            moves: get(EventKind::MoveInserted),
            warnings: get(EventKind::Warning),
            errors: get(EventKind::Error),
            total_time: Duration::ZERO,
        }
    }

    /// Sets the total processing time.
    #[must_use]
    pub fn with_time(mut self, time: Duration) -> Self {
        self.total_time = time;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder_records_on_drop() {
        let log = EventLog::new();
        log.record(EventKind::IntervalSplit)
            .block(NodeId::new(2))
            .at_position(17)
            .pass("linear-scan");

        let event = log.iter().next().cloned();
        let Some(event) = event else {
            panic!("event was not recorded");
        };
        assert_eq!(event.kind, EventKind::IntervalSplit);
        assert_eq!(event.block, Some(NodeId::new(2)));
        assert_eq!(event.message, "interval split");
        assert_eq!(event.to_string(), "[interval split] @17 interval split");
    }

    #[test]
    fn test_summary_counts_transformations_only() {
        let log = EventLog::new();
        log.record(EventKind::MoveInserted);
        log.record(EventKind::MoveInserted);
        log.record(EventKind::IntervalSpilled);
        log.info("ignored in summary");

        assert_eq!(log.summary(), "1 interval spilled, 2 move inserted");
        assert_eq!(EventLog::new().summary(), "no events");
    }

    #[test]
    fn test_merge_and_stats() {
        let a = EventLog::new();
        a.record(EventKind::EdgeSplit);
        a.warn("odd");
        let b = EventLog::new();
        b.merge_ref(&a);
        b.merge_ref(&a.clone());

        let stats = DerivedStats::from_log(&b);
        assert_eq!(stats.edges_split, 2);
        assert_eq!(stats.warnings, 2);
        assert_eq!(b.warnings().count(), 2);
        assert!(b.has(EventKind::EdgeSplit));
        assert!(!b.has(EventKind::Error));
    }
}
