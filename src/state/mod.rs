//! Lifecycle and queue state definitions
//!
//! This module defines the crawler's process-wide lifecycle state machine
//! and the per-URL queue states persisted in the database.

use std::fmt;

/// Process-wide lifecycle state of the crawl engine
///
/// Transitions: `Idle -> Running -> {Paused <-> Running} -> Stopping -> Stopped`.
/// `start()` is legal from `Idle` and from `Stopped`; a start from
/// `Stopped` begins a fresh run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlerState {
    /// Engine created, never started
    Idle,

    /// Workers are actively draining the frontier
    Running,

    /// Workers block before their next dequeue; in-flight fetches complete
    Paused,

    /// Shutdown requested; workers drain and exit
    Stopping,

    /// All workers joined, stores flushed
    Stopped,
}

impl CrawlerState {
    /// Returns true if the engine can accept a `start()` call in this state
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }

    /// Returns true if this is the terminal state of a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Returns true if workers should keep dequeuing
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl fmt::Display for CrawlerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// State of a URL in the durable `url_queue` table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueState {
    /// Waiting to be picked up by a worker
    Queued,

    /// Claimed by a worker, fetch in progress
    Processing,

    /// Fetched and stored successfully
    Done,

    /// Gave up on this URL (fetch/parse/store failure past the retry budget)
    Failed,
}

impl QueueState {
    /// Converts the queue state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Parses a queue state from its database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible queue states
    pub fn all_states() -> Vec<Self> {
        vec![Self::Queued, Self::Processing, Self::Done, Self::Failed]
    }

    /// Returns true if no further processing will happen for this URL
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
