//! Session-wide failure budgets.
//!
//! Each failure class has its own ceiling and its own counter; counters are
//! reset independently (one class) or together (after a success or a terminal
//! failure).

use std::collections::HashMap;
use std::fmt;

use super::events::Progress;
use crate::config::ScraperConfig;

/// Failure classes tracked per session rather than per identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    ConnectTimeout,
    ReadTimeout,
    ConnectionError,
    ChunkedEncoding,
}

impl FailureKind {
    pub const ALL: [FailureKind; 4] = [
        FailureKind::ConnectTimeout,
        FailureKind::ReadTimeout,
        FailureKind::ConnectionError,
        FailureKind::ChunkedEncoding,
    ];
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::ConnectTimeout => "connect timeout",
            FailureKind::ReadTimeout => "read timeout",
            FailureKind::ConnectionError => "connection error",
            FailureKind::ChunkedEncoding => "chunked encoding error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
struct Budget {
    count: u32,
    ceiling: u32,
}

#[derive(Debug, Clone)]
pub struct FailureCounters {
    budgets: HashMap<FailureKind, Budget>,
}

impl FailureCounters {
    pub fn new<I>(ceilings: I) -> Self
    where
        I: IntoIterator<Item = (FailureKind, u32)>,
    {
        let mut budgets: HashMap<FailureKind, Budget> = FailureKind::ALL
            .iter()
            .map(|kind| (*kind, Budget { count: 0, ceiling: 1 }))
            .collect();
        for (kind, ceiling) in ceilings {
            budgets.insert(
                kind,
                Budget {
                    count: 0,
                    ceiling: ceiling.max(1),
                },
            );
        }
        Self { budgets }
    }

    pub fn from_config(config: &ScraperConfig) -> Self {
        Self::new([
            (FailureKind::ConnectTimeout, config.max_connect_timeouts),
            (FailureKind::ReadTimeout, config.max_read_timeouts),
            (FailureKind::ConnectionError, config.max_connection_errors),
            (FailureKind::ChunkedEncoding, config.max_chunked_encoding_errors),
        ])
    }

    /// Count one failure and report progress against the ceiling.
    pub fn record(&mut self, kind: FailureKind) -> Progress {
        let budget = self.budget_mut(kind);
        budget.count = budget.count.saturating_add(1);
        Progress::new(budget.count, budget.ceiling)
    }

    pub fn count(&self, kind: FailureKind) -> u32 {
        self.budgets.get(&kind).map(|budget| budget.count).unwrap_or(0)
    }

    pub fn ceiling(&self, kind: FailureKind) -> u32 {
        self.budgets.get(&kind).map(|budget| budget.ceiling).unwrap_or(1)
    }

    pub fn reset(&mut self, kind: FailureKind) {
        self.budget_mut(kind).count = 0;
    }

    pub fn reset_all(&mut self) {
        for budget in self.budgets.values_mut() {
            budget.count = 0;
        }
    }

    fn budget_mut(&mut self, kind: FailureKind) -> &mut Budget {
        self.budgets
            .entry(kind)
            .or_insert(Budget { count: 0, ceiling: 1 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_each_kind_independently() {
        let mut counters = FailureCounters::new([
            (FailureKind::ReadTimeout, 3),
            (FailureKind::ConnectionError, 2),
        ]);

        assert_eq!(counters.record(FailureKind::ReadTimeout).to_string(), "1/3");
        assert_eq!(counters.record(FailureKind::ConnectionError).to_string(), "1/2");
        assert_eq!(counters.record(FailureKind::ReadTimeout).to_string(), "2/3");

        counters.reset(FailureKind::ReadTimeout);
        assert_eq!(counters.count(FailureKind::ReadTimeout), 0);
        assert_eq!(counters.count(FailureKind::ConnectionError), 1);
        assert!(counters.record(FailureKind::ConnectionError).is_exhausted());

        counters.reset_all();
        assert!(FailureKind::ALL.iter().all(|kind| counters.count(*kind) == 0));
    }

    #[test]
    fn ceilings_come_from_config() {
        let config = ScraperConfig {
            max_read_timeouts: 5,
            max_chunked_encoding_errors: 0,
            ..ScraperConfig::default()
        };
        let counters = FailureCounters::from_config(&config);
        assert_eq!(counters.ceiling(FailureKind::ReadTimeout), 5);
        assert_eq!(counters.ceiling(FailureKind::ChunkedEncoding), 1);
    }
}
