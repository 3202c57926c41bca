//! Windowed pattern detection over one correlation-key group.
//!
//! Windows are anchored on events: a candidate window starts at an event's
//! timestamp and spans the rule's `time_window_minutes`. The earliest
//! qualifying window wins, and the next candidate must start after it ends,
//! so windows reported for one key never overlap. Anchoring on event
//! timestamps keeps `window_start` stable across runs over the same data.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use vigil_core::model::{CorrelationPattern, SecurityEvent};

/// One qualifying window and the events that make up its chain.
#[derive(Debug, Clone)]
pub struct WindowMatch<'a> {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub events: Vec<&'a SecurityEvent>,
}

/// Find all non-overlapping qualifying windows in `events`, which must be
/// sorted by timestamp.
pub fn find_windows<'a>(
    pattern: &CorrelationPattern,
    window: Duration,
    events: &[&'a SecurityEvent],
) -> Vec<WindowMatch<'a>> {
    let mut matches = Vec::new();
    let mut i = 0;
    while i < events.len() {
        let start = events[i].timestamp;
        let end = start + window;
        let upper = i + events[i..].partition_point(|e| e.timestamp <= end);
        let candidate = &events[i..upper];

        match qualify(pattern, candidate) {
            Some(chain) => {
                matches.push(WindowMatch {
                    window_start: start,
                    window_end: end,
                    events: chain,
                });
                i = upper;
            }
            None => i += 1,
        }
    }
    matches
}

/// The event chain if `candidate` (anchored on its first event) satisfies the pattern.
fn qualify<'a>(
    pattern: &CorrelationPattern,
    candidate: &[&'a SecurityEvent],
) -> Option<Vec<&'a SecurityEvent>> {
    match pattern {
        CorrelationPattern::Threshold { count } => {
            (candidate.len() >= *count).then(|| candidate.to_vec())
        }
        CorrelationPattern::Sequence { event_types } => match_sequence(event_types, candidate),
        CorrelationPattern::Aggregation { min_events } => {
            (candidate.len() >= *min_events && distinct_sources(candidate) >= 2)
                .then(|| candidate.to_vec())
        }
        CorrelationPattern::MultiSource { min_sources } => {
            (distinct_sources(candidate) >= *min_sources).then(|| candidate.to_vec())
        }
    }
}

/// Greedy in-order match of `event_types`. The anchor event must be the first
/// step so the window starts where the sequence does.
fn match_sequence<'a>(
    event_types: &[String],
    candidate: &[&'a SecurityEvent],
) -> Option<Vec<&'a SecurityEvent>> {
    let (first, rest) = event_types.split_first()?;
    let (anchor, tail) = candidate.split_first()?;
    if &anchor.event_type != first {
        return None;
    }

    let mut chain = vec![*anchor];
    let mut wanted = rest.iter().peekable();
    for event in tail {
        match wanted.peek() {
            Some(next) if **next == event.event_type => {
                chain.push(*event);
                wanted.next();
            }
            Some(_) => {}
            None => break,
        }
    }
    wanted.peek().is_none().then_some(chain)
}

fn distinct_sources(events: &[&SecurityEvent]) -> usize {
    events
        .iter()
        .map(|e| e.source.as_str())
        .collect::<BTreeSet<_>>()
        .len()
}
