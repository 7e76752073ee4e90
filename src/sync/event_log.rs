//! Bounded history of dispatched widget events, dumped on request for bug reports

use std::collections::VecDeque;
use tracing::info;

use crate::player::{PlayerState, SlotId};
use crate::time::{format_timestamp, now, Timestamp};
use crate::widget::WidgetEvent;

const DEFAULT_CAPACITY: usize = 2_000;

#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub at: Timestamp,
    pub slot: SlotId,
    pub event: &'static str,
    /// State the player was in when the event arrived
    pub state: PlayerState,
    pub payload: Option<f64>,
}

#[derive(Debug)]
pub struct EventLog {
    records: VecDeque<EventRecord>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, slot: SlotId, event: &WidgetEvent, state: PlayerState) {
        let payload = match event {
            WidgetEvent::Seek { offset_secs } => Some(*offset_secs),
            WidgetEvent::Ready { duration_secs } => *duration_secs,
            _ => None,
        };
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(EventRecord {
            at: now(),
            slot,
            event: event.name(),
            state,
            payload,
        });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.records.iter()
    }

    /// Write every record to the log, one tab-separated line each
    pub fn dump(&self) {
        info!("Event log ({} entries):", self.len());
        for r in self.iter() {
            match r.payload {
                Some(payload) => info!(
                    "{}\t{}\t{}\t{}\t{}",
                    format_timestamp(r.at),
                    r.slot,
                    r.event,
                    r.state,
                    payload
                ),
                None => info!("{}\t{}\t{}\t{}", format_timestamp(r.at), r.slot, r.event, r.state),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_bounded() {
        let mut log = EventLog::with_capacity(2);
        log.record(SlotId(0), &WidgetEvent::Play, PlayerState::Paused);
        log.record(SlotId(1), &WidgetEvent::Seek { offset_secs: 4.0 }, PlayerState::SeekingPause);
        log.record(SlotId(0), &WidgetEvent::Pause, PlayerState::Playing);
        assert_eq!(log.len(), 2);

        let first = log.iter().next().unwrap();
        assert_eq!(first.slot, SlotId(1));
        assert_eq!(first.event, "seek");
        assert_eq!(first.payload, Some(4.0));
    }
}
