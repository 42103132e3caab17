use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Bias, Direction, SyncMode, Timeframe};
use crate::strategies::confirmations::ConfirmationKind;
use crate::strategies::signals::{BreakevenTrigger, ExitReason};
use crate::strategies::state_machine::DeferReason;
use crate::strategies::zone::{InvalidationReason, ZoneId};
use crate::trading::portfolio::Rejection;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    BiasUpdated {
        timeframe: Timeframe,
        bias: Bias,
    },
    SyncUpdated {
        mode: SyncMode,
    },
    ZoneRegistered {
        direction: Direction,
        top: f64,
        bottom: f64,
        strength: f64,
    },
    ZoneRejected {
        timeframe: Timeframe,
        direction: Direction,
        top: f64,
        bottom: f64,
    },
    Tapped,
    ConfirmationAccepted {
        confirmation: ConfirmationKind,
        count: usize,
    },
    Ready {
        count: usize,
    },
    EntryDeferred {
        reason: DeferReason,
    },
    Invalidated {
        reason: InvalidationReason,
    },
    Entered {
        trade_id: u64,
        price: f64,
        size: f64,
        stop: f64,
        target: f64,
    },
    EntryRejected {
        rejection: Rejection,
    },
    Exited {
        trade_id: u64,
        reason: ExitReason,
        price: f64,
        pnl: f64,
    },
    BreakevenMoved {
        trigger: BreakevenTrigger,
        stop: f64,
    },
    StopModified {
        stop: f64,
    },
    AddOnOpened {
        child: ZoneId,
        trade_id: u64,
    },
    AddOnRejected {
        child: ZoneId,
        rejection: Rejection,
    },
}

/// One audit record. `bar_index` is on the execution timeframe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub bar_index: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<ZoneId>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Append-only lifecycle and audit stream.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        bar_index: usize,
        timestamp: DateTime<Utc>,
        zone_id: Option<ZoneId>,
        kind: EventKind,
    ) {
        self.events.push(Event {
            bar_index,
            timestamp,
            zone_id,
            kind,
        });
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn as_slice(&self) -> &[Event] {
        &self.events
    }

    /// Events for one zone, oldest first.
    pub fn for_zone<'a>(&'a self, id: &'a ZoneId) -> impl Iterator<Item = &'a Event> + 'a {
        self.events.iter().filter(move |e| e.zone_id.as_ref() == Some(id))
    }

    pub fn count(&self, pred: impl Fn(&EventKind) -> bool) -> usize {
        self.events.iter().filter(|e| pred(&e.kind)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::base_time;

    #[test]
    fn events_serialize_flat_with_tag() {
        let mut log = EventLog::new();
        let id = ZoneId::new(Timeframe::M15, Direction::Long, 101.0, 100.0, 6);
        log.push(3, base_time(), Some(id), EventKind::Ready { count: 5 });
        log.push(4, base_time(), None, EventKind::SyncUpdated { mode: SyncMode::Aligned });

        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json[0]["event"], "ready");
        assert_eq!(json[0]["count"], 5);
        assert!(json[1].get("zone_id").is_none());
        assert_eq!(log.for_zone(&id).count(), 1);
        assert_eq!(log.count(|k| matches!(k, EventKind::Ready { .. })), 1);
    }
}
