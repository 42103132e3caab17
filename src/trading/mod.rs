pub mod events;
pub mod portfolio;
pub mod trade_record;

pub use events::{Event, EventKind, EventLog};
pub use portfolio::{EntryMeta, Portfolio, Position, Rejection};
pub use trade_record::{Outcome, TradeJournal, TradeRecord};
