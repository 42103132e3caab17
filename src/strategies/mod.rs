pub mod addons;
pub mod confirmations;
pub mod context;
pub mod registry;
pub mod risk;
pub mod signals;
pub mod state_machine;
pub mod trouble;
pub mod zone;

pub use registry::ZoneRegistry;
pub use signals::{ExitReason, Signal, SignalKind};
pub use zone::{Zone, ZoneId, ZonePhase};
