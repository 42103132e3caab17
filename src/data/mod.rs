pub mod loader;
pub mod store;

pub use loader::load_candles;
pub use store::TimeframeStore;
