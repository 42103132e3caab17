pub mod annotations;
pub mod annotator;
pub mod gaps;
pub mod liquidity;
pub mod orderblocks;
pub mod structure;
