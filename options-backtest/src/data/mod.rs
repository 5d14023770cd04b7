pub mod loader;
pub mod synthetic;
pub mod types;

pub use loader::{validate_series, LoaderError, SnapshotFormat, SnapshotLoader};
pub use synthetic::SyntheticSeries;
pub use types::{Greeks, MarketSnapshot, OptionType};
