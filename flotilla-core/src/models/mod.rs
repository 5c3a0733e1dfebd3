pub mod config_entry;
pub mod environment;
pub mod feature_flag;

pub use config_entry::ConfigEntry;
pub use environment::Environment;
pub use feature_flag::{FeatureFlagEntry, FlagEvaluation};
