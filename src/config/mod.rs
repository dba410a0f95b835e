pub mod settings;

pub use settings::{ProviderConfig, ProviderKind, ServerConfig, Settings, SettlementSettings};
