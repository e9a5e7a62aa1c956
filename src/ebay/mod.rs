pub mod config;
pub mod mapping;
pub mod request;
pub mod response;
pub mod trading;

pub use config::{ListingDefaults, TradingConfig};
pub use mapping::{ListingFieldNormalizer, MappingError, MappingTables};
pub use request::MarketplaceRequestBuilder;
pub use response::parse_response;
pub use trading::{TradingApi, TradingClient};
