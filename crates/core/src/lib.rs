pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod market;
pub mod traits;

pub use config::{AppConfig, EngineConfig, FeedConfig, PlansConfig, RebalanceConfig};
pub use config_loader::ConfigLoader;
pub use error::ExchangeError;
pub use events::{AccountUpdate, BookUpdate, StreamEvent};
pub use market::{
    decimals_from_step, Fill, Market, MarketRules, OrderBook, OrderFill, OrderRequest, OrderStatus,
    OrderType, PriceLevel, Side, TimeInForce,
};
pub use traits::{BookStream, ExchangeClient};
