pub mod aggregator;
pub mod position_fetcher;
pub mod price_oracle;
pub mod retry;
pub mod roster;
