pub mod index;
pub mod record;
pub mod series_store;
