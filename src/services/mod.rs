pub mod assembler;
pub mod batch_fetcher;
pub mod eps_quality;
pub mod episodic_pivot;
pub mod homepage;
pub mod market_data;
pub mod normalizer;
pub mod scrape;
pub mod session;
pub mod snapshot_page;
pub mod stock_quality;
pub mod tabular;
pub mod theme_rotation;
pub mod transport;
