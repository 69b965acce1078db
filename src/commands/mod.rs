pub mod market_cmd;
