pub mod financial;
pub mod response;
pub mod settings;
pub mod signal;
pub mod stock;
