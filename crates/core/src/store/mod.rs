pub mod coverage;
pub mod error;
pub mod port;
