pub mod assembler;
pub mod classifier;
pub mod config;
pub mod error;
pub mod http_client;
pub mod lifecycle;
pub mod model;
pub mod normalizer;
pub mod scheduler;
pub mod session;
pub mod stream;
pub mod telemetry;
pub mod transport;
#[cfg(test)]
pub mod test_util;
