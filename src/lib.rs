// chargestream - workspace facade
//
// Re-exports the pieces embedders and integration tests reach for.

pub use chargestream_config::RuntimeConfig;
pub use chargestream_server::run_with_config;
