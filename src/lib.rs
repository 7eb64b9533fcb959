pub mod algorithms;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod key_generator;
pub mod middleware;
pub mod rate_spec;
pub mod response;
pub mod server;
pub mod store;
pub mod throttle_config;
pub mod throttler;

pub use algorithms::{AlgorithmId, DecisionResult, FixedWindow, ThrottleAlgorithm};
pub use config::Config;
pub use error::{ThrottleError, ThrottleResult};
pub use key_generator::{KeyGenerator, KeyStrategy};
pub use middleware::{throttle_middleware, ThrottleLayer, ThrottleState};
pub use rate_spec::RateSpec;
pub use server::create_app;
pub use store::{CounterStore, MemoryStore, RedisStore};
pub use throttle_config::{FailurePolicy, ThrottleConfig, ThrottleOverrides, ThrottleSettings};
pub use throttler::{Decision, Throttle, ThrottleBuilder};
