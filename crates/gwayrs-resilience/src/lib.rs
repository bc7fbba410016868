pub mod balancer;
pub mod breaker;
pub mod gate;
pub mod memory_gate;

#[cfg(feature = "redis-backend")]
pub mod redis_gate;

pub use balancer::{Balancer, BalancerError, Lottery, Rotor};
pub use breaker::CircuitBreaker;
pub use gate::{Gate, GateError};
pub use memory_gate::MemoryGate;

#[cfg(feature = "redis-backend")]
pub use redis_gate::RedisGate;
