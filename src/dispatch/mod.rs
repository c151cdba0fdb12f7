//! Dispatcher: rate limiter + priority queue + circuit breaker in front of
//! the reasoning service.

mod breaker;
mod dispatcher;
mod limiter;
mod queue;
mod ticket;

pub use breaker::{CircuitBreaker, CircuitPhase};
pub use dispatcher::{DispatchError, Dispatcher};
pub use limiter::RateLimiter;
pub use queue::PriorityQueue;
pub use ticket::{DispatchTicket, Priority};
