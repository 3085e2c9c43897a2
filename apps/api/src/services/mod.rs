//! Downstream services: the registry of known services, their circuit
//! breakers, background health probing, and the gateway that invokes learning
//! modules through those breakers.

pub mod circuit_breaker;
pub mod gateway;
pub mod handlers;
pub mod probe;
pub mod registry;

/// Registry name of the explanation backend. Always registered so its
/// breaker guards explanation calls even when it has no probe endpoint.
pub const LLM_SERVICE: &str = "llm";
