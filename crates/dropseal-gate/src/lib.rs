//! dropseal-gate: the server half of the unlock-proof protocol
//!
//! A client proves knowledge of the bundle passphrase by sending an unlock
//! proof; the gate rate-limits the attempt, checks the proof against the
//! stored verifier in constant time, and on success issues a short-lived
//! access token. The passphrase itself never reaches the server.

pub mod gate;
pub mod legacy;
pub mod rate_limit;
pub mod token;

pub use gate::{generate_server_secret, load_server_secret, spawn_evictor, UnlockGate};
pub use rate_limit::{AttemptKey, AttemptStore, Decision, MemoryAttemptStore, RateLimitPolicy};
pub use token::TokenSigner;
