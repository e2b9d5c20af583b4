//! Delivery guards: idempotency, debouncing, and content deduplication.
//!
//! The three guards protect against different failure modes and are checked
//! independently: idempotency is keyed by delivery identity ("this exact
//! delivery already happened"), debouncing by event rate ("too many events
//! from one source"), deduplication by content ("this exact unit of work
//! was already requested, whatever its delivery id").

pub mod debounce;
pub mod dedup;
pub mod idempotency;

pub use debounce::DebounceCoordinator;
pub use dedup::DedupGuard;
pub use idempotency::IdempotencyGuard;
