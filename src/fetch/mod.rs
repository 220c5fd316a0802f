//! Direct upstream access: admission control, request coalescing, and the
//! pass-through path that combines them.

pub mod admission;
pub mod coalescer;
pub mod direct;

pub use admission::RateCounter;
pub use coalescer::FetchCoalescer;
pub use direct::DirectFetcher;
