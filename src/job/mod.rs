//! Job queue & worker runtime (spec §4.7): an in-memory broker authoritative
//! for "in-flight" state, mirrored into the durable store by a throttled
//! writer, drained by a fixed pool of workers that each run the training
//! pipeline to completion or cooperative cancellation. Design Note §9: model
//! broker and mirror as two cooperating services behind one module boundary,
//! resolving divergence in favour of the durable store at worker startup.

pub mod broker;
pub mod mirror;
pub mod pipeline;
pub mod progress;
pub mod worker;

pub use broker::Broker;
