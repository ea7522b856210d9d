//! DVB frontend boundary.
//!
//! The actual Linux-DVB ioctl plumbing lives outside this crate; what the
//! streaming engine needs from a tuner is small and is expressed as the
//! [`Frontend`] trait: a capability check, a retune-and-reconcile
//! operation, a handle to the DVR capture device, and teardown. The
//! [`tuning`] module carries the delivery-system sum type and the tuning
//! parameter enums with their SAT>IP token forms.

pub mod frontend;
pub mod tuning;

pub use frontend::{DvrDevice, DvrSource, Frontend, PidDelta, reconcile_pids};
pub use tuning::DeliverySystem;
