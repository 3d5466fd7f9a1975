// ── In-memory device state ──
//
// `StatusCache` keeps the latest document per device and owns the
// callback registry that pushes changes to consumers.

mod cache;
mod registry;

pub use cache::{StatusCache, StatusRecord};
pub use registry::Listener;
