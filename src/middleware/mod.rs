pub mod admission;

// Re-export middleware functions
pub use admission::{AdmissionSlot, admission_middleware};
