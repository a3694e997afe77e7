//! Scheduling and the core-to-collaborator surface
//!
//! - `scheduler` - periodic jobs with per-job-type mutual exclusion and
//!   the asynchronous trigger entry points
//! - `tracker` - the small operation surface external collaborators (API
//!   layer, dashboards) call into

pub mod scheduler;
pub mod tracker;

pub use scheduler::Scheduler;
pub use tracker::Tracker;
