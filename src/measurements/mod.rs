//! Measurement drivers.
//!
//! One driver per test type. All drivers talk to the instruments through
//! [`crate::scpi::ScpiDevice`] handles, so they run unmodified against
//! either real hardware or mocks.

pub mod lte;
pub mod nr5g;
pub mod spur_search;
pub mod stn;
pub mod waveform;

pub use lte::LteDriver;
pub use nr5g::Nr5gDriver;
pub use spur_search::SpurSearchDriver;
pub use stn::{marker_stats, StnDriver};
pub use waveform::Standard;
