//! Computerized adaptive testing
//!
//! Maximum-information item selection with content balancing and
//! Sympson-Hetter exposure control, driven by a per-session state machine.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod exposure;
pub mod selector;
pub mod session;

pub use exposure::{ExposureControl, ExposureSnapshot, ItemExposureStats};
pub use selector::{select_next, Selection};
pub use session::{precision_percentage, CatSession, SessionState, StoppingReason, ThetaSnapshot};
