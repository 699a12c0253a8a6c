pub mod manager;
pub mod session;
pub mod sweeper;

pub use manager::{
    BatchConfirmResult, BatchHoldResult, BatchReleaseResult, HoldConfig, HoldManager,
    SeatAvailability, SeatFailure,
};
pub use session::SessionTracker;
pub use sweeper::spawn_sweeper;
