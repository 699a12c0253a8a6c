pub mod clock;
pub mod error;
pub mod events;
pub mod model;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{SeatingError, SeatingResult};
pub use events::{EventSink, NoopEventSink};
pub use model::{HoldStatus, PriceQuote, PriceSource, PricingStrategyKind, SeatHold, SeatKey, SessionId};
pub use store::{AcquireOutcome, ConfirmOutcome, HoldStore, RateLimitStore, ReleaseOutcome, SeatState};
