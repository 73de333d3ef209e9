pub mod booking;
pub mod conflict;
pub mod lifecycle;
pub mod transaction;

pub use booking::BookingService;
pub use conflict::ConflictDetectionService;
pub use lifecycle::AppointmentLifecycleService;
pub use transaction::BookingTransactionService;
