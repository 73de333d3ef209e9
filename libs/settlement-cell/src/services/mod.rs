pub mod commission;
pub mod events;
pub mod payments;
pub mod payout;
pub mod refund;
pub mod settlement;

pub use commission::PlatformSettingsService;
pub use events::PaymentEventHandler;
pub use payments::PaymentProviderClient;
pub use payout::PayoutService;
pub use refund::RefundService;
pub use settlement::SettlementService;
