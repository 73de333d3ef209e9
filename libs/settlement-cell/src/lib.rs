pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::*;
pub use router::{settlement_routes, webhook_routes, SettlementState};
pub use services::commission::{split_price, PlatformSettingsService};
pub use services::events::PaymentEventHandler;
pub use services::payments::PaymentProviderClient;
pub use services::payout::PayoutService;
pub use services::refund::RefundService;
pub use services::settlement::SettlementService;
