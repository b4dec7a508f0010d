// Application layer - use cases and orchestration over the repository.
// Every money mutation commits together with its audit entries.

pub mod audit;
pub mod booking;
pub mod dispute;
pub mod engine;
pub mod error;
pub mod ports;
pub mod sweep;
pub mod wallet;
pub mod webhook;
pub mod withdrawal;

pub use audit::AuditLog;
pub use booking::{BookingService, PaymentOutcome};
pub use dispute::DisputeService;
pub use engine::{Collaborators, Engine};
pub use error::*;
pub use ports::*;
pub use sweep::{CompletionSweep, SweepReport};
pub use wallet::WalletLedger;
pub use webhook::{PaymentEvent, WebhookAck, WebhookHandler, WebhookRejected, http_status};
pub use withdrawal::WithdrawalProcessor;
