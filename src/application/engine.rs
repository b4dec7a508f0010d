use std::sync::Arc;

use crate::config::Policy;
use crate::storage::Repository;

use super::{
    AuditLog, AvailabilityService, BankDetailsStore, BookingService, Clock, CompletionSweep,
    DisputeService, LogNotifier, NoAvailability, NotificationSink, OfflineGateway,
    PaymentGateway, PlatformSettings, SystemClock, WalletLedger, WebhookHandler,
    WithdrawalProcessor,
};

/// External collaborators shared by every service.
#[derive(Clone)]
pub struct Collaborators {
    pub gateway: Arc<dyn PaymentGateway>,
    pub availability: Arc<dyn AvailabilityService>,
    pub bank_details: Arc<dyn BankDetailsStore>,
    pub platform: Arc<dyn PlatformSettings>,
    pub notifier: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Operator tooling: settings and bank details from the repository, the
    /// system clock, logged notifications, and no gateway or availability.
    pub fn offline(repo: Arc<Repository>) -> Self {
        Self {
            gateway: Arc::new(OfflineGateway),
            availability: Arc::new(NoAvailability),
            bank_details: repo.clone(),
            platform: repo,
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
        }
    }
}

/// All services wired against one repository.
pub struct Engine {
    pub repo: Arc<Repository>,
    pub bookings: Arc<BookingService>,
    pub wallet: WalletLedger,
    pub disputes: DisputeService,
    pub withdrawals: WithdrawalProcessor,
    pub audit: AuditLog,
    pub sweep: Arc<CompletionSweep>,
    pub webhooks: WebhookHandler,
}

impl Engine {
    pub fn new(repo: Arc<Repository>, deps: Collaborators, policy: Policy, currency: String) -> Self {
        let bookings = Arc::new(BookingService::new(
            repo.clone(),
            deps.gateway.clone(),
            deps.availability.clone(),
            deps.platform.clone(),
            deps.notifier.clone(),
            deps.clock.clone(),
            policy,
            currency,
        ));

        Self {
            wallet: WalletLedger::new(repo.clone(), deps.clock.clone()),
            disputes: DisputeService::new(
                repo.clone(),
                deps.gateway.clone(),
                deps.clock.clone(),
                policy,
            ),
            withdrawals: WithdrawalProcessor::new(
                repo.clone(),
                deps.bank_details.clone(),
                deps.platform.clone(),
                deps.clock.clone(),
            ),
            audit: AuditLog::new(repo.clone()),
            sweep: Arc::new(CompletionSweep::new(repo.clone(), deps.clock.clone(), policy)),
            webhooks: WebhookHandler::new(deps.gateway.clone(), bookings.clone()),
            bookings,
            repo,
        }
    }
}
