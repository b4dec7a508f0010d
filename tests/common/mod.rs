// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use tutorledger::application::{
    AvailabilityService, Clock, Collaborators, Engine, GatewayOrder, Notification,
    NotificationSink, PaymentGateway, RefundRecord, WebhookAck,
};
use tutorledger::config::{PlatformDefaults, Policy};
use tutorledger::domain::{Booking, Cents, SessionSlot, Tutor, UserId};
use tutorledger::storage::{BankAccount, Repository};

pub const RATE: Cents = 300_000;

/// Gateway double: numbered orders, recorded refunds, checksum signatures.
#[derive(Default)]
pub struct FakeGateway {
    next_order: AtomicU64,
    next_refund: AtomicU64,
    refunds: Mutex<Vec<RefundRecord>>,
    refunds_down: AtomicBool,
}

impl FakeGateway {
    pub fn sign(body: &[u8]) -> String {
        let sum: u64 = body.iter().map(|b| *b as u64).sum();
        format!("sig-{:x}-{}", sum, body.len())
    }

    pub fn refunds(&self) -> Vec<RefundRecord> {
        self.refunds.lock().unwrap().clone()
    }

    pub fn set_refunds_down(&self, down: bool) {
        self.refunds_down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(&self, amount: Cents, currency: &str, _receipt: &str) -> Result<GatewayOrder> {
        let n = self.next_order.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GatewayOrder {
            order_ref: format!("order_{}", n),
            amount,
            currency: currency.to_string(),
        })
    }

    fn verify_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool {
        Self::sign(raw_body) == signature
    }

    async fn create_refund(&self, payment_ref: &str, amount: Option<Cents>) -> Result<RefundRecord> {
        if self.refunds_down.load(Ordering::SeqCst) {
            anyhow::bail!("gateway unavailable");
        }
        let n = self.next_refund.fetch_add(1, Ordering::SeqCst) + 1;
        let record = RefundRecord {
            refund_ref: format!("rfnd_{}", n),
            payment_ref: payment_ref.to_string(),
            amount,
        };
        self.refunds.lock().unwrap().push(record.clone());
        Ok(record)
    }
}

/// Every slot is available unless closed.
#[derive(Default)]
pub struct FakeAvailability {
    closed: AtomicBool,
}

impl FakeAvailability {
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AvailabilityService for FakeAvailability {
    async fn is_slot_within_availability(&self, _tutor_id: UserId, _slot: &SessionSlot) -> Result<bool> {
        Ok(!self.closed.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingNotifier {
    fn emit(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}

/// Settable clock so windows can be crossed without sleeping.
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub fn start_of_test() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
}

pub struct Harness {
    pub engine: Engine,
    pub repo: Arc<Repository>,
    pub gateway: Arc<FakeGateway>,
    pub availability: Arc<FakeAvailability>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<FakeClock>,
    pub policy: Policy,
    pub db_url: String,
    _dir: TempDir,
}

/// Engine over a fresh temporary database with default policy.
pub async fn harness() -> Result<Harness> {
    harness_with(Policy::default()).await
}

pub async fn harness_with(policy: Policy) -> Result<Harness> {
    let dir = TempDir::new()?;
    let db_path = dir.path().join("test.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.to_str().unwrap());
    let repo = Arc::new(Repository::init(&db_url).await?);
    repo.seed_platform_settings(PlatformDefaults::default().into())
        .await?;

    let gateway = Arc::new(FakeGateway::default());
    let availability = Arc::new(FakeAvailability::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = Arc::new(FakeClock::new(start_of_test()));

    let deps = Collaborators {
        gateway: gateway.clone(),
        availability: availability.clone(),
        bank_details: repo.clone(),
        platform: repo.clone(),
        notifier: notifier.clone(),
        clock: clock.clone(),
    };
    let engine = Engine::new(repo.clone(), deps, policy, "INR".to_string());

    Ok(Harness {
        engine,
        repo,
        gateway,
        availability,
        notifier,
        clock,
        policy,
        db_url,
        _dir: dir,
    })
}

impl Harness {
    pub async fn add_tutor(&self, hourly_rate: Cents) -> Result<UserId> {
        let tutor = Tutor::new("Asha", hourly_rate);
        self.repo.save_tutor(&tutor).await?;
        Ok(tutor.id)
    }

    pub async fn add_bank_account(&self, tutor_id: UserId) -> Result<()> {
        self.repo
            .save_bank_account(&BankAccount {
                tutor_id,
                account_holder: "Asha Rao".into(),
                account_number: "001234567890".into(),
                bank_name: Some("State Bank".into()),
                ifsc: Some("SBIN0000001".into()),
            })
            .await
    }

    /// A slot `days` after the test start date.
    pub fn slot(&self, days: i64, start: &str, end: &str) -> SessionSlot {
        let date: NaiveDate = start_of_test().date_naive() + Duration::days(days);
        SessionSlot::parse(&date.format("%Y-%m-%d").to_string(), start, end).unwrap()
    }

    pub fn webhook_body(event: &str, order_ref: &str, payment_ref: &str) -> Vec<u8> {
        serde_json::json!({
            "event": event,
            "payload": { "payment": { "entity": { "id": payment_ref, "order_id": order_ref } } }
        })
        .to_string()
        .into_bytes()
    }

    /// Deliver a correctly signed gateway webhook.
    pub async fn deliver(&self, event: &str, order_ref: &str, payment_ref: &str) -> WebhookAck {
        let body = Self::webhook_body(event, order_ref, payment_ref);
        let signature = FakeGateway::sign(&body);
        self.engine
            .webhooks
            .handle(&body, &signature)
            .await
            .expect("signed webhook accepted")
    }

    /// Create a booking, order it and capture the payment.
    pub async fn paid_booking(&self, tutor_id: UserId, learner_id: UserId, slot: SessionSlot) -> Result<Booking> {
        let booking = self
            .engine
            .bookings
            .create_booking_for_slot(learner_id, tutor_id, slot, None)
            .await?;
        let order = self
            .engine
            .bookings
            .create_payment_order_for_booking(booking.id, learner_id)
            .await?;
        let ack = self
            .deliver("payment.captured", &order.order_ref, &format!("pay_{}", booking.id.simple()))
            .await;
        assert_eq!(ack, WebhookAck::Processed);
        Ok(self.engine.bookings.get_booking(booking.id).await?)
    }

    /// A paid booking moved to completed by the sweep, escrow still held.
    pub async fn completed_booking(&self, tutor_id: UserId, learner_id: UserId, slot: SessionSlot) -> Result<Booking> {
        let booking = self.paid_booking(tutor_id, learner_id, slot).await?;
        self.clock
            .set(booking.slot.ends_at() + self.policy.completion_buffer() + Duration::minutes(1));
        self.engine.sweep.run_once().await?;
        Ok(self.engine.bookings.get_booking(booking.id).await?)
    }

    /// A booking whose escrow has been released to the tutor.
    pub async fn released_booking(&self, tutor_id: UserId, learner_id: UserId, slot: SessionSlot) -> Result<Booking> {
        let booking = self.completed_booking(tutor_id, learner_id, slot).await?;
        self.clock
            .set(booking.slot.ends_at() + self.policy.release_delay() + Duration::minutes(1));
        self.engine.sweep.run_once().await?;
        Ok(booking)
    }

    /// Put the clock back to the test start so new slots are in the future.
    pub fn rewind(&self) {
        self.clock.set(start_of_test());
    }
}

pub fn new_user() -> UserId {
    Uuid::new_v4()
}
