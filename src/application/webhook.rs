//! Payment gateway webhook boundary.
//!
//! Deliveries are verified against the raw body, parsed, and dispatched to
//! the booking service. Anything that is not a bad signature is acknowledged
//! so the gateway does not keep retrying.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use super::booking::{BookingService, PaymentOutcome};
use super::{AppError, ErrorKind, PaymentGateway};

pub const EVENT_PAYMENT_CAPTURED: &str = "payment.captured";
pub const EVENT_PAYMENT_FAILED: &str = "payment.failed";

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Debug, Deserialize)]
struct Payload {
    payment: Option<PaymentWrapper>,
}

#[derive(Debug, Deserialize)]
struct PaymentWrapper {
    entity: PaymentEntity,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    order_id: Option<String>,
}

/// A payment event the engine acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    Captured { order_ref: String, payment_ref: String },
    Failed { order_ref: String, payment_ref: String },
}

impl PaymentEvent {
    /// Parse a delivery body. `Ok(None)` for well-formed events the engine
    /// does not handle or that carry no order reference.
    pub fn parse(raw_body: &[u8]) -> Result<Option<Self>, serde_json::Error> {
        let envelope: Envelope = serde_json::from_slice(raw_body)?;
        let Some(entity) = envelope
            .payload
            .and_then(|p| p.payment)
            .map(|p| p.entity)
        else {
            return Ok(None);
        };
        let Some(order_ref) = entity.order_id else {
            return Ok(None);
        };

        Ok(match envelope.event.as_str() {
            EVENT_PAYMENT_CAPTURED => Some(PaymentEvent::Captured {
                order_ref,
                payment_ref: entity.id,
            }),
            EVENT_PAYMENT_FAILED => Some(PaymentEvent::Failed {
                order_ref,
                payment_ref: entity.id,
            }),
            _ => None,
        })
    }

    pub fn order_ref(&self) -> &str {
        match self {
            PaymentEvent::Captured { order_ref, .. } | PaymentEvent::Failed { order_ref, .. } => {
                order_ref
            }
        }
    }
}

/// How an accepted delivery was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAck {
    /// The event changed or confirmed a booking
    Processed,
    /// No booking carries the event's order reference
    NoMatch,
    /// Unknown event type or unparseable payload
    Ignored,
    /// The booking could not take the captured payment; it was refunded
    Refunded,
    /// Handling failed; the error was logged and swallowed
    Swallowed(ErrorKind),
}

impl WebhookAck {
    pub fn http_status(&self) -> u16 {
        200
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WebhookRejected {
    #[error("Invalid webhook signature")]
    InvalidSignature,
}

impl WebhookRejected {
    pub fn http_status(&self) -> u16 {
        400
    }
}

/// HTTP status for an error surfaced by a request/response boundary.
pub fn http_status(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::NotFound => 404,
        ErrorKind::Forbidden => 403,
        ErrorKind::InvalidState => 400,
        ErrorKind::Conflict => 409,
        ErrorKind::Internal => 500,
    }
}

pub struct WebhookHandler {
    gateway: Arc<dyn PaymentGateway>,
    bookings: Arc<BookingService>,
}

impl WebhookHandler {
    pub fn new(gateway: Arc<dyn PaymentGateway>, bookings: Arc<BookingService>) -> Self {
        Self { gateway, bookings }
    }

    /// Handle one delivery. Only a signature mismatch is rejected.
    pub async fn handle(&self, raw_body: &[u8], signature: &str) -> Result<WebhookAck, WebhookRejected> {
        if !self.gateway.verify_webhook_signature(raw_body, signature) {
            tracing::warn!(bytes = raw_body.len(), "webhook rejected: bad signature");
            return Err(WebhookRejected::InvalidSignature);
        }

        let event = match PaymentEvent::parse(raw_body) {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::debug!("webhook ignored: unhandled event");
                return Ok(WebhookAck::Ignored);
            }
            Err(err) => {
                tracing::warn!(error = %err, "webhook ignored: malformed payload");
                return Ok(WebhookAck::Ignored);
            }
        };

        match self.dispatch(&event).await {
            Ok(ack) => Ok(ack),
            Err(err) => {
                let kind = err.kind();
                if kind == ErrorKind::Internal {
                    tracing::error!(order_ref = event.order_ref(), error = %err, "webhook handling failed");
                } else {
                    tracing::warn!(order_ref = event.order_ref(), error = %err, "webhook handling rejected");
                }
                Ok(WebhookAck::Swallowed(kind))
            }
        }
    }

    /// Apply a parsed event to its booking.
    pub async fn dispatch(&self, event: &PaymentEvent) -> Result<WebhookAck, AppError> {
        let Some(booking) = self.bookings.find_by_order_ref(event.order_ref()).await? else {
            tracing::warn!(order_ref = event.order_ref(), "webhook for unknown order");
            return Ok(WebhookAck::NoMatch);
        };

        match event {
            PaymentEvent::Captured { payment_ref, .. } => {
                let outcome = self
                    .bookings
                    .handle_booking_paid(&booking, Some(payment_ref.as_str()))
                    .await?;
                Ok(match outcome {
                    PaymentOutcome::Ignored(_) => WebhookAck::Ignored,
                    PaymentOutcome::Refunded(_) => WebhookAck::Refunded,
                    _ => WebhookAck::Processed,
                })
            }
            PaymentEvent::Failed { payment_ref, .. } => {
                let failed = self
                    .bookings
                    .handle_booking_failed(&booking, Some(payment_ref.as_str()))
                    .await?;
                Ok(if failed {
                    WebhookAck::Processed
                } else {
                    WebhookAck::Ignored
                })
            }
        }
    }
}
