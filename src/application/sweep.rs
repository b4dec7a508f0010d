use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::Policy;
use crate::domain::{Booking, BookingStatus, Performer};
use crate::storage::Repository;

use super::wallet::{WalletLedger, released_audit};
use super::{AppError, Clock};

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Bookings whose session end plus buffer had passed
    pub examined: usize,
    /// Paid bookings moved to completed
    pub completed: usize,
    /// Escrow entries released to the tutor
    pub released: usize,
    /// Bookings held back by an open dispute
    pub frozen: usize,
    /// Bookings whose step failed and will be retried next pass
    pub failed: usize,
}

enum Step {
    Done { completed: bool, released: bool },
    Frozen,
    Waiting,
}

/// Periodic job that completes finished sessions and releases escrow.
pub struct CompletionSweep {
    repo: Arc<Repository>,
    clock: Arc<dyn Clock>,
    policy: Policy,
}

impl CompletionSweep {
    pub fn new(repo: Arc<Repository>, clock: Arc<dyn Clock>, policy: Policy) -> Self {
        Self {
            repo,
            clock,
            policy,
        }
    }

    /// One pass over paid bookings and completed bookings still in escrow.
    /// A failing booking is logged and skipped; the rest of the pass goes on.
    pub async fn run_once(&self) -> Result<SweepReport, AppError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let mut candidates = self
            .repo
            .list_bookings_with_status(BookingStatus::Paid)
            .await?;
        candidates.extend(self.repo.list_completed_bookings_pending_release().await?);

        for booking in candidates {
            if now < booking.matures_at(self.policy.completion_buffer()) {
                continue;
            }
            report.examined += 1;

            match self.process(&booking).await {
                Ok(Step::Done {
                    completed,
                    released,
                }) => {
                    report.completed += completed as usize;
                    report.released += released as usize;
                }
                Ok(Step::Frozen) => {
                    report.frozen += 1;
                    tracing::info!(booking_id = %booking.id, "booking frozen by open dispute");
                }
                Ok(Step::Waiting) => {}
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(booking_id = %booking.id, error = %err, "sweep step failed");
                }
            }
        }

        if report.completed > 0 || report.released > 0 || report.failed > 0 {
            tracing::info!(
                examined = report.examined,
                completed = report.completed,
                released = report.released,
                frozen = report.frozen,
                failed = report.failed,
                "completion sweep finished"
            );
        } else {
            tracing::debug!(examined = report.examined, frozen = report.frozen, "completion sweep idle");
        }
        Ok(report)
    }

    async fn process(&self, booking: &Booking) -> Result<Step, AppError> {
        if self.repo.has_open_dispute_for_booking(booking.id).await? {
            return Ok(Step::Frozen);
        }

        let now = self.clock.now();
        // Strictly after the delay: a dispute may still be opened at its last instant.
        let release_due = now > booking.slot.ends_at() + self.policy.release_delay();
        if booking.status == BookingStatus::Completed && !release_due {
            return Ok(Step::Waiting);
        }

        let mut tx = self.repo.begin().await?;
        let completed = if booking.status == BookingStatus::Paid {
            // A dispute opened since the check above leaves the row untouched.
            if !tx.complete_booking(booking.id, now).await? {
                return Ok(Step::Frozen);
            }
            true
        } else {
            false
        };

        let mut released = false;
        if release_due {
            if let Some(entry) = WalletLedger::release_in(&mut tx, booking.id, true, now).await? {
                tx.append_audit(&released_audit(&entry, Performer::System, now)?)
                    .await?;
                released = true;
            }
        }
        tx.commit().await?;

        if completed {
            tracing::info!(booking_id = %booking.id, "booking completed");
        }
        if released {
            tracing::info!(booking_id = %booking.id, "escrow released");
        }
        Ok(Step::Done {
            completed,
            released,
        })
    }

    /// Run the sweep every `interval` until the task is aborted.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(err) = self.run_once().await {
                    tracing::error!(error = %err, "completion sweep failed");
                }
            }
        })
    }
}
