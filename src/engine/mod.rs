mod budget;
mod conflict;
mod error;
mod queries;
mod timing;

pub use budget::plan_budget_change;
pub use error::{ErrorKind, Party, ReservationError, TimingViolation};

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::mail::{Mail, MailError, Mailer};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::store::{Committed, Store, UnitOfWork};

use conflict::check_no_overlap;
use timing::{effective_end, validate_timing};

/// What happens to a committed reservation when its mail cannot be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyPolicy {
    /// Log and count the failure; the reservation stands.
    #[default]
    BestEffort,
    /// Revert the reservation and report `NOTIFICATION_FAILED`.
    Rollback,
}

impl FromStr for NotifyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "best_effort" => Ok(NotifyPolicy::BestEffort),
            "rollback" => Ok(NotifyPolicy::Rollback),
            other => Err(format!("unknown notify policy: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub notify_policy: NotifyPolicy,
    /// Bounds lock acquisition and validation.
    pub reserve_timeout: Duration,
    /// Bounds each mail delivery.
    pub mail_timeout: Duration,
    pub mail_from: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            notify_policy: NotifyPolicy::BestEffort,
            reserve_timeout: Duration::from_secs(5),
            mail_timeout: Duration::from_secs(10),
            mail_from: "system@eventplanner.com".into(),
        }
    }
}

/// A validated reservation, staged but not yet committed. Holds the locks.
struct Prepared<'s> {
    uow: UnitOfWork<'s>,
    organizer: User,
    provider: User,
}

/// The reservation engine.
pub struct Engine {
    store: Arc<Store>,
    mailer: Arc<dyn Mailer>,
    pub notify: Arc<NotifyHub>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        store: Arc<Store>,
        mailer: Arc<dyn Mailer>,
        notify: Arc<NotifyHub>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            mailer,
            notify,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Reserve `service_id` for the request's event.
    ///
    /// Validation, timeslot persistence and budget reconciliation commit
    /// together or not at all. Mail goes out after the locks are released;
    /// its failure is handled per [`NotifyPolicy`].
    pub async fn reserve(
        &self,
        service_id: ServiceId,
        request: ReservationRequest,
    ) -> Result<ReservationResponse, ReservationError> {
        let started = Instant::now();
        let result = self.reserve_inner(service_id, &request).await;
        metrics::histogram!(crate::observability::RESERVE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind().code(),
        };
        metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => outcome)
            .increment(1);

        match &result {
            Ok(r) => info!(
                service_id,
                event_id = r.event_id,
                start = r.start_time,
                "reservation committed"
            ),
            Err(e) if e.kind().is_rejection() => debug!(service_id, "reservation rejected: {e}"),
            Err(e @ ReservationError::Timeout(_)) => warn!(service_id, "{e}"),
            Err(e) => error!(service_id, "reservation failed: {e}"),
        }
        result
    }

    async fn reserve_inner(
        &self,
        service_id: ServiceId,
        request: &ReservationRequest,
    ) -> Result<ReservationResponse, ReservationError> {
        let timeout = self.settings.reserve_timeout;
        let prepared = tokio::time::timeout(timeout, self.prepare(service_id, request))
            .await
            .map_err(|_| ReservationError::Timeout(timeout))??;

        let Prepared {
            uow,
            organizer,
            provider,
        } = prepared;
        // Locks are released when the unit of work is consumed.
        let committed = uow.commit().await?;

        if let Err(e) = self.send_mails(request.event_id, &organizer, &provider).await {
            metrics::counter!(crate::observability::MAIL_FAILURES_TOTAL).increment(1);
            match self.settings.notify_policy {
                NotifyPolicy::BestEffort => {
                    warn!(service_id, "reservation kept despite mail failure: {e}");
                }
                NotifyPolicy::Rollback => {
                    self.rollback(&committed).await?;
                    return Err(ReservationError::NotificationFailed(e));
                }
            }
        }

        self.notify.send(&ReservationNotice {
            timeslot_id: committed.timeslot.id,
            service_id,
            event_id: request.event_id,
            start: committed.timeslot.span.start,
            end: committed.timeslot.span.end,
        });

        Ok(ReservationResponse {
            service_id,
            event_id: request.event_id,
            provider_id: provider.id,
            start_time: request.start_time,
            end_time: request.end_time,
            provider_email: provider.email,
        })
    }

    /// Lookups, validation and staging, in order. Fails fast; on any error
    /// the unit of work is dropped and nothing is written.
    async fn prepare(
        &self,
        service_id: ServiceId,
        request: &ReservationRequest,
    ) -> Result<Prepared<'_>, ReservationError> {
        let gate = self.store.enter().await;
        let service = self
            .store
            .lock_available_service(service_id)
            .await
            .ok_or(ReservationError::ServiceNotFound(service_id))?;
        let event = self
            .store
            .lock_event(request.event_id)
            .await
            .ok_or(ReservationError::EventNotFound(request.event_id))?;
        let mut uow = self.store.begin(gate, service, event);

        let terms = uow.service().terms;
        let end = effective_end(&terms, request);
        let span = validate_timing(&terms, uow.event().date, request.start_time, end)
            .map_err(ReservationError::TimingConstraintViolation)?;
        check_no_overlap(uow.service(), &span)?;

        uow.save_timeslot(Timeslot {
            id: Ulid::new(),
            span,
            service_id,
            event_id: request.event_id,
        })?;
        budget::reconcile(&mut uow)?;

        let organizer = self
            .store
            .find_user(request.organizer_id)
            .ok_or(ReservationError::UserNotFound(Party::Organizer(request.organizer_id)))?;
        let provider = self
            .store
            .find_provider_by_merchandise_id(service_id)
            .ok_or(ReservationError::UserNotFound(Party::ProviderOf(service_id)))?;

        Ok(Prepared {
            uow,
            organizer,
            provider,
        })
    }

    /// One mail to the provider, one to the organizer. Both are attempted;
    /// the first failure is returned.
    async fn send_mails(
        &self,
        event_id: EventId,
        organizer: &User,
        provider: &User,
    ) -> Result<(), MailError> {
        let mut first_err = None;
        for to in [&provider.email, &organizer.email] {
            let mail = Mail {
                from: self.settings.mail_from.clone(),
                to: to.clone(),
                subject: format!("Reservation for event {event_id}"),
                body: "Reservation successful".into(),
            };
            let sent = tokio::time::timeout(self.settings.mail_timeout, self.mailer.send_mail(&mail))
                .await
                .unwrap_or(Err(MailError::TimedOut));
            if let Err(e) = sent {
                warn!(to = %mail.to, "mail delivery failed: {e}");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn rollback(&self, committed: &Committed) -> Result<(), ReservationError> {
        self.store.revert(committed).await?;
        metrics::counter!(crate::observability::RESERVATIONS_REVERTED_TOTAL).increment(1);
        warn!(
            timeslot_id = %committed.timeslot.id,
            service_id = committed.timeslot.service_id,
            "reservation reverted after mail failure"
        );
        Ok(())
    }
}
