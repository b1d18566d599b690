use crate::model::*;

use super::{Engine, Party, ReservationError};

impl Engine {
    /// All timeslots of a service, sorted by start. Availability is not required.
    pub async fn service_timeslots(
        &self,
        service_id: ServiceId,
    ) -> Result<Vec<Timeslot>, ReservationError> {
        let service = self
            .store
            .find_service(service_id)
            .await
            .ok_or(ReservationError::ServiceNotFound(service_id))?;
        Ok(service.timeslots)
    }

    /// Every booked timeslot across the services a provider owns.
    pub async fn provider_calendar(
        &self,
        provider_id: UserId,
    ) -> Result<Vec<CalendarEntry>, ReservationError> {
        match self.store.find_user(provider_id) {
            Some(user) if user.role == Role::Provider => {}
            _ => return Err(ReservationError::UserNotFound(Party::Provider(provider_id))),
        }

        let mut entries = Vec::new();
        for service_id in self.store.service_ids_owned_by(provider_id) {
            let Some(service) = self.store.find_service(service_id).await else {
                continue;
            };
            entries.extend(service.timeslots.iter().map(|t| CalendarEntry {
                timeslot_id: t.id,
                service_id,
                service_title: service.info.title.clone(),
                start: t.span.start,
                end: t.span.end,
            }));
        }
        entries.sort_by_key(|e| (e.start, e.service_id));
        Ok(entries)
    }
}
