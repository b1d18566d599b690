use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{ReservationNotice, ServiceId};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for reservation notices, one channel per service.
pub struct NotifyHub {
    channels: DashMap<ServiceId, broadcast::Sender<ReservationNotice>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notices for a service. Creates the channel if needed.
    pub fn subscribe(&self, service_id: ServiceId) -> broadcast::Receiver<ReservationNotice> {
        let sender = self
            .channels
            .entry(service_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notice. No-op if nobody is listening.
    pub fn send(&self, notice: &ReservationNotice) {
        if let Some(sender) = self.channels.get(&notice.service_id) {
            let _ = sender.send(notice.clone());
        }
    }
}
