//! Authoritative device state store
//!
//! Every mutation builds a new `HomeState` and swaps it in under the write
//! lock, so a reader holding an earlier snapshot keeps seeing it unchanged.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;

use super::types::{Device, DeviceUpdate, DeviceValue, HomeState, Room};

/// Channel capacity for change notifications
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Result of a device mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The device exists and the update was applied
    Applied,
    /// No device with that identifier
    NotFound,
}

/// Who changed a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// Direct interaction from the front-end
    User,
    /// A tool call from the voice assistant
    Assistant,
}

/// Notification published after every successful mutation
#[derive(Debug, Clone)]
pub struct DeviceChange {
    /// The device as it is after the change
    pub device: Device,
    pub source: ChangeSource,
}

/// Shared handle to the home's device state
///
/// Cloning the handle is cheap; all clones see the same state.
#[derive(Clone)]
pub struct DeviceStore {
    state: Arc<RwLock<Arc<HomeState>>>,
    changes: broadcast::Sender<DeviceChange>,
}

impl std::fmt::Debug for DeviceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.snapshot();
        f.debug_struct("DeviceStore")
            .field("rooms", &state.rooms.len())
            .field("devices", &state.devices.len())
            .finish()
    }
}

impl DeviceStore {
    /// Create a store holding `state`
    #[must_use]
    pub fn new(state: HomeState) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(Arc::new(state))),
            changes,
        }
    }

    /// Current state; unaffected by later mutations
    #[must_use]
    pub fn snapshot(&self) -> Arc<HomeState> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&state)
    }

    /// All devices, in declaration order
    #[must_use]
    pub fn list_devices(&self) -> Vec<Device> {
        self.snapshot().devices.clone()
    }

    /// Look up a device by identifier
    #[must_use]
    pub fn get_device(&self, id: &str) -> Option<Device> {
        self.snapshot().device(id).cloned()
    }

    /// All rooms
    #[must_use]
    pub fn list_rooms(&self) -> Vec<Room> {
        self.snapshot().rooms.clone()
    }

    /// Devices whose `room_id` points at `room_id`
    #[must_use]
    pub fn devices_in_room(&self, room_id: &str) -> Vec<Device> {
        self.snapshot()
            .devices
            .iter()
            .filter(|d| d.room_id == room_id)
            .cloned()
            .collect()
    }

    /// Apply the present fields of `update` to a device
    ///
    /// An empty update on an existing device is accepted and changes nothing.
    pub fn apply_partial_update(
        &self,
        id: &str,
        update: &DeviceUpdate,
        source: ChangeSource,
    ) -> UpdateOutcome {
        if update.is_empty() {
            return if self.snapshot().device(id).is_some() {
                UpdateOutcome::Applied
            } else {
                UpdateOutcome::NotFound
            };
        }

        self.mutate(id, source, |device| device.with_update(update))
    }

    /// Flip a device's power state
    pub fn toggle(&self, id: &str, source: ChangeSource) -> UpdateOutcome {
        self.mutate(id, source, |device| {
            device.with_update(&DeviceUpdate::power_only(!device.is_on))
        })
    }

    /// Set a device's value
    pub fn set_value(&self, id: &str, value: DeviceValue, source: ChangeSource) -> UpdateOutcome {
        let update = DeviceUpdate::value_only(value);
        self.mutate(id, source, |device| device.with_update(&update))
    }

    /// Subscribe to change notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceChange> {
        self.changes.subscribe()
    }

    fn mutate<F>(&self, id: &str, source: ChangeSource, apply: F) -> UpdateOutcome
    where
        F: FnOnce(&Device) -> Device,
    {
        let device = {
            let mut current = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let Some(index) = current.devices.iter().position(|d| d.id == id) else {
                tracing::debug!(device_id = id, "device not found");
                return UpdateOutcome::NotFound;
            };

            let mut next = HomeState::clone(&current);
            next.devices[index] = apply(&current.devices[index]);
            let device = next.devices[index].clone();
            *current = Arc::new(next);
            device
        };

        tracing::debug!(
            device_id = id,
            is_on = device.is_on,
            value = ?device.value,
            ?source,
            "device updated"
        );

        // No subscribers is fine
        let _ = self.changes.send(DeviceChange { device, source });

        UpdateOutcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::home::defaults::initial_state;
    use crate::home::types::DeviceType;

    fn store() -> DeviceStore {
        DeviceStore::new(initial_state())
    }

    #[test]
    fn partial_update_touches_only_present_fields() {
        let store = store();
        let before = store.get_device("d1").unwrap();

        let outcome = store.apply_partial_update(
            "d1",
            &DeviceUpdate::value_only(DeviceValue::Number(10.0)),
            ChangeSource::Assistant,
        );
        assert_eq!(outcome, UpdateOutcome::Applied);

        let after = store.get_device("d1").unwrap();
        assert_eq!(after.is_on, before.is_on);
        assert_eq!(after.value, Some(DeviceValue::Number(10.0)));
    }

    #[test]
    fn unknown_device_leaves_state_untouched() {
        let store = store();
        let before = store.snapshot();

        let outcome =
            store.apply_partial_update("ghost", &DeviceUpdate::power_only(true), ChangeSource::User);
        assert_eq!(outcome, UpdateOutcome::NotFound);

        assert!(Arc::ptr_eq(&before, &store.snapshot()));
    }

    #[test]
    fn old_snapshot_is_not_modified() {
        let store = store();
        let before = store.snapshot();
        let was_on = before.device("d4").unwrap().is_on;

        store.toggle("d4", ChangeSource::User);

        assert_eq!(before.device("d4").unwrap().is_on, was_on);
        assert_eq!(store.get_device("d4").unwrap().is_on, !was_on);
    }

    #[test]
    fn clones_share_state() {
        let store = store();
        let other = store.clone();

        other.set_value("d7", DeviceValue::Number(65.0), ChangeSource::User);
        assert_eq!(
            store.get_device("d7").unwrap().value,
            Some(DeviceValue::Number(65.0))
        );
    }

    #[test]
    fn devices_in_room_follows_back_reference() {
        let store = store();
        let kitchen = store.devices_in_room("kitchen");
        assert_eq!(kitchen.len(), 2);
        assert!(kitchen.iter().any(|d| d.device_type == DeviceType::Camera));
        assert!(store.devices_in_room("garage").is_empty());
    }

    #[tokio::test]
    async fn changes_are_published() {
        let store = store();
        let mut rx = store.subscribe();

        store.toggle("d8", ChangeSource::User);

        let change = rx.recv().await.unwrap();
        assert_eq!(change.device.id, "d8");
        assert!(change.device.is_on);
        assert_eq!(change.source, ChangeSource::User);
    }

    #[test]
    fn not_found_publishes_nothing() {
        let store = store();
        let mut rx = store.subscribe();

        store.toggle("ghost", ChangeSource::User);

        assert!(rx.try_recv().is_err());
    }
}
