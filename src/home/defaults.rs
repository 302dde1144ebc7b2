//! Stock home shipped with the app

use super::types::{Device, DeviceMeta, DeviceType, DeviceValue, HomeState, Room, RoomType};

/// Model used when none is configured
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Name the assistant introduces itself with
pub const DEFAULT_ASSISTANT_NAME: &str = "Nexus";

fn room(id: &str, name: &str, room_type: RoomType, image: &str) -> Room {
    Room {
        id: id.to_string(),
        name: name.to_string(),
        room_type,
        image: format!("https://picsum.photos/seed/{image}/800/600"),
    }
}

fn device(
    id: &str,
    name: &str,
    device_type: DeviceType,
    room_id: &str,
    is_on: bool,
    value: Option<f64>,
) -> Device {
    Device {
        id: id.to_string(),
        name: name.to_string(),
        device_type,
        room_id: room_id.to_string(),
        is_on,
        value: value.map(DeviceValue::Number),
        meta: None,
    }
}

fn with_meta(mut device: Device, meta: DeviceMeta) -> Device {
    device.meta = Some(meta);
    device
}

/// Four rooms and eight devices (`d1`..`d8`)
#[must_use]
pub fn initial_state() -> HomeState {
    let rooms = vec![
        room("living-room", "Living Room", RoomType::LivingRoom, "livingroom"),
        room("kitchen", "Kitchen", RoomType::Kitchen, "kitchen"),
        room("master-bedroom", "Master Bedroom", RoomType::Bedroom, "bedroom"),
        room("office", "Home Office", RoomType::Office, "office"),
    ];

    let devices = vec![
        with_meta(
            device("d1", "Main Lights", DeviceType::Light, "living-room", true, Some(80.0)),
            DeviceMeta {
                color: Some("#ffffff".to_string()),
                ..DeviceMeta::default()
            },
        ),
        with_meta(
            device("d2", "Thermostat", DeviceType::Thermostat, "living-room", true, Some(72.0)),
            DeviceMeta {
                unit: Some("\u{b0}F".to_string()),
                min: Some(60.0),
                max: Some(85.0),
                ..DeviceMeta::default()
            },
        ),
        with_meta(
            device("d3", "Front Door", DeviceType::Lock, "living-room", true, None),
            DeviceMeta {
                battery_level: Some(85.0),
                ..DeviceMeta::default()
            },
        ),
        device("d4", "Kitchen Spots", DeviceType::Light, "kitchen", false, Some(100.0)),
        device("d5", "Smart Fridge", DeviceType::Camera, "kitchen", true, None),
        with_meta(
            device("d6", "Desk Lamp", DeviceType::Light, "office", true, Some(50.0)),
            DeviceMeta {
                color: Some("#fcd34d".to_string()),
                ..DeviceMeta::default()
            },
        ),
        device("d7", "Speaker", DeviceType::Speaker, "office", false, Some(30.0)),
        device("d8", "Bedside Lamp", DeviceType::Light, "master-bedroom", false, Some(20.0)),
    ];

    HomeState { rooms, devices }
}
