//! Home model and the authoritative device store

pub mod defaults;
pub mod store;
pub mod types;

pub use defaults::initial_state;
pub use store::{ChangeSource, DeviceChange, DeviceStore, UpdateOutcome};
pub use types::{
    Device, DeviceMeta, DeviceSummary, DeviceType, DeviceUpdate, DeviceValue, HomeState, Room,
    RoomType,
};
