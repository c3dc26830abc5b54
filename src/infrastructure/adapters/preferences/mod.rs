//! Preferences Adapter - 偏好持久化

mod file_preference_store;

pub use file_preference_store::FilePreferenceStore;
