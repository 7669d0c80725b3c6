use crate::domain::settings::{keys, SettingValue, Settings};
use crate::error::{SettingsError, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;

/// Read side of the admin-owned key/value settings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<SettingValue>, StoreError>;

    async fn all(&self) -> Result<HashMap<String, SettingValue>, StoreError>;
}

/// Load and validate a full settings snapshot.
pub async fn load_settings<S>(store: &S) -> Result<Settings, SettingsError>
where
    S: SettingsStore + ?Sized,
{
    let values = store.all().await?;
    Settings::from_values(&values)
}

/// The master on/off switch, read on every loop iteration.
pub async fn capture_enabled<S>(store: &S) -> Result<bool, SettingsError>
where
    S: SettingsStore + ?Sized,
{
    match store.get(keys::CAPTURE_ENABLE).await? {
        None => Ok(false),
        Some(value) => value.as_bool().ok_or(SettingsError::WrongType {
            key: keys::CAPTURE_ENABLE,
            expected: "a boolean",
        }),
    }
}
