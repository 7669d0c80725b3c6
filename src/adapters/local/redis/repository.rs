//! Redis StateRepository and SettingsStore implementations.

use super::error::RedisStoreError;
use super::pool::RedisPool;
use super::{
    IMAGE_INDEX_KEY, OPEN_SEGMENT_KEY, OPEN_SESSION_KEY, REINIT_KEY, SERIES_KEY, SESSIONS_KEY,
    SETTINGS_HASH,
};
use crate::domain::naming::SegmentSpan;
use crate::domain::session::CaptureSession;
use crate::domain::settings::SettingValue;
use crate::error::StoreError;
use crate::ports::repository::StateRepository;
use crate::ports::settings::SettingsStore;
use async_trait::async_trait;
use deadpool_redis::redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Increment KEYS[1] only if it still holds ARGV[1]. Returns `{applied, value}`.
const ADVANCE_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current ~= tonumber(ARGV[1]) then
    return {0, current}
end
redis.call('SET', KEYS[1], current + 1)
return {1, current + 1}
"#;

fn advance_script() -> &'static Script {
    static SCRIPT: OnceLock<Script> = OnceLock::new();
    SCRIPT.get_or_init(|| Script::new(ADVANCE_SCRIPT))
}

/// Values are JSON; anything that does not parse is taken as a plain string.
fn parse_setting(raw: &str) -> SettingValue {
    serde_json::from_str(raw).unwrap_or_else(|_| SettingValue::Text(raw.to_string()))
}

fn redis_err(err: deadpool_redis::redis::RedisError) -> StoreError {
    RedisStoreError::from(err).into()
}

#[async_trait]
impl StateRepository for RedisPool {
    async fn image_index(&self) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;
        let value: Option<u64> = conn.get(IMAGE_INDEX_KEY).await.map_err(redis_err)?;
        Ok(value.unwrap_or(0))
    }

    async fn advance_image_index(&self, expected: u64) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;
        let (applied, value): (i64, u64) = advance_script()
            .key(IMAGE_INDEX_KEY)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_err)?;
        if applied == 0 {
            return Err(StoreError::Conflict {
                key: "image_index",
                expected,
                actual: value,
            });
        }
        Ok(value)
    }

    async fn open_segment(&self) -> Result<Option<SegmentSpan>, StoreError> {
        let mut conn = self.conn().await?;
        let json: Option<String> = conn.get(OPEN_SEGMENT_KEY).await.map_err(redis_err)?;
        match json {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn set_open_segment(&self, span: Option<SegmentSpan>) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        match span {
            Some(span) => {
                let json = serde_json::to_string(&span)?;
                conn.set::<_, _, ()>(OPEN_SEGMENT_KEY, json)
                    .await
                    .map_err(redis_err)
            }
            None => conn
                .del::<_, ()>(OPEN_SEGMENT_KEY)
                .await
                .map_err(redis_err),
        }
    }

    async fn reinit_requested(&self) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        // Unset means the device has never been initialised.
        let value: Option<bool> = conn.get(REINIT_KEY).await.map_err(redis_err)?;
        Ok(value.unwrap_or(true))
    }

    async fn set_reinit(&self, requested: bool) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(REINIT_KEY, requested)
            .await
            .map_err(redis_err)
    }

    async fn current_series(&self) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        conn.get(SERIES_KEY).await.map_err(redis_err)
    }

    async fn set_current_series(&self, series: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(SERIES_KEY, series)
            .await
            .map_err(redis_err)
    }

    async fn open_session(&self) -> Result<Option<CaptureSession>, StoreError> {
        let mut conn = self.conn().await?;
        let json: Option<String> = conn.get(OPEN_SESSION_KEY).await.map_err(redis_err)?;
        match json {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn set_open_session(&self, session: Option<CaptureSession>) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        match session {
            Some(session) => {
                let json = serde_json::to_string(&session)?;
                conn.set::<_, _, ()>(OPEN_SESSION_KEY, json)
                    .await
                    .map_err(redis_err)
            }
            None => conn
                .del::<_, ()>(OPEN_SESSION_KEY)
                .await
                .map_err(redis_err),
        }
    }

    async fn append_closed_session(&self, session: CaptureSession) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let json = serde_json::to_string(&session)?;
        conn.rpush::<_, _, ()>(SESSIONS_KEY, json)
            .await
            .map_err(redis_err)
    }

    async fn closed_sessions(&self) -> Result<Vec<CaptureSession>, StoreError> {
        let mut conn = self.conn().await?;
        let entries: Vec<String> = conn.lrange(SESSIONS_KEY, 0, -1).await.map_err(redis_err)?;
        entries
            .iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl SettingsStore for RedisPool {
    async fn get(&self, key: &str) -> Result<Option<SettingValue>, StoreError> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.hget(SETTINGS_HASH, key).await.map_err(redis_err)?;
        Ok(raw.as_deref().map(parse_setting))
    }

    async fn all(&self) -> Result<HashMap<String, SettingValue>, StoreError> {
        let mut conn = self.conn().await?;
        let raw: HashMap<String, String> = conn.hgetall(SETTINGS_HASH).await.map_err(redis_err)?;
        Ok(raw
            .into_iter()
            .map(|(key, value)| {
                let parsed = parse_setting(&value);
                (key, parsed)
            })
            .collect())
    }
}
