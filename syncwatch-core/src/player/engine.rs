//! Playback engine boundary

use std::future::Future;

use serde_json::Value;

use super::types::PlayerError;

/// Commands the sync core issues to an external player.
///
/// Commands are fire-and-forget: they are queued to the player and return
/// once queued. Property reads are round-trips and therefore async.
pub trait PlaybackEngine: Send + Sync + 'static {
    fn load(&self, source: &str) -> Result<(), PlayerError>;

    fn play(&self) -> Result<(), PlayerError>;

    fn pause(&self) -> Result<(), PlayerError>;

    /// Absolute seek, in seconds
    fn seek(&self, position: f64) -> Result<(), PlayerError>;

    fn set_property(&self, name: &str, value: Value) -> Result<(), PlayerError>;

    fn get_property(&self, name: &str) -> impl Future<Output = Result<Value, PlayerError>> + Send;
}

/// Read a numeric property such as `time-pos`
pub async fn get_f64<E: PlaybackEngine>(engine: &E, name: &str) -> Result<f64, PlayerError> {
    engine
        .get_property(name)
        .await?
        .as_f64()
        .ok_or_else(|| PlayerError::UnexpectedType(name.to_string()))
}

/// Read a flag property such as `pause`
pub async fn get_bool<E: PlaybackEngine>(engine: &E, name: &str) -> Result<bool, PlayerError> {
    engine
        .get_property(name)
        .await?
        .as_bool()
        .ok_or_else(|| PlayerError::UnexpectedType(name.to_string()))
}

/// Records commands and serves canned property values
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FakeEngine {
    pub calls: parking_lot::Mutex<Vec<String>>,
    pub properties: parking_lot::Mutex<std::collections::HashMap<String, Value>>,
}

#[cfg(test)]
impl FakeEngine {
    pub fn with_state(position: f64, paused: bool) -> Self {
        let engine = Self::default();
        engine.set_state(position, paused);
        engine
    }

    pub fn set_state(&self, position: f64, paused: bool) {
        let mut props = self.properties.lock();
        props.insert("time-pos".to_string(), Value::from(position));
        props.insert("pause".to_string(), Value::from(paused));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) -> Result<(), PlayerError> {
        self.calls.lock().push(call);
        Ok(())
    }
}

#[cfg(test)]
impl PlaybackEngine for FakeEngine {
    fn load(&self, source: &str) -> Result<(), PlayerError> {
        self.record(format!("load {}", source))
    }

    fn play(&self) -> Result<(), PlayerError> {
        self.record("play".to_string())
    }

    fn pause(&self) -> Result<(), PlayerError> {
        self.record("pause".to_string())
    }

    fn seek(&self, position: f64) -> Result<(), PlayerError> {
        self.record(format!("seek {}", position))
    }

    fn set_property(&self, name: &str, value: Value) -> Result<(), PlayerError> {
        self.record(format!("set {}={}", name, value))
    }

    async fn get_property(&self, name: &str) -> Result<Value, PlayerError> {
        self.properties
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| PlayerError::Command("property unavailable".to_string()))
    }
}
