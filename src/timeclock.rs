use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::store::{Punch, PunchType, Store, StoreError};

#[derive(Error, Debug)]
pub enum TimeClockError {
    #[error("Please wait before punching again")]
    AntiBounce,

    #[error("{0}")]
    Store(#[from] StoreError),
}

/// Pure punch policy over [`Store`]. The only I/O here is the Store itself —
/// no clock injection, no side channels.
pub struct TimeClock {
    store: Arc<Store>,
    antibounce_seconds: i64,
    device_id: String,
}

impl TimeClock {
    pub fn new(store: Arc<Store>, antibounce_seconds: i64, device_id: String) -> Self {
        Self {
            store,
            antibounce_seconds,
            device_id,
        }
    }

    /// IN if the user has no prior punch; otherwise the opposite of the last.
    pub fn determine_punch_type(&self, user_id: i64) -> Result<PunchType, StoreError> {
        Ok(match self.store.get_last_punch(user_id)? {
            None => PunchType::In,
            Some(last) => last.punch_type.toggled(),
        })
    }

    /// Blocked if the user's last punch is less than `antibounce_seconds` old.
    /// A short mechanical debounce, distinct from the device channel's much
    /// longer `punch_cooldown_seconds`.
    pub fn check_antibounce(&self, user_id: i64) -> Result<bool, StoreError> {
        let Some(last) = self.store.get_last_punch(user_id)? else {
            return Ok(false);
        };
        let elapsed = Utc::now().signed_duration_since(last.timestamp_utc);
        Ok(elapsed.num_seconds() < self.antibounce_seconds)
    }

    /// Records a punch for `user_id` with the given biometric/device match
    /// score. Returns the inserted punch, or `TimeClockError::AntiBounce` if
    /// the debounce window hasn't elapsed yet.
    pub fn record_punch(&self, user_id: i64, match_score: i64) -> Result<Punch, TimeClockError> {
        if self.check_antibounce(user_id)? {
            return Err(TimeClockError::AntiBounce);
        }
        let punch_type = self.determine_punch_type(user_id)?;
        let now_utc = Utc::now();
        let now_local = chrono::Local::now().naive_local();
        Ok(self
            .store
            .record_punch(user_id, now_utc, now_local, punch_type, match_score, &self.device_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn clock_with(antibounce_seconds: i64) -> (Arc<Store>, TimeClock) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let clock = TimeClock::new(store.clone(), antibounce_seconds, "kiosk-1".to_string());
        (store, clock)
    }

    #[test]
    fn first_punch_is_in() {
        let (store, clock) = clock_with(10);
        let user = store.create_user("Ada", "E001").unwrap();
        assert_eq!(clock.determine_punch_type(user.id).unwrap(), PunchType::In);
    }

    #[test]
    fn punch_toggles_on_each_call() {
        let (store, clock) = clock_with(0);
        let user = store.create_user("Ada", "E001").unwrap();
        let first = clock.record_punch(user.id, 90).unwrap();
        assert_eq!(first.punch_type, PunchType::In);
        let second = clock.record_punch(user.id, 90).unwrap();
        assert_eq!(second.punch_type, PunchType::Out);
    }

    #[test]
    fn antibounce_blocks_immediate_repeat_punch() {
        let (store, clock) = clock_with(10);
        let user = store.create_user("Ada", "E001").unwrap();
        clock.record_punch(user.id, 90).unwrap();
        let err = clock.record_punch(user.id, 90).unwrap_err();
        assert!(matches!(err, TimeClockError::AntiBounce));
    }

    #[test]
    fn device_id_is_recorded_on_every_punch() {
        let (store, clock) = clock_with(0);
        let user = store.create_user("Ada", "E001").unwrap();
        let punch = clock.record_punch(user.id, 90).unwrap();
        assert_eq!(punch.device_id, "kiosk-1");
    }
}
