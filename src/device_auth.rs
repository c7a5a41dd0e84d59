use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use thiserror::Error;

use crate::store::{Punch, PunchType, Store, StoreError};
use crate::timeclock::TimeClock;

#[derive(Error, Debug)]
pub enum DeviceAuthError {
    #[error("device not found")]
    NotFound,

    #[error("no active challenge for this device")]
    NoChallenge,

    #[error("challenge expired")]
    ChallengeExpired,

    #[error("please wait {retry_after_seconds} seconds")]
    Cooldown { retry_after_seconds: i64 },

    #[error("daily punch limit reached")]
    DailyLimitReached,

    #[error("{0}")]
    Store(#[from] StoreError),
}

struct PendingChallenge {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Companion-device punch channel: challenge-response on top of a
/// pre-enrolled device token. Challenges live only in process memory — a
/// daemon restart invalidates any outstanding challenge, which is fine
/// since they're only ever a few minutes old.
pub struct DeviceAuth {
    store: Arc<Store>,
    timeclock: Arc<TimeClock>,
    challenges: HashMap<String, PendingChallenge>,
    challenge_expiry_seconds: i64,
    punch_cooldown_seconds: i64,
    max_punches_per_day: i64,
}

impl DeviceAuth {
    pub fn new(
        store: Arc<Store>,
        timeclock: Arc<TimeClock>,
        challenge_expiry_seconds: i64,
        punch_cooldown_seconds: i64,
        max_punches_per_day: i64,
    ) -> Self {
        Self {
            store,
            timeclock,
            challenges: HashMap::new(),
            challenge_expiry_seconds,
            punch_cooldown_seconds,
            max_punches_per_day,
        }
    }

    /// Admin-gated: binds a device token to a user and records the
    /// enrolling user-agent for later soft checks.
    pub fn enroll(
        &self,
        user_id: i64,
        token: &str,
        name: &str,
        user_agent: Option<&str>,
    ) -> Result<(), StoreError> {
        self.store.register_device(user_id, token, name, user_agent)?;
        Ok(())
    }

    fn sweep_expired(&mut self) {
        let now = Utc::now();
        self.challenges.retain(|_, c| c.expires_at > now);
    }

    /// Mints a fresh challenge for `token`. Sweeps expired challenges first,
    /// then soft-updates the stored user-agent if it differs from the
    /// enrolled one — token possession is the real authenticator, so a UA
    /// mismatch only logs and refreshes, it never blocks.
    pub fn challenge(
        &mut self,
        token: &str,
        user_agent: Option<&str>,
    ) -> Result<(String, i64), DeviceAuthError> {
        self.sweep_expired();

        let device = self
            .store
            .get_device_by_token(token)?
            .ok_or(DeviceAuthError::NotFound)?;

        if let Some(ua) = user_agent {
            if device.device.enrolled_user_agent.as_deref() != Some(ua) {
                tracing::info!(device_id = device.device.id, "device user-agent changed, refreshing");
                self.store.update_device_user_agent(token, ua)?;
            }
        }

        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let value = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        let expires_at = Utc::now() + chrono::Duration::seconds(self.challenge_expiry_seconds);
        self.challenges.insert(
            token.to_string(),
            PendingChallenge {
                value: value.clone(),
                expires_at,
            },
        );
        Ok((value, self.challenge_expiry_seconds))
    }

    /// Verifies the presented challenge, consuming it unconditionally (pop
    /// happens before any policy check — single-use regardless of outcome),
    /// then enforces cooldown, daily limit, and IN/OUT toggle.
    pub fn punch(&mut self, token: &str, challenge: &str) -> Result<Punch, DeviceAuthError> {
        let device = self
            .store
            .get_device_by_token(token)?
            .ok_or(DeviceAuthError::NotFound)?;

        let pending = self.challenges.remove(token).ok_or(DeviceAuthError::NoChallenge)?;
        if pending.value != challenge {
            return Err(DeviceAuthError::NoChallenge);
        }
        if pending.expires_at <= Utc::now() {
            return Err(DeviceAuthError::ChallengeExpired);
        }

        let user_id = device.user.id;
        if let Some(last) = self.store.get_last_punch(user_id)? {
            let elapsed = Utc::now().signed_duration_since(last.timestamp_utc).num_seconds();
            if elapsed < self.punch_cooldown_seconds {
                return Err(DeviceAuthError::Cooldown {
                    retry_after_seconds: self.punch_cooldown_seconds - elapsed,
                });
            }
        }

        let midnight = chrono::Local::now()
            .naive_local()
            .date()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid");
        let count_today = self.store.get_user_punch_count_today(user_id, midnight)?;
        if count_today >= self.max_punches_per_day {
            return Err(DeviceAuthError::DailyLimitReached);
        }

        let punch_type = match self.store.get_last_punch(user_id)? {
            Some(last) if last.punch_type == PunchType::In => PunchType::Out,
            _ => PunchType::In,
        };

        let now_utc = Utc::now();
        let now_local = chrono::Local::now().naive_local();
        let device_id = format!("device_{}", device.device.id);
        Ok(self.store.record_punch(
            user_id,
            now_utc,
            now_local,
            punch_type,
            crate::store::DEVICE_MATCH_SCORE_SENTINEL,
            &device_id,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(cooldown: i64, daily_limit: i64) -> (Arc<Store>, DeviceAuth, i64) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let timeclock = Arc::new(TimeClock::new(store.clone(), 10, "kiosk-1".to_string()));
        let user = store.create_user("Ada", "E001").unwrap();
        let auth = DeviceAuth::new(store.clone(), timeclock, 300, cooldown, daily_limit);
        (store, auth, user.id)
    }

    #[test]
    fn enroll_then_challenge_then_punch_succeeds() {
        let (store, mut auth, user_id) = setup(0, 10);
        auth.enroll(user_id, "tok-1", "Ada's phone", Some("ua-1")).unwrap();
        let (challenge, ttl) = auth.challenge("tok-1", Some("ua-1")).unwrap();
        assert_eq!(ttl, 300);
        let punch = auth.punch("tok-1", &challenge).unwrap();
        assert_eq!(punch.punch_type, PunchType::In);
        assert_eq!(punch.match_score, crate::store::DEVICE_MATCH_SCORE_SENTINEL);
        assert_eq!(punch.device_id, format!("device_{}", store.get_device_by_token("tok-1").unwrap().unwrap().device.id));
    }

    #[test]
    fn challenge_is_single_use() {
        let (_store, mut auth, user_id) = setup(0, 10);
        auth.enroll(user_id, "tok-1", "Phone", None).unwrap();
        let (challenge, _) = auth.challenge("tok-1", None).unwrap();
        auth.punch("tok-1", &challenge).unwrap();
        let err = auth.punch("tok-1", &challenge).unwrap_err();
        assert!(matches!(err, DeviceAuthError::NoChallenge));
    }

    #[test]
    fn wrong_challenge_value_is_rejected_and_consumes_pending() {
        let (_store, mut auth, user_id) = setup(0, 10);
        auth.enroll(user_id, "tok-1", "Phone", None).unwrap();
        auth.challenge("tok-1", None).unwrap();
        let err = auth.punch("tok-1", "not-the-real-challenge").unwrap_err();
        assert!(matches!(err, DeviceAuthError::NoChallenge));
        // pending was consumed by the failed attempt above
        let err2 = auth.punch("tok-1", "not-the-real-challenge").unwrap_err();
        assert!(matches!(err2, DeviceAuthError::NoChallenge));
    }

    #[test]
    fn cooldown_rejects_rapid_repeat_punches() {
        let (_store, mut auth, user_id) = setup(300, 10);
        auth.enroll(user_id, "tok-1", "Phone", None).unwrap();
        let (c1, _) = auth.challenge("tok-1", None).unwrap();
        auth.punch("tok-1", &c1).unwrap();
        let (c2, _) = auth.challenge("tok-1", None).unwrap();
        let err = auth.punch("tok-1", &c2).unwrap_err();
        assert!(matches!(err, DeviceAuthError::Cooldown { .. }));
    }

    #[test]
    fn daily_limit_rejects_after_threshold() {
        let (_store, mut auth, user_id) = setup(0, 2);
        auth.enroll(user_id, "tok-1", "Phone", None).unwrap();
        for _ in 0..2 {
            let (c, _) = auth.challenge("tok-1", None).unwrap();
            auth.punch("tok-1", &c).unwrap();
        }
        let (c3, _) = auth.challenge("tok-1", None).unwrap();
        let err = auth.punch("tok-1", &c3).unwrap_err();
        assert!(matches!(err, DeviceAuthError::DailyLimitReached));
    }

    #[test]
    fn punch_toggles_in_and_out() {
        let (_store, mut auth, user_id) = setup(0, 10);
        auth.enroll(user_id, "tok-1", "Phone", None).unwrap();
        let (c1, _) = auth.challenge("tok-1", None).unwrap();
        assert_eq!(auth.punch("tok-1", &c1).unwrap().punch_type, PunchType::In);
        let (c2, _) = auth.challenge("tok-1", None).unwrap();
        assert_eq!(auth.punch("tok-1", &c2).unwrap().punch_type, PunchType::Out);
    }

    #[test]
    fn unknown_token_is_rejected() {
        let (_store, mut auth, _user_id) = setup(0, 10);
        let err = auth.challenge("no-such-token", None).unwrap_err();
        assert!(matches!(err, DeviceAuthError::NotFound));
    }

    #[test]
    fn user_agent_mismatch_refreshes_rather_than_blocks() {
        let (store, mut auth, user_id) = setup(0, 10);
        auth.enroll(user_id, "tok-1", "Phone", Some("ua-old")).unwrap();
        auth.challenge("tok-1", Some("ua-new")).unwrap();
        let device = store.get_device_by_token("tok-1").unwrap().unwrap();
        assert_eq!(device.device.enrolled_user_agent.as_deref(), Some("ua-new"));
    }
}
