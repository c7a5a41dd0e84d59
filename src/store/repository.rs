use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::error::StoreError;
use super::models::*;

fn parse_utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_local(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").unwrap_or_else(|_| Utc::now().naive_utc())
}

pub fn create_user(conn: &Connection, name: &str, employee_code: &str) -> Result<User, StoreError> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO users (name, employee_code, active, created_at) VALUES (?1, ?2, 1, ?3)",
        params![name, employee_code, now.to_rfc3339()],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Duplicate(format!("employee_code already exists: {employee_code}"))
        }
        other => other.into(),
    })?;
    let id = conn.last_insert_rowid();
    Ok(User {
        id,
        name: name.to_string(),
        employee_code: employee_code.to_string(),
        active: true,
        created_at: now,
    })
}

fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        employee_code: row.get(2)?,
        active: row.get::<_, i64>(3)? != 0,
        created_at: parse_utc(&row.get::<_, String>(4)?),
    })
}

const USER_COLUMNS: &str = "id, name, employee_code, active, created_at";

pub fn get_user(conn: &Connection, user_id: i64) -> Result<Option<User>, StoreError> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![user_id],
        user_from_row,
    )
    .optional()
    .map_err(StoreError::from)
}

pub fn get_user_by_code(conn: &Connection, employee_code: &str) -> Result<Option<User>, StoreError> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE employee_code = ?1"),
        params![employee_code],
        user_from_row,
    )
    .optional()
    .map_err(StoreError::from)
}

pub fn list_users(conn: &Connection, active_only: bool) -> Result<Vec<User>, StoreError> {
    let sql = if active_only {
        format!("SELECT {USER_COLUMNS} FROM users WHERE active = 1 ORDER BY name")
    } else {
        format!("SELECT {USER_COLUMNS} FROM users ORDER BY name")
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], user_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn list_users_with_template_counts(conn: &Connection) -> Result<Vec<UserSummary>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.name, u.employee_code, u.active, u.created_at,
                (SELECT COUNT(*) FROM templates t WHERE t.user_id = u.id)
         FROM users u ORDER BY u.name",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(UserSummary {
            id: row.get(0)?,
            name: row.get(1)?,
            employee_code: row.get(2)?,
            active: row.get::<_, i64>(3)? != 0,
            created_at: parse_utc(&row.get::<_, String>(4)?),
            template_count: row.get(5)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn deactivate_user(conn: &Connection, user_id: i64) -> Result<(), StoreError> {
    let changed = conn.execute("UPDATE users SET active = 0 WHERE id = ?1", params![user_id])?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("user {user_id}")));
    }
    Ok(())
}

/// Deletes a user, cascading templates and devices (FK `ON DELETE CASCADE`)
/// and explicitly removing punches (the ledger has no FK, by design).
pub fn delete_user(conn: &Connection, user_id: i64) -> Result<(), StoreError> {
    conn.execute("DELETE FROM punches WHERE user_id = ?1", params![user_id])?;
    let changed = conn.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("user {user_id}")));
    }
    Ok(())
}

pub fn add_template(
    conn: &Connection,
    user_id: i64,
    template_path: &str,
    quality: i64,
) -> Result<Template, StoreError> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO templates (user_id, template_path, quality, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, template_path, quality, now.to_rfc3339()],
    )?;
    Ok(Template {
        id: conn.last_insert_rowid(),
        user_id,
        template_path: template_path.to_string(),
        quality,
        created_at: now,
    })
}

pub fn get_user_templates(conn: &Connection, user_id: i64) -> Result<Vec<Template>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, template_path, quality, created_at FROM templates WHERE user_id = ?1",
    )?;
    let rows = stmt.query_map(params![user_id], template_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn template_from_row(row: &rusqlite::Row) -> rusqlite::Result<Template> {
    Ok(Template {
        id: row.get(0)?,
        user_id: row.get(1)?,
        template_path: row.get(2)?,
        quality: row.get(3)?,
        created_at: parse_utc(&row.get::<_, String>(4)?),
    })
}

/// Templates joined to active users only, best quality first — the gallery
/// order the matcher relies on for deterministic tie-breaking.
pub fn get_all_templates(conn: &Connection) -> Result<Vec<Template>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.user_id, t.template_path, t.quality, t.created_at
         FROM templates t
         JOIN users u ON u.id = t.user_id
         WHERE u.active = 1
         ORDER BY t.quality DESC, t.id ASC",
    )?;
    let rows = stmt.query_map([], template_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
pub fn record_punch(
    conn: &Connection,
    user_id: i64,
    timestamp_utc: DateTime<Utc>,
    timestamp_local: NaiveDateTime,
    punch_type: PunchType,
    match_score: i64,
    device_id: &str,
) -> Result<Punch, StoreError> {
    conn.execute(
        "INSERT INTO punches (user_id, timestamp_utc, timestamp_local, punch_type, match_score, device_id, synced)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
        params![
            user_id,
            timestamp_utc.to_rfc3339(),
            timestamp_local.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            punch_type.as_str(),
            match_score,
            device_id,
        ],
    )?;
    Ok(Punch {
        id: conn.last_insert_rowid(),
        user_id,
        timestamp_utc,
        timestamp_local,
        punch_type,
        match_score,
        device_id: device_id.to_string(),
        synced: false,
        sync_error: None,
        sync_at: None,
    })
}

fn punch_from_row(row: &rusqlite::Row) -> rusqlite::Result<Punch> {
    let punch_type_str: String = row.get(4)?;
    Ok(Punch {
        id: row.get(0)?,
        user_id: row.get(1)?,
        timestamp_utc: parse_utc(&row.get::<_, String>(2)?),
        timestamp_local: parse_local(&row.get::<_, String>(3)?),
        punch_type: PunchType::parse(&punch_type_str).unwrap_or(PunchType::In),
        match_score: row.get(5)?,
        device_id: row.get(6)?,
        synced: row.get::<_, i64>(7)? != 0,
        sync_error: row.get(8)?,
        sync_at: row.get::<_, Option<String>>(9)?.map(|s| parse_utc(&s)),
    })
}

const PUNCH_COLUMNS: &str =
    "id, user_id, timestamp_utc, timestamp_local, punch_type, match_score, device_id, synced, sync_error, sync_at";

pub fn get_last_punch(conn: &Connection, user_id: i64) -> Result<Option<Punch>, StoreError> {
    conn.query_row(
        &format!(
            "SELECT {PUNCH_COLUMNS} FROM punches WHERE user_id = ?1 ORDER BY timestamp_utc DESC LIMIT 1"
        ),
        params![user_id],
        punch_from_row,
    )
    .optional()
    .map_err(StoreError::from)
}

/// Count of punches for `user_id` since local midnight of the kiosk's local
/// time (not UTC) — `local_midnight` is supplied by the caller so this
/// function stays free of wall-clock access and is trivially testable.
pub fn get_user_punch_count_today(
    conn: &Connection,
    user_id: i64,
    local_midnight: NaiveDateTime,
) -> Result<i64, StoreError> {
    conn.query_row(
        "SELECT COUNT(*) FROM punches WHERE user_id = ?1 AND timestamp_local >= ?2",
        params![
            user_id,
            local_midnight.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
        ],
        |row| row.get(0),
    )
    .map_err(StoreError::from)
}

pub fn get_unsynced_punches(conn: &Connection, limit: i64) -> Result<Vec<Punch>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PUNCH_COLUMNS} FROM punches WHERE synced = 0 ORDER BY timestamp_utc ASC LIMIT ?1"
    ))?;
    let rows = stmt.query_map(params![limit], punch_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn mark_punches_synced(conn: &Connection, ids: &[i64]) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();
    for id in ids {
        conn.execute(
            "UPDATE punches SET synced = 1, sync_at = ?2, sync_error = NULL WHERE id = ?1",
            params![id, now],
        )?;
    }
    Ok(())
}

pub fn mark_punch_sync_error(conn: &Connection, id: i64, message: &str) -> Result<(), StoreError> {
    let truncated: String = message.chars().take(500).collect();
    conn.execute(
        "UPDATE punches SET sync_error = ?2 WHERE id = ?1",
        params![id, truncated],
    )?;
    Ok(())
}

pub fn get_punches(
    conn: &Connection,
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    user_id: Option<i64>,
) -> Result<Vec<Punch>, StoreError> {
    let mut sql = format!("SELECT {PUNCH_COLUMNS} FROM punches WHERE 1=1");
    let mut bind: Vec<String> = Vec::new();
    if let Some(s) = start {
        sql.push_str(" AND timestamp_local >= ?");
        bind.push(s.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Some(e) = end {
        sql.push_str(" AND timestamp_local <= ?");
        bind.push(e.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Some(uid) = user_id {
        sql.push_str(" AND user_id = ?");
        bind.push(uid.to_string());
    }
    sql.push_str(" ORDER BY timestamp_local ASC");

    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
    let rows = stmt.query_map(params_ref.as_slice(), punch_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn register_device(
    conn: &Connection,
    user_id: i64,
    token: &str,
    name: &str,
    user_agent: Option<&str>,
) -> Result<Device, StoreError> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO devices (user_id, token, name, created_at, enrolled_user_agent) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, token, name, now.to_rfc3339(), user_agent],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Duplicate("device token already registered".to_string())
        }
        other => other.into(),
    })?;
    Ok(Device {
        id: conn.last_insert_rowid(),
        user_id,
        token: token.to_string(),
        name: name.to_string(),
        created_at: now,
        enrolled_user_agent: user_agent.map(str::to_string),
    })
}

fn device_from_row(row: &rusqlite::Row) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get(0)?,
        user_id: row.get(1)?,
        token: row.get(2)?,
        name: row.get(3)?,
        created_at: parse_utc(&row.get::<_, String>(4)?),
        enrolled_user_agent: row.get(5)?,
    })
}

const DEVICE_COLUMNS: &str = "id, user_id, token, name, created_at, enrolled_user_agent";

pub fn get_device_by_token(conn: &Connection, token: &str) -> Result<Option<DeviceWithUser>, StoreError> {
    let device = conn
        .query_row(
            &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE token = ?1"),
            params![token],
            device_from_row,
        )
        .optional()?;
    let Some(device) = device else {
        return Ok(None);
    };
    let user = get_user(conn, device.user_id)?
        .ok_or_else(|| StoreError::Constraint(format!("device {} has no owning user", device.id)))?;
    Ok(Some(DeviceWithUser { device, user }))
}

pub fn update_device_user_agent(conn: &Connection, token: &str, user_agent: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE devices SET enrolled_user_agent = ?2 WHERE token = ?1",
        params![token, user_agent],
    )?;
    Ok(())
}

pub fn list_devices(conn: &Connection) -> Result<Vec<DeviceWithUser>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DEVICE_COLUMNS} FROM devices ORDER BY created_at DESC"
    ))?;
    let rows = stmt.query_map([], device_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        let device = row?;
        let user = get_user(conn, device.user_id)?
            .ok_or_else(|| StoreError::Constraint(format!("device {} has no owning user", device.id)))?;
        out.push(DeviceWithUser { device, user });
    }
    Ok(out)
}

pub fn delete_device(conn: &Connection, device_id: i64) -> Result<(), StoreError> {
    let changed = conn.execute("DELETE FROM devices WHERE id = ?1", params![device_id])?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("device {device_id}")));
    }
    Ok(())
}

pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
    conn.query_row(
        "SELECT value FROM settings WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .map_err(StoreError::from)
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}
