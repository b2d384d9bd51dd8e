//! Labeled sign-in sessions scoped to a calendar day.
//!
//! A session is identified to staff by (date, label, type). Starting a
//! session that already exists under that key returns it, reactivating it
//! first when it was closed. Sessions are never deleted.

use chrono::NaiveDate;
use tracing::info;
use uuid::Uuid;

use crate::dates::ymd;
use crate::error::{Error, Result};
use crate::lock::Held;
use crate::models::{SessionType, SignInSession};
use crate::roster::normalize_text;
use crate::schema::{self, sign_in_sessions as ss, ColumnMap};
use crate::store::{RowUpdate, StoredRow};
use crate::workspace::Workspace;

/// What `start_locked` did to reach the returned session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Started {
    Created,
    Reactivated,
    Existing,
}

fn is_active_cell(raw: &str) -> bool {
    !matches!(raw.trim().to_ascii_lowercase().as_str(), "false" | "0")
}

fn hydrate(ws: &Workspace, map: &ColumnMap, row: &StoredRow) -> SignInSession {
    let cells = &row.cells;
    SignInSession {
        row_key: row.key,
        id: map.get(cells, &ss::SESSION_ID).to_string(),
        label: map.get(cells, &ss::LABEL).to_string(),
        session_type: SessionType::parse(map.get(cells, &ss::TYPE)),
        date: ws
            .clock
            .calendar_day(map.get(cells, &ss::DATE))
            .map(ymd)
            .unwrap_or_default(),
        is_active: is_active_cell(map.get(cells, &ss::IS_ACTIVE)),
        created_at: map.get(cells, &ss::CREATED_AT).to_string(),
        closed_at: map.get(cells, &ss::CLOSED_AT).to_string(),
        last_sign_in_at: map.get(cells, &ss::LAST_SIGN_IN_AT).to_string(),
        sign_in_count: parse_count(map.get(cells, &ss::SIGN_IN_COUNT)),
    }
}

fn parse_count(raw: &str) -> u64 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|count| count.is_finite() && *count > 0.0)
        .map(|count| count as u64)
        .unwrap_or(0)
}

async fn load(ws: &Workspace) -> Result<Option<(ColumnMap, Vec<StoredRow>)>> {
    let store = ws.store();
    let Some(map) = schema::inspect(store, ss::TABLE.name, &ss::TABLE).await? else {
        return Ok(None);
    };
    let rows = store.rows(ss::TABLE.name).await?;
    Ok(Some((map, rows)))
}

pub async fn find(ws: &Workspace, session_id: &str) -> Result<Option<SignInSession>> {
    let session_id = session_id.trim();
    if session_id.is_empty() {
        return Ok(None);
    }
    let Some((map, rows)) = load(ws).await? else {
        return Ok(None);
    };
    Ok(rows
        .iter()
        .find(|row| map.get(&row.cells, &ss::SESSION_ID) == session_id)
        .map(|row| hydrate(ws, &map, row)))
}

/// Active sessions on `date`, sorted by label.
pub async fn list_active(ws: &Workspace, date: NaiveDate) -> Result<Vec<SignInSession>> {
    let Some((map, rows)) = load(ws).await? else {
        return Ok(Vec::new());
    };
    let day = ymd(date);
    let mut sessions: Vec<SignInSession> = rows
        .iter()
        .map(|row| hydrate(ws, &map, row))
        .filter(|session| session.is_active && session.date == day)
        .collect();
    sessions.sort_by(|a, b| a.label.cmp(&b.label));
    Ok(sessions)
}

pub async fn start_locked(
    ws: &Workspace,
    held: &Held<'_>,
    label: &str,
    date: NaiveDate,
    session_type: SessionType,
) -> Result<(SignInSession, Started)> {
    let label = label.trim();
    if label.is_empty() {
        return Err(Error::validation("Session label is required."));
    }
    let store = ws.store();
    let map = schema::ensure_table(store, ss::TABLE.name, &ss::TABLE).await?;
    let day = ymd(date);
    let wanted = normalize_text(label);

    let rows = store.rows(ss::TABLE.name).await?;
    let existing = rows
        .iter()
        .map(|row| hydrate(ws, &map, row))
        .find(|session| {
            session.date == day
                && normalize_text(&session.label) == wanted
                && session.session_type == session_type
        });

    if let Some(mut session) = existing {
        if session.is_active {
            return Ok((session, Started::Existing));
        }
        let update = RowUpdate::new(session.row_key)
            .set(map.require(&ss::IS_ACTIVE)?, "true")
            .set(map.require(&ss::CLOSED_AT)?, "");
        held.update_rows(ss::TABLE.name, &[update]).await?;
        session.is_active = true;
        session.closed_at.clear();
        info!(session = %session.id, label, date = %day, "reactivated sign-in session");
        return Ok((session, Started::Reactivated));
    }

    let id = Uuid::new_v4().to_string();
    let created_at = ws.clock.stamp();
    let mut row = map.blank_row();
    map.put(&mut row, &ss::SESSION_ID, id.as_str())?;
    map.put(&mut row, &ss::LABEL, label)?;
    map.put(&mut row, &ss::TYPE, session_type.as_str())?;
    map.put(&mut row, &ss::DATE, day.as_str())?;
    map.put(&mut row, &ss::IS_ACTIVE, "true")?;
    map.put(&mut row, &ss::CREATED_AT, created_at.as_str())?;
    map.put(&mut row, &ss::SIGN_IN_COUNT, "0")?;
    let row_key = held.append_row(ss::TABLE.name, row).await?;
    info!(session = %id, label, date = %day, kind = session_type.as_str(), "started sign-in session");

    Ok((
        SignInSession {
            row_key,
            id,
            label: label.to_string(),
            session_type,
            date: day,
            is_active: true,
            created_at,
            closed_at: String::new(),
            last_sign_in_at: String::new(),
            sign_in_count: 0,
        },
        Started::Created,
    ))
}

/// Close a session. Closing a closed session changes nothing.
pub async fn end_locked(ws: &Workspace, held: &Held<'_>, session_id: &str) -> Result<SignInSession> {
    if session_id.trim().is_empty() {
        return Err(Error::validation("Session ID is required."));
    }
    let Some(mut session) = find(ws, session_id).await? else {
        return Err(Error::not_found("Session not found."));
    };
    if !session.is_active {
        return Ok(session);
    }
    let store = ws.store();
    let map = schema::ensure_table(store, ss::TABLE.name, &ss::TABLE).await?;
    let closed_at = ws.clock.stamp();
    let update = RowUpdate::new(session.row_key)
        .set(map.require(&ss::IS_ACTIVE)?, "false")
        .set(map.require(&ss::CLOSED_AT)?, closed_at.as_str());
    held.update_rows(ss::TABLE.name, &[update]).await?;
    session.is_active = false;
    session.closed_at = closed_at;
    info!(session = %session.id, label = %session.label, "closed sign-in session");
    Ok(session)
}

/// Bump the sign-in counter and stamp LastSignInAt.
pub async fn record_activity_locked(
    ws: &Workspace,
    held: &Held<'_>,
    session: &SignInSession,
    at: &str,
) -> Result<u64> {
    let store = ws.store();
    let map = schema::ensure_table(store, ss::TABLE.name, &ss::TABLE).await?;
    let current = store
        .row(ss::TABLE.name, session.row_key)
        .await?
        .map(|row| parse_count(map.get(&row.cells, &ss::SIGN_IN_COUNT)))
        .ok_or_else(|| Error::not_found("Session not found."))?;
    let count = current + 1;
    let update = RowUpdate::new(session.row_key)
        .set(map.require(&ss::LAST_SIGN_IN_AT)?, at)
        .set(map.require(&ss::SIGN_IN_COUNT)?, count.to_string());
    held.update_rows(ss::TABLE.name, &[update]).await?;
    Ok(count)
}
