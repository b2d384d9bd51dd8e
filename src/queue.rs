//! The sign-in queue kept in sign_in_log.
//!
//! Each individual sign-in is one row. Its status is derived, not trusted:
//! a ProcessedAt stamp means Processed, a contact id or a "claimed" status
//! cell means Claimed, otherwise the row is Pending. Processed is terminal;
//! claims never touch a processed row.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::dates::ymd;
use crate::error::{Error, Result};
use crate::lock::Held;
use crate::models::{QueueEntry, QueueStatus};
use crate::roster;
use crate::schema::{self, sign_in_log as log, ColumnMap};
use crate::store::{RowKey, RowUpdate};
use crate::workspace::Workspace;

/// Cells of a new queue row.
#[derive(Debug, Clone, Default)]
pub struct NewEntry {
    pub timestamp: String,
    pub id: String,
    pub name: String,
    pub school: String,
    pub group: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOutcome {
    pub claimed_by: String,
    pub applied: Vec<RowKey>,
    pub failed: Vec<RowKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub rows: usize,
    pub contact_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdMatchOutcome {
    pub matched: usize,
    pub rows: Vec<RowKey>,
}

pub fn derive_status(processed_at: &str, contact_id: &str, raw_status: &str) -> QueueStatus {
    if !processed_at.trim().is_empty() {
        return QueueStatus::Processed;
    }
    if !contact_id.trim().is_empty() {
        return QueueStatus::Claimed;
    }
    match QueueStatus::parse(raw_status) {
        Some(QueueStatus::Claimed) => QueueStatus::Claimed,
        Some(QueueStatus::Processed) => QueueStatus::Processed,
        _ => QueueStatus::Pending,
    }
}

fn status_of(map: &ColumnMap, cells: &[String]) -> QueueStatus {
    derive_status(
        map.get(cells, &log::PROCESSED_AT),
        map.get(cells, &log::CONTACT_ID),
        map.get(cells, &log::STATUS),
    )
}

/// Split the free-form mentor cell: "First Last" is a name, anything else an id.
pub fn split_mentor(raw: &str) -> (String, String) {
    let raw = raw.trim();
    if raw.is_empty() {
        return (String::new(), String::new());
    }
    let leading = raw.chars().take_while(char::is_ascii_alphabetic).count();
    let rest = &raw[leading..];
    let after_space = rest.trim_start();
    let looks_like_name = leading > 0
        && after_space.len() < rest.len()
        && after_space
            .chars()
            .next()
            .is_some_and(|ch| ch.is_ascii_alphabetic());
    if looks_like_name {
        (String::new(), raw.to_string())
    } else {
        (raw.to_uppercase(), String::new())
    }
}

pub async fn append_locked(ws: &Workspace, held: &Held<'_>, entry: NewEntry) -> Result<RowKey> {
    let store = ws.store();
    let map = schema::ensure_table(store, log::TABLE.name, &log::TABLE).await?;
    let mut row = map.blank_row();
    map.put(&mut row, &log::TIMESTAMP, entry.timestamp)?;
    map.put(&mut row, &log::ID, entry.id.as_str())?;
    map.put(&mut row, &log::NAME, entry.name)?;
    map.put(&mut row, &log::SCHOOL, entry.school)?;
    map.put(&mut row, &log::STATUS, QueueStatus::Pending.as_str())?;
    map.put_if_present(&mut row, &log::GROUP, entry.group);
    let key = held.append_row(log::TABLE.name, row).await?;
    roster::invalidate(ws);
    debug!(id = %entry.id, row = key, "queued sign-in");
    Ok(key)
}

/// Queue rows signed in on `date`. `viewer` marks rows they claimed as `mine`.
pub async fn list(ws: &Workspace, date: NaiveDate, viewer: Option<&str>) -> Result<Vec<QueueEntry>> {
    let store = ws.store();
    let Some(map) = schema::inspect(store, log::TABLE.name, &log::TABLE).await? else {
        return Ok(Vec::new());
    };
    let viewer = viewer.map(str::trim).filter(|who| !who.is_empty());

    let mut items = Vec::new();
    for row in store.rows(log::TABLE.name).await? {
        let cells = &row.cells;
        let timestamp = map.get(cells, &log::TIMESTAMP);
        if ws.clock.calendar_day(timestamp) != Some(date) {
            continue;
        }
        let id = map.get(cells, &log::ID);
        if id.is_empty() {
            continue;
        }
        let (mentor_id, mentor_name) = split_mentor(map.get(cells, &log::MENTOR));
        let claimed_by = map.get(cells, &log::CLAIMED_BY);
        items.push(QueueEntry {
            row_key: row.key,
            timestamp: timestamp.to_string(),
            id: id.to_string(),
            display_name: map.get(cells, &log::NAME).to_string(),
            school: map.get(cells, &log::SCHOOL).to_string(),
            group: map.get(cells, &log::GROUP).to_string(),
            mentor_id,
            mentor_name,
            status: status_of(&map, cells),
            claimed_by: claimed_by.to_string(),
            claimed_at: map.get(cells, &log::CLAIMED_AT).to_string(),
            processed_at: map.get(cells, &log::PROCESSED_AT).to_string(),
            contact_id: map.get(cells, &log::CONTACT_ID).to_string(),
            mine: viewer.is_some_and(|who| !claimed_by.is_empty() && who.eq_ignore_ascii_case(claimed_by)),
        });
    }

    if items.iter().any(|item| item.display_name.is_empty()) {
        let index = roster::directory(ws).await?;
        for item in items.iter_mut().filter(|item| item.display_name.is_empty()) {
            item.display_name = index.display_name(&item.id);
        }
    }
    Ok(items)
}

/// Claim rows for `claimant`. Processed or vanished rows are reported in `failed`.
pub async fn claim_locked(
    ws: &Workspace,
    held: &Held<'_>,
    keys: &[RowKey],
    claimant: &str,
) -> Result<ClaimOutcome> {
    if keys.is_empty() {
        return Err(Error::validation("No rows provided."));
    }
    let claimant = match claimant.trim() {
        "" => ws.settings.default_claimant.clone(),
        who => who.to_string(),
    };
    let store = ws.store();
    let map = schema::ensure_table(store, log::TABLE.name, &log::TABLE).await?;
    let status_col = map.require(&log::STATUS)?;
    let claimed_by_col = map.require(&log::CLAIMED_BY)?;
    let claimed_at_col = map.require(&log::CLAIMED_AT)?;
    let now = ws.clock.stamp();

    let mut outcome = ClaimOutcome {
        claimed_by: claimant.clone(),
        ..ClaimOutcome::default()
    };
    let mut updates = Vec::new();
    let mut seen = HashSet::new();
    for &key in keys {
        if !seen.insert(key) {
            continue;
        }
        match store.row(log::TABLE.name, key).await? {
            Some(row) if status_of(&map, &row.cells) != QueueStatus::Processed => {
                updates.push(
                    RowUpdate::new(key)
                        .set(status_col, QueueStatus::Claimed.as_str())
                        .set(claimed_by_col, claimant.as_str())
                        .set(claimed_at_col, now.as_str()),
                );
            }
            _ => outcome.failed.push(key),
        }
    }
    outcome.applied = held.update_rows(log::TABLE.name, &updates).await?;
    info!(
        claimant = %claimant,
        applied = outcome.applied.len(),
        failed = outcome.failed.len(),
        "claimed queue rows"
    );
    Ok(outcome)
}

/// Stamp rows Processed with `contact_id`, whatever their current status.
/// Keys that no longer exist are skipped.
pub async fn mark_processed_locked(
    ws: &Workspace,
    held: &Held<'_>,
    keys: &[RowKey],
    contact_id: &str,
) -> Result<ProcessOutcome> {
    if keys.is_empty() {
        return Err(Error::validation("No rows to mark processed."));
    }
    let contact_id = contact_id.trim().to_string();
    let store = ws.store();
    let map = schema::ensure_table(store, log::TABLE.name, &log::TABLE).await?;
    let status_col = map.require(&log::STATUS)?;
    let processed_col = map.require(&log::PROCESSED_AT)?;
    let contact_col = map.require(&log::CONTACT_ID)?;
    let now = ws.clock.stamp();

    let unique: Vec<RowKey> = {
        let mut seen = HashSet::new();
        keys.iter().copied().filter(|key| seen.insert(*key)).collect()
    };
    let updates: Vec<RowUpdate> = unique
        .iter()
        .map(|&key| {
            RowUpdate::new(key)
                .set(status_col, QueueStatus::Processed.as_str())
                .set(processed_col, now.as_str())
                .set(contact_col, contact_id.as_str())
        })
        .collect();
    let applied = held.update_rows(log::TABLE.name, &updates).await?;
    info!(contact = %contact_id, rows = applied.len(), "marked queue rows processed");
    Ok(ProcessOutcome {
        rows: applied.len(),
        contact_id,
    })
}

/// Attach `contact_id` to every row on `date` whose id is in `ids`.
///
/// The contact cell keeps a comma-separated set of ids. ProcessedAt is
/// stamped whenever a contact id is given, and a processed row keeps its
/// Processed status whatever `status` asks for.
pub async fn mark_processed_by_ids_locked(
    ws: &Workspace,
    held: &Held<'_>,
    date: NaiveDate,
    ids: &[String],
    contact_id: &str,
    status: Option<QueueStatus>,
) -> Result<IdMatchOutcome> {
    let wanted: HashSet<String> = ids
        .iter()
        .map(|id| id.trim().to_uppercase())
        .filter(|id| !id.is_empty())
        .collect();
    if wanted.is_empty() {
        return Err(Error::validation("No IDs provided."));
    }
    let requested = status.unwrap_or(QueueStatus::Claimed);
    let contact_id = contact_id.trim();

    let store = ws.store();
    let map = schema::ensure_table(store, log::TABLE.name, &log::TABLE).await?;
    let status_col = map.require(&log::STATUS)?;
    let processed_col = map.require(&log::PROCESSED_AT)?;
    let contact_col = map.require(&log::CONTACT_ID)?;
    let now = ws.clock.stamp();

    let mut updates = Vec::new();
    for row in store.rows(log::TABLE.name).await? {
        let cells = &row.cells;
        if ws.clock.calendar_day(map.get(cells, &log::TIMESTAMP)) != Some(date) {
            continue;
        }
        let id = map.get(cells, &log::ID);
        if id.is_empty() || !wanted.contains(&id.to_uppercase()) {
            continue;
        }

        let next_status = if status_of(&map, cells) == QueueStatus::Processed {
            QueueStatus::Processed
        } else {
            requested
        };
        let mut update = RowUpdate::new(row.key)
            .set(status_col, next_status.as_str())
            .set(contact_col, merge_contact_ids(map.get(cells, &log::CONTACT_ID), contact_id));
        if !contact_id.is_empty() {
            update = update.set(processed_col, now.as_str());
        }
        updates.push(update);
    }

    let rows = held.update_rows(log::TABLE.name, &updates).await?;
    info!(date = %ymd(date), matched = rows.len(), "attached contact to queue rows by id");
    Ok(IdMatchOutcome {
        matched: rows.len(),
        rows,
    })
}

/// Append `contact_id` to a comma-separated set unless already present.
pub fn merge_contact_ids(current: &str, contact_id: &str) -> String {
    let mut parts: Vec<&str> = current
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    if !contact_id.is_empty() && !parts.contains(&contact_id) {
        parts.push(contact_id);
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::testing::workspace;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    async fn enqueue(ws: &Workspace, id: &str, name: &str, timestamp: &str) -> RowKey {
        let held = ws.lock.acquire().await.unwrap();
        append_locked(
            ws,
            &held,
            NewEntry {
                timestamp: timestamp.to_string(),
                id: id.to_string(),
                name: name.to_string(),
                school: "Lincoln".to_string(),
                group: "Front Desk".to_string(),
            },
        )
        .await
        .unwrap()
    }

    #[test]
    fn status_derivation_prefers_stamps() {
        assert_eq!(derive_status("2025-03-01", "", "Pending"), QueueStatus::Processed);
        assert_eq!(derive_status("", "abc", "Pending"), QueueStatus::Claimed);
        assert_eq!(derive_status("", "", "CLAIMED"), QueueStatus::Claimed);
        assert_eq!(derive_status("", "", "processed"), QueueStatus::Processed);
        assert_eq!(derive_status("", "", "whatever"), QueueStatus::Pending);
    }

    #[test]
    fn mentor_cell_splits_names_from_ids() {
        assert_eq!(split_mentor("Maria Lopez"), (String::new(), "Maria Lopez".into()));
        assert_eq!(split_mentor("m042"), ("M042".into(), String::new()));
        assert_eq!(split_mentor("Maria"), ("MARIA".into(), String::new()));
        assert_eq!(split_mentor(""), (String::new(), String::new()));
    }

    #[test]
    fn contact_ids_accumulate_without_duplicates() {
        assert_eq!(merge_contact_ids("", "c1"), "c1");
        assert_eq!(merge_contact_ids("c1", "c2"), "c1, c2");
        assert_eq!(merge_contact_ids("c1, c2", "c1"), "c1, c2");
        assert_eq!(merge_contact_ids("c1", ""), "c1");
    }

    #[tokio::test]
    async fn list_filters_by_calendar_day_and_backfills_names() {
        let ws = workspace();
        enqueue(&ws, "S100", "Ana Ruiz", "2025-03-01T09:00:00-06:00").await;
        enqueue(&ws, "S200", "", "2025-03-01T19:30:00-06:00").await;
        // 01:00 UTC on the 2nd is the evening of the 1st at UTC-6
        enqueue(&ws, "S300", "Late Kid", "2025-03-02T01:00:00Z").await;
        enqueue(&ws, "S400", "Tomorrow", "2025-03-02T09:00:00-06:00").await;

        let items = list(&ws, day(), None).await.unwrap();
        let ids: Vec<&str> = items.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["S100", "S200", "S300"]);
        assert_eq!(items[1].display_name, "S200");
        assert!(items.iter().all(|item| item.status == QueueStatus::Pending));
    }

    #[tokio::test]
    async fn processed_rows_cannot_be_claimed() {
        let ws = workspace();
        let open = enqueue(&ws, "S100", "Ana Ruiz", "2025-03-01T09:00:00-06:00").await;
        let done = enqueue(&ws, "S200", "Ben Ode", "2025-03-01T09:05:00-06:00").await;

        let held = ws.lock.acquire().await.unwrap();
        mark_processed_locked(&ws, &held, &[done], "contact-1").await.unwrap();
        let outcome = claim_locked(&ws, &held, &[open, done, 999], "staffA").await.unwrap();
        assert_eq!(outcome.applied, vec![open]);
        assert_eq!(outcome.failed, vec![done, 999]);
        drop(held);

        let items = list(&ws, day(), Some("STAFFA")).await.unwrap();
        assert_eq!(items[0].status, QueueStatus::Claimed);
        assert_eq!(items[0].claimed_by, "staffA");
        assert!(items[0].mine);
        assert_eq!(items[1].status, QueueStatus::Processed);
        assert!(items[1].claimed_by.is_empty());
    }

    #[tokio::test]
    async fn reclaim_moves_to_the_last_claimant_and_blank_uses_default() {
        let ws = workspace();
        let key = enqueue(&ws, "S100", "Ana Ruiz", "2025-03-01T09:00:00-06:00").await;
        let held = ws.lock.acquire().await.unwrap();
        claim_locked(&ws, &held, &[key], "staffA").await.unwrap();
        let outcome = claim_locked(&ws, &held, &[key], "  ").await.unwrap();
        assert_eq!(outcome.claimed_by, "unknown");
        assert!(claim_locked(&ws, &held, &[], "staffA").await.is_err());
        drop(held);
        assert_eq!(list(&ws, day(), None).await.unwrap()[0].claimed_by, "unknown");
    }

    #[tokio::test]
    async fn mark_processed_skips_rows_past_the_table() {
        let ws = workspace();
        let key = enqueue(&ws, "S100", "Ana Ruiz", "2025-03-01T09:00:00-06:00").await;
        let held = ws.lock.acquire().await.unwrap();
        let outcome = mark_processed_locked(&ws, &held, &[key, key, 42], " c-9 ").await.unwrap();
        assert_eq!(outcome, ProcessOutcome { rows: 1, contact_id: "c-9".into() });
        let err = mark_processed_locked(&ws, &held, &[], "c-9").await.unwrap_err();
        assert_eq!(err.to_string(), "No rows to mark processed.");
        drop(held);

        let item = &list(&ws, day(), None).await.unwrap()[0];
        assert_eq!(item.status, QueueStatus::Processed);
        assert_eq!(item.contact_id, "c-9");
        assert_eq!(item.processed_at, "2025-03-01T09:15:00-06:00");
    }

    #[tokio::test]
    async fn by_ids_matches_case_insensitively_and_never_downgrades() {
        let ws = workspace();
        let first = enqueue(&ws, "s100", "Ana Ruiz", "2025-03-01T09:00:00-06:00").await;
        let second = enqueue(&ws, "S200", "Ben Ode", "2025-03-01T09:05:00-06:00").await;
        enqueue(&ws, "S100", "Ana Ruiz", "2025-02-28T09:00:00-06:00").await;

        let held = ws.lock.acquire().await.unwrap();
        mark_processed_locked(&ws, &held, &[second], "c-1").await.unwrap();
        let outcome = mark_processed_by_ids_locked(
            &ws,
            &held,
            day(),
            &["S100".to_string(), "s200".to_string()],
            "c-2",
            None,
        )
        .await
        .unwrap();
        assert_eq!(outcome.matched, 2);
        assert_eq!(outcome.rows, vec![first, second]);

        let err = mark_processed_by_ids_locked(&ws, &held, day(), &[" ".into()], "c-2", None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No IDs provided.");
        drop(held);

        let items = list(&ws, day(), None).await.unwrap();
        assert_eq!(items[0].contact_id, "c-2");
        assert_eq!(items[0].status, QueueStatus::Processed);
        assert_eq!(items[1].contact_id, "c-1, c-2");
        assert_eq!(items[1].status, QueueStatus::Processed);
        let raw = ws.store().row("sign_in_log", second).await.unwrap().unwrap();
        assert!(raw.cells.contains(&"Processed".to_string()));
    }
}
