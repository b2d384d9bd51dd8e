//! Group and individual contact sessions with their participant and mentor links.
//!
//! Group sessions are unique per (date, group) and are updated in place.
//! Their participant and mentor links are replaced wholesale on every save.
//! Individual sessions always get a fresh contact id.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::CacheKey;
use crate::dates::ymd;
use crate::error::{Error, Result};
use crate::lock::Held;
use crate::mentors;
use crate::models::{
    parse_minutes, GroupNote, GroupPrefill, IndividualContactPayload, LinkedPerson, PersonRef,
    RecentContact,
};
use crate::queue::{self, ProcessOutcome};
use crate::roster;
use crate::schema::{
    self, group_contact_mentors as gm, group_contact_participants as gp,
    group_contact_sessions as gs, individual_contact_participants as icp,
    individual_contact_sessions as ics, ColumnMap,
};
use crate::store::{RowKey, RowUpdate, StoredRow};
use crate::workspace::Workspace;

pub const DEFAULT_RECENT_PER_ID: usize = 5;
pub const MAX_RECENT_PER_ID: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpsert {
    pub contact_id: String,
    pub created: bool,
    pub updated: bool,
}

#[derive(Debug)]
pub struct IndividualSaved {
    pub contact_id: String,
    pub participants_saved: usize,
    /// Queue cascade: `None` when no queue rows were tied to the note.
    pub processed: Option<Result<ProcessOutcome>>,
}

/// One day's group sessions and mentor links, sliced per group on demand.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DayIndex {
    sessions: HashMap<String, GroupPrefill>,
}

fn same_session(
    ws: &Workspace,
    map: &ColumnMap,
    cells: &[String],
    date: NaiveDate,
    group: &str,
) -> bool {
    map.get(cells, &gs::GROUP) == group
        && ws.clock.calendar_day(map.get(cells, &gs::DATE)) == Some(date)
}

fn note_of(map: &ColumnMap, cells: &[String]) -> GroupNote {
    GroupNote {
        topic: map.get(cells, &gs::TOPIC).to_string(),
        summary: map.get(cells, &gs::SUMMARY).to_string(),
        duration: parse_minutes(map.get(cells, &gs::DURATION)),
    }
}

fn invalidate_prefill(ws: &Workspace) {
    ws.cache
        .remove_matching(|key| matches!(key, CacheKey::GroupPrefill(_)));
}

/// Find the live row for (date, group), trying the cached row hint first.
async fn locate_group_row(
    ws: &Workspace,
    map: &ColumnMap,
    date: NaiveDate,
    group: &str,
) -> Result<Option<StoredRow>> {
    let store = ws.store();
    let hint_key = CacheKey::GroupSessionHint {
        date: ymd(date),
        group: group.to_string(),
    };
    if let Some(hint) = ws.cache.get::<RowKey>(&hint_key) {
        match store.row(gs::TABLE.name, hint).await? {
            Some(row) if same_session(ws, map, &row.cells, date, group) => return Ok(Some(row)),
            _ => {
                debug!(group, row = hint, "stale group session hint");
                ws.cache.remove(&hint_key);
            }
        }
    }
    let found = store
        .rows(gs::TABLE.name)
        .await?
        .into_iter()
        .find(|row| same_session(ws, map, &row.cells, date, group));
    if let Some(row) = &found {
        ws.cache.put(hint_key, &row.key);
    }
    Ok(found)
}

/// Create or update the group session for (date, group).
pub async fn upsert_group_session_locked(
    ws: &Workspace,
    held: &Held<'_>,
    date: NaiveDate,
    group: &str,
    note: &GroupNote,
) -> Result<GroupUpsert> {
    let group = group.trim();
    if group.is_empty() {
        return Err(Error::validation("Missing group."));
    }
    let store = ws.store();
    let map = schema::ensure_table(store, gs::TABLE.name, &gs::TABLE).await?;
    let now = ws.clock.stamp();
    let day = ymd(date);

    let outcome = match locate_group_row(ws, &map, date, group).await? {
        Some(row) => {
            let mut contact_id = map.get(&row.cells, &gs::CONTACT_ID).to_string();
            let mut update = RowUpdate::new(row.key)
                .set(map.require(&gs::TOPIC)?, note.topic.trim())
                .set(map.require(&gs::SUMMARY)?, note.summary.trim())
                .set(map.require(&gs::DURATION)?, note.duration.to_string())
                .set(map.require(&gs::EDITED_AT)?, now.as_str());
            if contact_id.is_empty() {
                contact_id = Uuid::new_v4().to_string();
                update = update.set(map.require(&gs::CONTACT_ID)?, contact_id.as_str());
            }
            held.update_rows(gs::TABLE.name, &[update]).await?;
            info!(contact = %contact_id, date = %day, group, "updated group contact session");
            GroupUpsert {
                contact_id,
                created: false,
                updated: true,
            }
        }
        None => {
            let contact_id = Uuid::new_v4().to_string();
            let mut row = map.blank_row();
            map.put(&mut row, &gs::CONTACT_ID, contact_id.as_str())?;
            map.put(&mut row, &gs::DATE, day.as_str())?;
            map.put(&mut row, &gs::GROUP, group)?;
            map.put(&mut row, &gs::TOPIC, note.topic.trim())?;
            map.put(&mut row, &gs::SUMMARY, note.summary.trim())?;
            map.put(&mut row, &gs::DURATION, note.duration.to_string())?;
            map.put(&mut row, &gs::CREATED_AT, now.as_str())?;
            map.put(&mut row, &gs::EDITED_AT, now.as_str())?;
            let key = held.append_row(gs::TABLE.name, row).await?;
            ws.cache.put(
                CacheKey::GroupSessionHint {
                    date: day.clone(),
                    group: group.to_string(),
                },
                &key,
            );
            info!(contact = %contact_id, date = %day, group, "created group contact session");
            GroupUpsert {
                contact_id,
                created: true,
                updated: false,
            }
        }
    };
    ws.cache.remove(&CacheKey::GroupPrefill(day));
    Ok(outcome)
}

/// Unique non-blank ids in first-seen order, with `normalize` applied to each id.
fn dedupe(people: &[LinkedPerson], normalize: fn(&str) -> String) -> Vec<LinkedPerson> {
    let mut seen = HashSet::new();
    people
        .iter()
        .filter_map(|person| {
            let id = normalize(person.id.trim());
            if id.is_empty() || !seen.insert(id.clone()) {
                return None;
            }
            Some(LinkedPerson {
                id,
                name: person.name.trim().to_string(),
            })
        })
        .collect()
}

/// Split "First Middle Last" into ("First Middle", "Last").
fn split_rest_last(full: &str) -> (String, String) {
    let words: Vec<&str> = full.split_whitespace().collect();
    match words.split_last() {
        Some((last, rest)) => (rest.join(" "), last.to_string()),
        None => (String::new(), String::new()),
    }
}

async fn drop_links(
    ws: &Workspace,
    held: &Held<'_>,
    map: &ColumnMap,
    table: &str,
    contact_id: &str,
    field: &schema::FieldDef,
) -> Result<usize> {
    let stale: Vec<RowKey> = ws
        .store()
        .rows(table)
        .await?
        .iter()
        .filter(|row| map.get(&row.cells, field) == contact_id)
        .map(|row| row.key)
        .collect();
    if stale.is_empty() {
        return Ok(0);
    }
    held.delete_rows(table, &stale).await
}

/// Replace the participant links of a group session. Returns the rows written.
pub async fn replace_participants_locked(
    ws: &Workspace,
    held: &Held<'_>,
    contact_id: &str,
    people: &[LinkedPerson],
) -> Result<usize> {
    let contact_id = contact_id.trim();
    if contact_id.is_empty() {
        return Err(Error::validation("Missing contactId"));
    }
    let store = ws.store();
    let map = schema::ensure_table(store, gp::TABLE.name, &gp::TABLE).await?;
    let now = ws.clock.stamp();
    let removed = drop_links(ws, held, &map, gp::TABLE.name, contact_id, &gp::CONTACT_ID).await?;

    let mut rows = Vec::new();
    for person in dedupe(people, |id| id.to_string()) {
        let (first, last) = split_rest_last(&person.name);
        let mut row = map.blank_row();
        map.put(&mut row, &gp::CONTACT_ID, contact_id)?;
        map.put(&mut row, &gp::STUDENT_ID, person.id)?;
        map.put(&mut row, &gp::FIRST_NAME, first)?;
        map.put(&mut row, &gp::LAST_NAME, last)?;
        map.put(&mut row, &gp::CREATED_AT, now.as_str())?;
        map.put(&mut row, &gp::EDITED_AT, now.as_str())?;
        rows.push(row);
    }
    let added = rows.len();
    if added > 0 {
        held.append_rows(gp::TABLE.name, rows).await?;
    }
    invalidate_prefill(ws);
    info!(contact = %contact_id, removed, added, "replaced group participants");
    Ok(added)
}

/// Replace the mentor links of a group session. Mentor ids are uppercased.
pub async fn replace_mentors_locked(
    ws: &Workspace,
    held: &Held<'_>,
    contact_id: &str,
    mentors: &[LinkedPerson],
) -> Result<usize> {
    let contact_id = contact_id.trim();
    if contact_id.is_empty() {
        return Err(Error::validation("Missing contactId"));
    }
    let store = ws.store();
    let map = schema::ensure_table(store, gm::TABLE.name, &gm::TABLE).await?;
    let now = ws.clock.stamp();
    let removed = drop_links(ws, held, &map, gm::TABLE.name, contact_id, &gm::CONTACT_ID).await?;

    let mut rows = Vec::new();
    for mentor in dedupe(mentors, str::to_uppercase) {
        let name = if mentor.name.is_empty() {
            mentor.id.clone()
        } else {
            mentor.name
        };
        let mut row = map.blank_row();
        map.put(&mut row, &gm::CONTACT_ID, contact_id)?;
        map.put(&mut row, &gm::MENTOR_ID, mentor.id)?;
        map.put(&mut row, &gm::NAME, name)?;
        map.put(&mut row, &gm::CREATED_AT, now.as_str())?;
        map.put(&mut row, &gm::EDITED_AT, now.as_str())?;
        rows.push(row);
    }
    let added = rows.len();
    if added > 0 {
        held.append_rows(gm::TABLE.name, rows).await?;
    }
    invalidate_prefill(ws);
    info!(contact = %contact_id, removed, added, "replaced group mentors");
    Ok(added)
}

/// The note saved most recently for (date, group), if any.
pub async fn latest_group_note(ws: &Workspace, date: NaiveDate, group: &str) -> Result<Option<GroupNote>> {
    let group = group.trim();
    if group.is_empty() {
        return Err(Error::validation("Missing group."));
    }
    let store = ws.store();
    let Some(map) = schema::inspect(store, gs::TABLE.name, &gs::TABLE).await? else {
        return Ok(None);
    };
    Ok(store
        .rows(gs::TABLE.name)
        .await?
        .iter()
        .rev()
        .find(|row| same_session(ws, &map, &row.cells, date, group))
        .map(|row| note_of(&map, &row.cells)))
}

async fn day_index(ws: &Workspace, date: NaiveDate) -> Result<DayIndex> {
    let key = CacheKey::GroupPrefill(ymd(date));
    if let Some(hit) = ws.cache.get::<DayIndex>(&key) {
        return Ok(hit);
    }
    let store = ws.store();
    let mut index = DayIndex::default();
    if let Some(map) = schema::inspect(store, gs::TABLE.name, &gs::TABLE).await? {
        for row in store.rows(gs::TABLE.name).await? {
            let cells = &row.cells;
            let group = map.get(cells, &gs::GROUP);
            if group.is_empty() || ws.clock.calendar_day(map.get(cells, &gs::DATE)) != Some(date) {
                continue;
            }
            let contact_id = map.get(cells, &gs::CONTACT_ID);
            index.sessions.insert(
                group.to_string(),
                GroupPrefill {
                    contact_id: (!contact_id.is_empty()).then(|| contact_id.to_string()),
                    note: Some(note_of(&map, cells)),
                    mentors: Vec::new(),
                },
            );
        }
    }

    let wanted: HashMap<String, String> = index
        .sessions
        .iter()
        .filter_map(|(group, prefill)| prefill.contact_id.clone().map(|id| (id, group.clone())))
        .collect();
    if !wanted.is_empty() {
        if let Some(map) = schema::inspect(store, gm::TABLE.name, &gm::TABLE).await? {
            for row in store.rows(gm::TABLE.name).await? {
                let cells = &row.cells;
                let Some(group) = wanted.get(map.get(cells, &gm::CONTACT_ID)) else {
                    continue;
                };
                let id = map.get(cells, &gm::MENTOR_ID);
                if id.is_empty() {
                    continue;
                }
                let name = match map.get(cells, &gm::NAME) {
                    "" => id,
                    name => name,
                };
                if let Some(prefill) = index.sessions.get_mut(group) {
                    prefill.mentors.push(LinkedPerson {
                        id: id.to_string(),
                        name: name.to_string(),
                    });
                }
            }
        }
    }
    ws.cache.put(key, &index);
    Ok(index)
}

/// Saved note, mentors and contact id for each requested group on `date`.
pub async fn group_prefill(
    ws: &Workspace,
    date: NaiveDate,
    groups: &[String],
) -> Result<BTreeMap<String, GroupPrefill>> {
    let mut index = day_index(ws, date).await?;
    Ok(groups
        .iter()
        .map(|group| group.trim())
        .filter(|group| !group.is_empty())
        .map(|group| {
            let prefill = index.sessions.remove(group).unwrap_or_default();
            (group.to_string(), prefill)
        })
        .collect())
}

/// File an individual note and stamp the related queue rows Processed.
///
/// Queue rows come from `queue_rows` when given, otherwise from the row
/// keys carried on `people`. A failing cascade is reported in the result
/// and does not undo the saved note.
pub async fn save_individual_locked(
    ws: &Workspace,
    held: &Held<'_>,
    date: NaiveDate,
    people: &[PersonRef],
    payload: &IndividualContactPayload,
    queue_rows: Option<&[RowKey]>,
) -> Result<IndividualSaved> {
    let mut seen = HashSet::new();
    let ids: Vec<&str> = people
        .iter()
        .map(|person| person.id.trim())
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .collect();
    if ids.is_empty() {
        return Err(Error::validation("Select at least one student."));
    }

    let store = ws.store();
    let sessions = schema::ensure_table(store, ics::TABLE.name, &ics::TABLE).await?;
    let links = schema::ensure_table(store, icp::TABLE.name, &icp::TABLE).await?;
    let contact_id = Uuid::new_v4().to_string();
    let now = ws.clock.stamp();

    let mut row = sessions.blank_row();
    sessions.put(&mut row, &ics::CONTACT_ID, contact_id.as_str())?;
    sessions.put(&mut row, &ics::DATE, ymd(date))?;
    sessions.put(&mut row, &ics::DURATION, payload.duration_minutes.to_string())?;
    sessions.put(&mut row, &ics::CONTACT_WITH, payload.contact_with.trim())?;
    sessions.put(&mut row, &ics::TYPE_OF_CONTACT, payload.type_of_contact.trim())?;
    sessions.put(&mut row, &ics::TOPIC, payload.topic.trim())?;
    sessions.put(&mut row, &ics::SUCCESS, payload.success.trim())?;
    sessions.put(&mut row, &ics::NOTES, payload.notes.trim())?;
    sessions.put(&mut row, &ics::REFERRALS, payload.referrals.trim())?;
    sessions.put(&mut row, &ics::LOCATION, payload.location.trim())?;
    sessions.put(&mut row, &ics::MENTOR_ID, payload.mentor_id.trim().to_uppercase())?;
    sessions.put(&mut row, &ics::CREATED_AT, now.as_str())?;
    sessions.put(&mut row, &ics::EDITED_AT, now.as_str())?;
    held.append_row(ics::TABLE.name, row).await?;

    let mut link_rows = Vec::with_capacity(ids.len());
    for id in &ids {
        let mut row = links.blank_row();
        links.put(&mut row, &icp::CONTACT_ID, contact_id.as_str())?;
        links.put(&mut row, &icp::STUDENT_ID, *id)?;
        links.put(&mut row, &icp::NOTES_STUDENT, "")?;
        links.put(&mut row, &icp::CREATED_AT, now.as_str())?;
        link_rows.push(row);
    }
    held.append_rows(icp::TABLE.name, link_rows).await?;
    info!(contact = %contact_id, participants = ids.len(), "saved individual contact session");

    let mut seen_rows = HashSet::new();
    let rows: Vec<RowKey> = match queue_rows {
        Some(keys) if !keys.is_empty() => keys.to_vec(),
        _ => people.iter().filter_map(|person| person.row_key).collect(),
    }
    .into_iter()
    .filter(|key| seen_rows.insert(*key))
    .collect();

    let processed = if rows.is_empty() {
        None
    } else {
        let cascade = queue::mark_processed_locked(ws, held, &rows, &contact_id).await;
        if let Err(err) = &cascade {
            warn!(contact = %contact_id, error = %err, "queue cascade failed after saving note");
        }
        Some(cascade)
    };

    Ok(IndividualSaved {
        contact_id,
        participants_saved: ids.len(),
        processed,
    })
}

pub fn clamp_per_id(per_id: Option<usize>) -> usize {
    per_id
        .unwrap_or(DEFAULT_RECENT_PER_ID)
        .clamp(1, MAX_RECENT_PER_ID)
}

/// Most recent individual contacts per student id, newest first.
pub async fn recent_for_ids(
    ws: &Workspace,
    ids: &[String],
    per_id: Option<usize>,
) -> Result<BTreeMap<String, Vec<RecentContact>>> {
    let per_id = clamp_per_id(per_id);
    let mut result: BTreeMap<String, Vec<RecentContact>> = ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(|id| (id.to_string(), Vec::new()))
        .collect();
    if result.is_empty() {
        return Ok(result);
    }

    let store = ws.store();
    let Some(links) = schema::inspect(store, icp::TABLE.name, &icp::TABLE).await? else {
        return Ok(result);
    };
    let Some(sessions) = schema::inspect(store, ics::TABLE.name, &ics::TABLE).await? else {
        return Ok(result);
    };

    let mut students_by_contact: HashMap<String, Vec<String>> = HashMap::new();
    for row in store.rows(icp::TABLE.name).await? {
        let student = links.get(&row.cells, &icp::STUDENT_ID);
        let contact = links.get(&row.cells, &icp::CONTACT_ID);
        if contact.is_empty() || !result.contains_key(student) {
            continue;
        }
        students_by_contact
            .entry(contact.to_string())
            .or_default()
            .push(student.to_string());
    }
    if students_by_contact.is_empty() {
        return Ok(result);
    }

    let mentor_names = mentors::names_by_id(ws).await?;
    let directory = roster::directory(ws).await?;
    for row in store.rows(ics::TABLE.name).await? {
        let cells = &row.cells;
        let Some(students) = students_by_contact.get(sessions.get(cells, &ics::CONTACT_ID)) else {
            continue;
        };
        let mentor_id = sessions.get(cells, &ics::MENTOR_ID).to_uppercase();
        let date = ws
            .clock
            .calendar_day(sessions.get(cells, &ics::DATE))
            .map(ymd)
            .unwrap_or_default();
        for student in students {
            let contact = RecentContact {
                contact_id: sessions.get(cells, &ics::CONTACT_ID).to_string(),
                display_name: directory.display_name(student),
                date: date.clone(),
                duration: parse_minutes(sessions.get(cells, &ics::DURATION)),
                contact_with: sessions.get(cells, &ics::CONTACT_WITH).to_string(),
                type_of_contact: sessions.get(cells, &ics::TYPE_OF_CONTACT).to_string(),
                topic: sessions.get(cells, &ics::TOPIC).to_string(),
                success: sessions.get(cells, &ics::SUCCESS).to_string(),
                notes: sessions.get(cells, &ics::NOTES).to_string(),
                referrals: sessions.get(cells, &ics::REFERRALS).to_string(),
                location: sessions.get(cells, &ics::LOCATION).to_string(),
                edited: sessions.get(cells, &ics::EDITED_AT).to_string(),
                mentor_name: mentor_names.get(&mentor_id).cloned().unwrap_or_default(),
                mentor_id: mentor_id.clone(),
            };
            if let Some(list) = result.get_mut(student) {
                list.push(contact);
            }
        }
    }

    for list in result.values_mut() {
        // stable: rows filed later on the same day stay after earlier ones
        list.sort_by(|a, b| b.date.cmp(&a.date));
        list.truncate(per_id);
    }
    Ok(result)
}
