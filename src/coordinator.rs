//! The desk: every externally callable operation.
//!
//! Each operation validates its input, takes the document lock when it
//! writes, and folds ordinary failures into a [`Reply`] with `ok: false`.
//! A locked unit that fails part way undoes the writes it already made
//! before the lock is released.
//! Only fatal errors (missing write tables, bad configuration) escape as
//! `Err`.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::contacts::{self, GroupUpsert};
use crate::error::{Error, Result};
use crate::lock::Held;
use crate::mentors;
use crate::models::{
    GroupNote, GroupPrefill, IndividualContactPayload, LinkedPerson, Mentor, Person, PersonRef,
    QueueEntry, QueueStatus, RecentContact, SessionType, SignInSession,
};
use crate::queue::{self, ClaimOutcome, IdMatchOutcome, NewEntry, ProcessOutcome};
use crate::roster::{self, SourceKind, SourceStats, Suggestion};
use crate::schema::{self, attendance};
use crate::sessions;
use crate::store::RowKey;
use crate::students;
use crate::workspace::Workspace;

/// `{ "ok": true, ...body }` or `{ "ok": false, "error": "..." }`.
#[derive(Debug, Serialize)]
pub struct Reply<T> {
    pub ok: bool,
    #[serde(flatten)]
    pub body: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Reply<T> {
    pub fn success(body: T) -> Self {
        Self {
            ok: true,
            body: Some(body),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            body: None,
            error: Some(error.into()),
        }
    }

    #[cfg(test)]
    pub fn into_result(self) -> std::result::Result<T, String> {
        match (self.body, self.error) {
            (Some(body), None) => Ok(body),
            (_, error) => Err(error.unwrap_or_default()),
        }
    }
}

/// Turn an operation result into a reply; fatal errors stay errors.
fn settle<T>(operation: &'static str, result: Result<T>) -> Result<Reply<T>> {
    match result {
        Ok(body) => Ok(Reply::success(body)),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            warn!(operation, error = %err, "operation failed");
            Ok(Reply::failure(err.to_string()))
        }
    }
}

/// For lookups that answer with a bare value: failures read as empty.
fn settle_or_default<T: Default>(operation: &'static str, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            warn!(operation, error = %err, "lookup failed");
            Ok(T::default())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionBody {
    pub session: SignInSession,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionsBody {
    pub sessions: Vec<SignInSession>,
}

/// The session fields echoed back by a sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub label: String,
    pub date: String,
    #[serde(rename = "type")]
    pub session_type: SessionType,
}

impl From<&SignInSession> for SessionSummary {
    fn from(session: &SignInSession) -> Self {
        Self {
            id: session.id.clone(),
            label: session.label.clone(),
            date: session.date.clone(),
            session_type: session.session_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInBody {
    pub session: SessionSummary,
    pub student: Person,
    pub created_known: bool,
    pub row_key: RowKey,
    pub target_table: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_key: Option<RowKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchBody {
    pub session: SessionSummary,
    pub results: Vec<BatchItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueBody {
    pub items: Vec<QueueEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupNoteSaved {
    pub contact_id: String,
    pub created: bool,
    pub participants_added: usize,
    pub mentors_added: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualNoteSaved {
    pub contact_id: String,
    pub participants_saved: usize,
    pub processed: Option<Reply<ProcessOutcome>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrefillBody {
    pub groups: BTreeMap<String, GroupPrefill>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestNoteBody {
    pub note: Option<GroupNote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupRecord {
    #[serde(flatten)]
    pub person: Person,
    pub is_known: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupBody {
    pub record: LookupRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapSummary {
    pub added: usize,
    pub skipped_existing: usize,
    pub collected: usize,
    pub total_known: usize,
    pub sources: BTreeMap<String, SourceStats>,
}

/// Calendar day named by `raw`, required.
fn required_day(ws: &Workspace, raw: &str, message: &str) -> Result<NaiveDate> {
    ws.clock
        .calendar_day(raw)
        .ok_or_else(|| Error::validation(message))
}

/// Calendar day named by `raw`, today when blank, an error when unparseable.
fn optional_day(ws: &Workspace, raw: Option<&str>, message: &str) -> Result<NaiveDate> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => required_day(ws, value, message),
        None => Ok(ws.clock.today()),
    }
}

pub struct Desk {
    ws: Workspace,
}

impl Desk {
    pub fn new(ws: Workspace) -> Self {
        Self { ws }
    }

    #[cfg(test)]
    pub fn workspace(&self) -> &Workspace {
        &self.ws
    }

    /// Undo the writes of a locked unit that failed part way through.
    async fn finish<T>(&self, held: &Held<'_>, outcome: Result<T>) -> Result<T> {
        if let Err(err) = &outcome {
            match held.roll_back().await {
                Ok(0) => {}
                Ok(steps) => {
                    warn!(error = %err, steps, "rolled back partial writes");
                    self.ws.cache.remove_matching(|_| true);
                }
                Err(undo) => {
                    error!(error = %err, undo_error = %undo, "rollback left partial writes");
                    self.ws.cache.remove_matching(|_| true);
                }
            }
        }
        outcome
    }

    pub async fn start_session(
        &self,
        label: &str,
        date: Option<&str>,
        session_type: &str,
    ) -> Result<Reply<SessionBody>> {
        let result: Result<_> = async {
            let date = optional_day(&self.ws, date, "Missing/invalid date.")?;
            let held = self.ws.lock.acquire().await?;
            let started =
                sessions::start_locked(&self.ws, &held, label, date, SessionType::parse(session_type))
                    .await;
            let (session, _) = self.finish(&held, started).await?;
            Ok(SessionBody { session })
        }
        .await;
        settle("startSignInSession", result)
    }

    pub async fn end_session(&self, session_id: &str) -> Result<Reply<SessionBody>> {
        let result: Result<_> = async {
            let held = self.ws.lock.acquire().await?;
            let ended = sessions::end_locked(&self.ws, &held, session_id).await;
            let session = self.finish(&held, ended).await?;
            Ok(SessionBody { session })
        }
        .await;
        settle("endSignInSession", result)
    }

    pub async fn list_active_sessions(&self, date: Option<&str>) -> Result<Reply<SessionsBody>> {
        let result: Result<_> = async {
            let date = optional_day(&self.ws, date, "Missing/invalid date.")?;
            let sessions = sessions::list_active(&self.ws, date).await?;
            Ok(SessionsBody { sessions })
        }
        .await;
        settle("listActiveSignInSessions", result)
    }

    pub async fn record_sign_in(&self, session_id: &str, student: &Person) -> Result<Reply<SignInBody>> {
        let result: Result<_> = async {
            let held = self.ws.lock.acquire().await?;
            let signed = self.sign_in_locked(&held, session_id, student).await;
            self.finish(&held, signed).await
        }
        .await;
        settle("recordStudentSignIn", result)
    }

    async fn active_session(&self, session_id: &str) -> Result<SignInSession> {
        if session_id.trim().is_empty() {
            return Err(Error::validation("Session ID is required."));
        }
        match sessions::find(&self.ws, session_id).await? {
            Some(session) if session.is_active => Ok(session),
            _ => Err(Error::validation("Session is not active or not found.")),
        }
    }

    async fn sign_in_locked(
        &self,
        held: &Held<'_>,
        session_id: &str,
        student: &Person,
    ) -> Result<SignInBody> {
        if session_id.trim().is_empty() {
            return Err(Error::validation("Session ID is required."));
        }
        let mut student = student.trimmed();
        if student.id.is_empty() {
            return Err(Error::validation("Student ID is required."));
        }
        let session = self.active_session(session_id).await?;
        student.grade = roster::normalize_grade(&student.grade);

        let ws = &self.ws;
        let now = ws.clock.stamp();
        let attendance_map = match session.session_type {
            SessionType::Group => Some(
                schema::open_existing(ws.store(), &ws.settings.attendance_table, &attendance::TABLE)
                    .await?,
            ),
            SessionType::Individual => None,
        };

        let upserted = students::upsert_locked(ws, held, &student, Some(now.clone())).await?;
        let (row_key, target_table) = match attendance_map {
            Some(map) => {
                let mut row = map.blank_row();
                map.put(&mut row, &attendance::TIMESTAMP, now.as_str())?;
                map.put(&mut row, &attendance::FIRST_NAME, student.first_name.as_str())?;
                map.put(&mut row, &attendance::LAST_NAME, student.last_name.as_str())?;
                map.put(&mut row, &attendance::SCHOOL_YEAR, student.grade.as_str())?;
                map.put(&mut row, &attendance::SCHOOL, student.school.as_str())?;
                map.put(&mut row, &attendance::ID, student.id.as_str())?;
                map.put(&mut row, &attendance::GROUP, session.label.as_str())?;
                let table = ws.settings.attendance_table.clone();
                let key = held.append_row(&table, row).await?;
                (key, table)
            }
            None => {
                let key = queue::append_locked(
                    ws,
                    held,
                    NewEntry {
                        timestamp: now.clone(),
                        id: student.id.clone(),
                        name: student.display_name(),
                        school: student.school.clone(),
                        group: session.label.clone(),
                    },
                )
                .await?;
                (key, schema::sign_in_log::TABLE.name.to_string())
            }
        };
        sessions::record_activity_locked(ws, held, &session, &now).await?;
        roster::invalidate(ws);
        info!(
            session = %session.id,
            student = %student.id,
            table = %target_table,
            row = row_key,
            "recorded sign-in"
        );

        Ok(SignInBody {
            session: SessionSummary::from(&session),
            student,
            created_known: upserted.created,
            row_key,
            target_table,
        })
    }

    /// Sign in several students, each in its own locked unit.
    pub async fn record_batch(&self, session_id: &str, people: &[Person]) -> Result<Reply<BatchBody>> {
        let session = match self.active_session(session_id).await {
            Ok(session) => session,
            Err(err) => return settle("recordStudentBatch", Err(err)),
        };
        let mut results = Vec::with_capacity(people.len());
        for student in people {
            let outcome: Result<_> = async {
                let held = self.ws.lock.acquire().await?;
                let signed = self.sign_in_locked(&held, session_id, student).await;
                self.finish(&held, signed).await
            }
            .await;
            let id = student.id.trim().to_string();
            match outcome {
                Ok(body) => results.push(BatchItem {
                    id,
                    ok: true,
                    row_key: Some(body.row_key),
                    error: None,
                }),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(student = %id, error = %err, "batch sign-in failed");
                    results.push(BatchItem {
                        id,
                        ok: false,
                        row_key: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }
        Ok(Reply::success(BatchBody {
            session: SessionSummary::from(&session),
            results,
        }))
    }

    pub async fn list_queue(&self, date: Option<&str>, viewer: Option<&str>) -> Result<Reply<QueueBody>> {
        let date = self.ws.clock.day_or_today(date);
        settle(
            "listQueue",
            queue::list(&self.ws, date, viewer)
                .await
                .map(|items| QueueBody { items }),
        )
    }

    pub async fn claim_rows(&self, keys: &[RowKey], claimant: &str) -> Result<Reply<ClaimOutcome>> {
        let result: Result<_> = async {
            if keys.is_empty() {
                return Err(Error::validation("No rows provided."));
            }
            let held = self.ws.lock.acquire().await?;
            let claimed = queue::claim_locked(&self.ws, &held, keys, claimant).await;
            self.finish(&held, claimed).await
        }
        .await;
        settle("claimRows", result)
    }

    pub async fn mark_processed(&self, keys: &[RowKey], contact_id: &str) -> Result<Reply<ProcessOutcome>> {
        let result: Result<_> = async {
            if keys.is_empty() {
                return Err(Error::validation("No rows to mark processed."));
            }
            let held = self.ws.lock.acquire().await?;
            let marked = queue::mark_processed_locked(&self.ws, &held, keys, contact_id).await;
            self.finish(&held, marked).await
        }
        .await;
        settle("markProcessed", result)
    }

    pub async fn mark_processed_by_ids(
        &self,
        date: Option<&str>,
        ids: &[String],
        contact_id: &str,
        status: Option<&str>,
    ) -> Result<Reply<IdMatchOutcome>> {
        let result: Result<_> = async {
            let date = optional_day(&self.ws, date, "Bad date.")?;
            let status = match status.map(str::trim).filter(|raw| !raw.is_empty()) {
                Some(raw) => Some(
                    QueueStatus::parse(raw)
                        .ok_or_else(|| Error::validation(format!("Unknown status \"{raw}\".")))?,
                ),
                None => None,
            };
            let held = self.ws.lock.acquire().await?;
            let marked =
                queue::mark_processed_by_ids_locked(&self.ws, &held, date, ids, contact_id, status)
                    .await;
            self.finish(&held, marked).await
        }
        .await;
        settle("markProcessedByIds", result)
    }

    pub async fn upsert_group_session(
        &self,
        date: &str,
        group: &str,
        note: &GroupNote,
    ) -> Result<Reply<GroupUpsert>> {
        let result: Result<_> = async {
            let date = required_day(&self.ws, date, "Missing/invalid date.")?;
            let held = self.ws.lock.acquire().await?;
            let upserted =
                contacts::upsert_group_session_locked(&self.ws, &held, date, group, note).await;
            self.finish(&held, upserted).await
        }
        .await;
        settle("createOrUpdateGroupContactSession", result)
    }

    /// Upsert the session and replace its participants and mentors in one locked unit.
    pub async fn save_full_group_note(
        &self,
        date: &str,
        group: &str,
        note: &GroupNote,
        participants: &[LinkedPerson],
        mentors: &[LinkedPerson],
    ) -> Result<Reply<GroupNoteSaved>> {
        let result: Result<_> = async {
            let date = required_day(&self.ws, date, "Missing/invalid date.")?;
            let held = self.ws.lock.acquire().await?;
            let saved: Result<_> = async {
                let upsert =
                    contacts::upsert_group_session_locked(&self.ws, &held, date, group, note).await?;
                let participants_added = contacts::replace_participants_locked(
                    &self.ws,
                    &held,
                    &upsert.contact_id,
                    participants,
                )
                .await?;
                let mentors_added =
                    contacts::replace_mentors_locked(&self.ws, &held, &upsert.contact_id, mentors)
                        .await?;
                Ok(GroupNoteSaved {
                    contact_id: upsert.contact_id,
                    created: upsert.created,
                    participants_added,
                    mentors_added,
                })
            }
            .await;
            self.finish(&held, saved).await
        }
        .await;
        settle("saveFullGroupNote", result)
    }

    pub async fn save_individual_note(
        &self,
        date: Option<&str>,
        people: &[PersonRef],
        payload: &IndividualContactPayload,
        queue_rows: Option<&[RowKey]>,
    ) -> Result<Reply<IndividualNoteSaved>> {
        let result: Result<_> = async {
            let date = optional_day(&self.ws, date, "Missing/invalid date.")?;
            let held = self.ws.lock.acquire().await?;
            let saved =
                contacts::save_individual_locked(&self.ws, &held, date, people, payload, queue_rows)
                    .await;
            let saved = self.finish(&held, saved).await?;
            Ok(IndividualNoteSaved {
                contact_id: saved.contact_id,
                participants_saved: saved.participants_saved,
                processed: saved.processed.map(|cascade| match cascade {
                    Ok(outcome) => Reply::success(outcome),
                    Err(err) => Reply::failure(err.to_string()),
                }),
            })
        }
        .await;
        settle("saveIndividualContactSession", result)
    }

    pub async fn group_prefill(&self, date: &str, groups: &[String]) -> Result<Reply<PrefillBody>> {
        let result: Result<_> = async {
            let date = required_day(&self.ws, date, "Missing/invalid date.")?;
            let groups = contacts::group_prefill(&self.ws, date, groups).await?;
            Ok(PrefillBody { groups })
        }
        .await;
        settle("getGroupPrefill", result)
    }

    pub async fn latest_group_note(&self, date: &str, group: &str) -> Result<Reply<LatestNoteBody>> {
        let result: Result<_> = async {
            let date = required_day(&self.ws, date, "Missing/invalid date.")?;
            let note = contacts::latest_group_note(&self.ws, date, group).await?;
            Ok(LatestNoteBody { note })
        }
        .await;
        settle("getLatestGroupContactSession", result)
    }

    /// Search the intake roster tables only.
    pub async fn suggest_people(&self, query: &str, limit: Option<usize>) -> Result<Vec<Suggestion>> {
        let result: Result<_> = async {
            let sources: Vec<_> = roster::intake_sources(&self.ws)
                .into_iter()
                .filter(|source| source.kind == SourceKind::Roster)
                .collect();
            let index = roster::build_index(&self.ws, &sources).await?;
            Ok(roster::rank(index.entries.values(), query, limit))
        }
        .await;
        settle_or_default("suggestPeople", result)
    }

    /// Search the full directory, known students included.
    pub async fn sign_in_suggest_people(&self, query: &str, limit: Option<usize>) -> Result<Vec<Suggestion>> {
        let result: Result<_> = async {
            let index = roster::directory(&self.ws).await?;
            Ok(roster::rank(index.entries.values(), query, limit))
        }
        .await;
        settle_or_default("signInSuggestPeople", result)
    }

    pub async fn lookup_sign_in(&self, id: &str) -> Result<Reply<LookupBody>> {
        let result: Result<_> = async {
            let id = id.trim();
            if id.is_empty() {
                return Err(Error::validation("Student ID is required."));
            }
            if let Some(known) = students::fetch_known(&self.ws)
                .await?
                .into_iter()
                .find(|known| known.person.id == id)
            {
                return Ok(LookupBody {
                    record: LookupRecord {
                        person: known.person,
                        is_known: true,
                    },
                });
            }
            let index = roster::directory(&self.ws).await?;
            match index.get(id) {
                Some(entry) => Ok(LookupBody {
                    record: LookupRecord {
                        person: entry.person.clone(),
                        is_known: false,
                    },
                }),
                None => Err(Error::not_found(format!("ID \"{id}\" not found."))),
            }
        }
        .await;
        settle("lookupSignInById", result)
    }

    pub async fn names_for_ids(&self, ids: &[String]) -> Result<Vec<LinkedPerson>> {
        settle_or_default("getNamesForIds", roster::names_for_ids(&self.ws, ids).await)
    }

    /// Seed known_students from every intake source. Existing rows are kept as they are.
    pub async fn bootstrap_known_students(&self) -> Result<Reply<BootstrapSummary>> {
        let result: Result<_> = async {
            let held = self.ws.lock.acquire().await?;
            let index = roster::build_index(&self.ws, &roster::intake_sources(&self.ws)).await?;
            let known: HashSet<String> = students::fetch_known(&self.ws)
                .await?
                .into_iter()
                .map(|known| known.person.id)
                .collect();
            let collected = index.entries.len();
            let skipped_existing = index
                .entries
                .keys()
                .filter(|id| known.contains(*id))
                .count();
            let fresh: Vec<(Person, Option<String>)> = index
                .entries
                .values()
                .filter(|entry| !known.contains(&entry.person.id))
                .map(|entry| (entry.person.clone(), entry.last_sign_in.clone()))
                .collect();
            let added = students::insert_missing_locked(&self.ws, &held, fresh).await;
            let added = self.finish(&held, added).await?;
            info!(added, skipped_existing, collected, "bootstrapped known students");
            Ok(BootstrapSummary {
                added,
                skipped_existing,
                collected,
                total_known: known.len() + added,
                sources: index.sources,
            })
        }
        .await;
        settle("bootstrapKnownStudents", result)
    }

    pub async fn list_mentors(&self, active_only: bool) -> Result<Vec<Mentor>> {
        settle_or_default("listMentors", mentors::list(&self.ws, active_only).await)
    }

    pub async fn recent_contacts(
        &self,
        ids: &[String],
        per_id: Option<usize>,
    ) -> Result<BTreeMap<String, Vec<RecentContact>>> {
        settle_or_default(
            "listRecentContactsForIds",
            contacts::recent_for_ids(&self.ws, ids, per_id).await,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    use super::*;
    use crate::store::{CsvStore, MemoryStore, RowKey, RowUpdate, StoredRow, TabularStore};
    use crate::workspace::testing::{
        strings, workspace, workspace_over, workspace_waiting, workspace_with,
    };

    /// Memory store whose next append or update on one table fails once armed.
    struct FlakyStore {
        inner: MemoryStore,
        table: &'static str,
        armed: AtomicBool,
    }

    impl FlakyStore {
        fn new(table: &'static str) -> Self {
            Self {
                inner: MemoryStore::new(),
                table,
                armed: AtomicBool::new(false),
            }
        }

        fn arm(&self) {
            self.armed.store(true, Ordering::SeqCst);
        }

        fn trip(&self, table: &str) -> Result<()> {
            if table == self.table && self.armed.swap(false, Ordering::SeqCst) {
                return Err(Error::Io(std::io::Error::other("disk full")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl TabularStore for FlakyStore {
        fn backend(&self) -> &'static str {
            self.inner.backend()
        }

        async fn table_exists(&self, table: &str) -> Result<bool> {
            self.inner.table_exists(table).await
        }

        async fn create_table(&self, table: &str, header: &[String]) -> Result<()> {
            self.inner.create_table(table, header).await
        }

        async fn header(&self, table: &str) -> Result<Vec<String>> {
            self.inner.header(table).await
        }

        async fn set_header(&self, table: &str, header: &[String]) -> Result<()> {
            self.inner.set_header(table, header).await
        }

        async fn rows(&self, table: &str) -> Result<Vec<StoredRow>> {
            self.inner.rows(table).await
        }

        async fn row(&self, table: &str, key: RowKey) -> Result<Option<StoredRow>> {
            self.inner.row(table, key).await
        }

        async fn append_rows(&self, table: &str, rows: Vec<Vec<String>>) -> Result<Vec<RowKey>> {
            self.trip(table)?;
            self.inner.append_rows(table, rows).await
        }

        async fn update_rows(&self, table: &str, updates: &[RowUpdate]) -> Result<Vec<RowKey>> {
            self.trip(table)?;
            self.inner.update_rows(table, updates).await
        }

        async fn delete_rows(&self, table: &str, keys: &[RowKey]) -> Result<usize> {
            self.inner.delete_rows(table, keys).await
        }
    }

    fn linked(id: &str, name: &str) -> LinkedPerson {
        LinkedPerson {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    fn gears() -> GroupNote {
        GroupNote {
            topic: "Gears".into(),
            summary: "Built a gearbox".into(),
            duration: 60,
        }
    }

    fn desk() -> Desk {
        Desk::new(workspace())
    }

    fn student(id: &str, first: &str, last: &str, grade: &str) -> Person {
        Person {
            id: id.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            school: "Lincoln".to_string(),
            grade: grade.to_string(),
            ..Person::default()
        }
    }

    fn ok<T>(reply: Reply<T>) -> T {
        match reply.into_result() {
            Ok(body) => body,
            Err(error) => panic!("operation failed: {error}"),
        }
    }

    #[tokio::test]
    async fn individual_sign_in_flows_through_the_queue() {
        let desk = desk();
        let session = ok(desk
            .start_session("Front Desk", Some("2025-03-01"), "individual")
            .await
            .unwrap())
        .session;

        let signed = ok(desk
            .record_sign_in(&session.id, &student("S100", "Ana", "Ruiz", "9th"))
            .await
            .unwrap());
        assert!(signed.created_known);
        assert_eq!(signed.target_table, "sign_in_log");
        assert_eq!(signed.student.grade, "Freshman");
        let row = signed.row_key;

        let queue = ok(desk.list_queue(Some("2025-03-01"), None).await.unwrap()).items;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].status, QueueStatus::Pending);
        assert_eq!(queue[0].display_name, "Ana Ruiz");

        let claim = ok(desk.claim_rows(&[row], "staffA").await.unwrap());
        assert!(claim.failed.is_empty());
        let queue = ok(desk.list_queue(Some("2025-03-01"), None).await.unwrap()).items;
        assert_eq!(queue[0].status, QueueStatus::Claimed);
        assert_eq!(queue[0].claimed_by, "staffA");

        let people = vec![PersonRef {
            id: "S100".into(),
            row_key: None,
        }];
        let saved = ok(desk
            .save_individual_note(
                Some("2025-03-01"),
                &people,
                &IndividualContactPayload::default(),
                Some(&[row]),
            )
            .await
            .unwrap());
        let processed = saved.processed.unwrap().into_result().unwrap();
        assert_eq!(processed.contact_id, saved.contact_id);

        let queue = ok(desk.list_queue(Some("2025-03-01"), None).await.unwrap()).items;
        assert_eq!(queue[0].status, QueueStatus::Processed);
        assert_eq!(queue[0].contact_id, saved.contact_id);
        assert!(!queue[0].processed_at.is_empty());

        let again = ok(desk.claim_rows(&[row], "staffB").await.unwrap());
        assert_eq!(again.failed, vec![row]);
        let queue = ok(desk.list_queue(Some("2025-03-01"), None).await.unwrap()).items;
        assert_eq!(queue[0].status, QueueStatus::Processed);

        let session = ok(desk.end_session(&session.id).await.unwrap()).session;
        assert_eq!(session.sign_in_count, 1);
        assert!(!session.is_active);
    }

    #[tokio::test]
    async fn group_sign_in_requires_the_attendance_table() {
        let desk = desk();
        let session = ok(desk
            .start_session("Robotics", Some("2025-03-01"), "group")
            .await
            .unwrap())
        .session;
        let err = desk
            .record_sign_in(&session.id, &student("S100", "Ana", "Ruiz", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingTable(table) if table == "attendance"));
        assert!(students::fetch_known(desk.workspace()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn group_sign_in_appends_attendance() {
        let store = Arc::new(MemoryStore::new());
        store
            .create_table("attendance", &strings(&["Timestamp", "ID Number", "First Name"]))
            .await
            .unwrap();
        let desk = Desk::new(workspace_with(store.clone()));
        let session = ok(desk
            .start_session("Robotics", Some("2025-03-01"), "group")
            .await
            .unwrap())
        .session;
        let signed = ok(desk
            .record_sign_in(&session.id, &student("S100", "Ana", "Ruiz", "11"))
            .await
            .unwrap());
        assert_eq!(signed.target_table, "attendance");

        let header = store.header("attendance").await.unwrap();
        let map = schema::ColumnMap::resolve("attendance", &attendance::TABLE, &header);
        let row = store.row("attendance", signed.row_key).await.unwrap().unwrap();
        assert_eq!(map.get(&row.cells, &attendance::ID), "S100");
        assert_eq!(map.get(&row.cells, &attendance::GROUP), "Robotics");
        assert_eq!(map.get(&row.cells, &attendance::SCHOOL_YEAR), "Junior");
        assert!(ok(desk.list_queue(Some("2025-03-01"), None).await.unwrap())
            .items
            .is_empty());
    }

    #[tokio::test]
    async fn sign_in_validation_is_reported_not_raised() {
        let desk = desk();
        let reply = desk.record_sign_in("", &student("S1", "", "", "")).await.unwrap();
        assert_eq!(reply.error.as_deref(), Some("Session ID is required."));
        let reply = desk.record_sign_in("nope", &student("S1", "", "", "")).await.unwrap();
        assert_eq!(reply.error.as_deref(), Some("Session is not active or not found."));
        let reply = desk.record_sign_in("nope", &Person::default()).await.unwrap();
        assert_eq!(reply.error.as_deref(), Some("Student ID is required."));
    }

    #[tokio::test]
    async fn batch_reports_each_student() {
        let desk = desk();
        let session = ok(desk
            .start_session("Front Desk", Some("2025-03-01"), "individual")
            .await
            .unwrap())
        .session;
        let batch = ok(desk
            .record_batch(
                &session.id,
                &[student("S1", "Ana", "", ""), Person::default(), student("S2", "Ben", "", "")],
            )
            .await
            .unwrap());
        let oks: Vec<bool> = batch.results.iter().map(|item| item.ok).collect();
        assert_eq!(oks, vec![true, false, true]);
        assert_eq!(batch.results[1].error.as_deref(), Some("Student ID is required."));
        let sessions = ok(desk.list_active_sessions(Some("2025-03-01")).await.unwrap()).sessions;
        assert_eq!(sessions[0].sign_in_count, 2);
    }

    #[tokio::test]
    async fn group_note_is_unique_and_links_are_replaced() {
        let desk = desk();
        let note = GroupNote {
            topic: "Gears".into(),
            summary: "Built a gearbox".into(),
            duration: 60,
        };
        let first = ok(desk
            .save_full_group_note(
                "2025-03-01",
                "Robotics",
                &note,
                &[LinkedPerson { id: "S1".into(), name: "Ana Ruiz".into() }],
                &[LinkedPerson { id: "m1".into(), name: String::new() }],
            )
            .await
            .unwrap());
        assert!(first.created);
        let second = ok(desk
            .save_full_group_note(
                "2025-03-01",
                "Robotics",
                &note,
                &[
                    LinkedPerson { id: "S1".into(), name: "Ana Ruiz".into() },
                    LinkedPerson { id: "S2".into(), name: "Ben Ode".into() },
                ],
                &[],
            )
            .await
            .unwrap());
        assert_eq!(second.contact_id, first.contact_id);
        assert_eq!(second.participants_added, 2);
        let store = desk.workspace().store();
        assert_eq!(store.rows("group_contact_participants").await.unwrap().len(), 2);
        assert!(store.rows("group_contact_mentors").await.unwrap().is_empty());

        let reply = desk
            .upsert_group_session("not a date", "Robotics", &note)
            .await
            .unwrap();
        assert_eq!(reply.error.as_deref(), Some("Missing/invalid date."));
        let reply = desk.upsert_group_session("2025-03-01", " ", &note).await.unwrap();
        assert_eq!(reply.error.as_deref(), Some("Missing group."));

        let latest = ok(desk.latest_group_note("2025-03-01", "Robotics").await.unwrap());
        assert_eq!(latest.note, Some(note));
    }

    #[tokio::test]
    async fn lookup_prefers_known_students() {
        let store = Arc::new(MemoryStore::new());
        store
            .create_table("2026", &strings(&["CPS ID", "First Name", "Last Name", "School"]))
            .await
            .unwrap();
        store
            .append_rows("2026", vec![strings(&["S7", "Cara", "Diaz", "Douglass"])])
            .await
            .unwrap();
        let desk = Desk::new(workspace_with(store));

        let record = ok(desk.lookup_sign_in("S7").await.unwrap()).record;
        assert!(!record.is_known);
        assert_eq!(record.person.school, "Douglass");

        let summary = ok(desk.bootstrap_known_students().await.unwrap());
        assert_eq!(summary.added, 1);
        assert_eq!(summary.total_known, 1);
        assert_eq!(summary.sources["2026"].merged, 1);
        let again = ok(desk.bootstrap_known_students().await.unwrap());
        assert_eq!(again.added, 0);
        assert_eq!(again.skipped_existing, 1);

        let record = ok(desk.lookup_sign_in(" S7 ").await.unwrap()).record;
        assert!(record.is_known);
        let reply = desk.lookup_sign_in("S8").await.unwrap();
        assert_eq!(reply.error.as_deref(), Some("ID \"S8\" not found."));

        let suggestions = desk.suggest_people("cara", None).await.unwrap();
        assert_eq!(suggestions[0].source, "roster");
        let suggestions = desk.sign_in_suggest_people("cara", None).await.unwrap();
        assert_eq!(suggestions[0].source, "known");
    }

    #[test]
    fn replies_flatten_their_body() {
        let reply = Reply::success(QueueBody { items: Vec::new() });
        assert_eq!(serde_json::to_value(&reply).unwrap(), json!({"ok": true, "items": []}));
        let reply: Reply<QueueBody> = Reply::failure("No rows provided.");
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"ok": false, "error": "No rows provided."})
        );
    }

    #[test]
    fn fatal_errors_escape_settle() {
        assert!(settle::<()>("op", Err(Error::MissingTable("attendance".into()))).is_err());
        let reply = settle::<()>("op", Err(Error::validation("nope"))).unwrap();
        assert!(!reply.ok);
    }

    #[tokio::test]
    async fn failed_session_update_undoes_the_queue_row_and_student() {
        let store = Arc::new(FlakyStore::new("sign_in_sessions"));
        let desk = Desk::new(workspace_over(store.clone()));
        let session = ok(desk
            .start_session("Front Desk", Some("2025-03-01"), "individual")
            .await
            .unwrap())
        .session;

        store.arm();
        let reply = desk
            .record_sign_in(&session.id, &student("S100", "Ana", "Ruiz", "9"))
            .await
            .unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.error.as_deref(), Some("IO error: disk full"));
        assert!(store.inner.rows("sign_in_log").await.unwrap().is_empty());
        assert!(store.inner.rows("known_students").await.unwrap().is_empty());
        let sessions = ok(desk.list_active_sessions(Some("2025-03-01")).await.unwrap()).sessions;
        assert_eq!(sessions[0].sign_in_count, 0);

        ok(desk
            .record_sign_in(&session.id, &student("S100", "Ana", "Ruiz", "9"))
            .await
            .unwrap());
        assert_eq!(store.inner.rows("sign_in_log").await.unwrap().len(), 1);
        let sessions = ok(desk.list_active_sessions(Some("2025-03-01")).await.unwrap()).sessions;
        assert_eq!(sessions[0].sign_in_count, 1);
    }

    #[tokio::test]
    async fn failed_mentor_write_restores_the_previous_group_note() {
        let store = Arc::new(FlakyStore::new("group_contact_mentors"));
        let desk = Desk::new(workspace_over(store.clone()));
        ok(desk
            .save_full_group_note(
                "2025-03-01",
                "Robotics",
                &gears(),
                &[linked("S1", "Ana Ruiz")],
                &[linked("M1", "Maria Lopez")],
            )
            .await
            .unwrap());

        store.arm();
        let motors = GroupNote {
            topic: "Motors".into(),
            summary: "Wired a motor".into(),
            duration: 45,
        };
        let reply = desk
            .save_full_group_note(
                "2025-03-01",
                "Robotics",
                &motors,
                &[linked("S2", "Ben Ode")],
                &[linked("M2", "Dana Cho")],
            )
            .await
            .unwrap();
        assert!(!reply.ok);

        let latest = ok(desk.latest_group_note("2025-03-01", "Robotics").await.unwrap());
        assert_eq!(latest.note, Some(gears()));
        assert_eq!(store.inner.rows("group_contact_sessions").await.unwrap().len(), 1);
        let participants = store.inner.rows("group_contact_participants").await.unwrap();
        assert_eq!(participants.len(), 1);
        assert!(participants[0].cells.contains(&"S1".to_string()));
        let mentors = store.inner.rows("group_contact_mentors").await.unwrap();
        assert_eq!(mentors.len(), 1);
        assert!(mentors[0].cells.contains(&"M1".to_string()));
    }

    #[tokio::test]
    async fn busy_lock_fails_the_write_and_leaves_the_workbook_alone() {
        let store = Arc::new(MemoryStore::new());
        let desk = Arc::new(Desk::new(workspace_waiting(
            store.clone(),
            Duration::from_millis(50),
        )));
        let session = ok(desk
            .start_session("Front Desk", Some("2025-03-01"), "individual")
            .await
            .unwrap())
        .session;

        let (locked_tx, locked_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let holder = {
            let desk = desk.clone();
            tokio::spawn(async move {
                let _held = desk.workspace().lock.acquire().await.unwrap();
                let _ = locked_tx.send(());
                let _ = release_rx.await;
            })
        };
        locked_rx.await.unwrap();

        let reply = desk
            .record_sign_in(&session.id, &student("S1", "Ana", "Ruiz", "9"))
            .await
            .unwrap();
        assert!(!reply.ok);
        assert!(reply.error.unwrap().contains("document lock"));
        let reply = desk
            .upsert_group_session("2025-03-01", "Robotics", &gears())
            .await
            .unwrap();
        assert!(!reply.ok);
        assert!(!store.table_exists("sign_in_log").await.unwrap());
        assert!(!store.table_exists("known_students").await.unwrap());
        assert!(!store.table_exists("group_contact_sessions").await.unwrap());

        release_tx.send(()).unwrap();
        holder.await.unwrap();
        let sessions = ok(desk.list_active_sessions(Some("2025-03-01")).await.unwrap()).sessions;
        assert_eq!(sessions[0].sign_in_count, 0);
        ok(desk
            .record_sign_in(&session.id, &student("S1", "Ana", "Ruiz", "9"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn two_desks_on_one_csv_workbook_keep_every_write() {
        let dir = TempDir::new().unwrap();
        let first: Arc<dyn TabularStore> = Arc::new(CsvStore::open(dir.path()).await.unwrap());
        let second: Arc<dyn TabularStore> = Arc::new(CsvStore::open(dir.path()).await.unwrap());
        let left = Desk::new(workspace_over(first));
        let right = Desk::new(workspace_over(second));

        let session = ok(left
            .start_session("Front Desk", Some("2025-03-01"), "individual")
            .await
            .unwrap())
        .session;
        let (ana, ben) = (student("S1", "Ana", "Ruiz", "9"), student("S2", "Ben", "Ode", "10"));
        let (a, b) = tokio::join!(
            left.record_sign_in(&session.id, &ana),
            right.record_sign_in(&session.id, &ben),
        );
        ok(a.unwrap());
        ok(b.unwrap());

        let (left_note, right_note) = (gears(), gears());
        let (a, b) = tokio::join!(
            left.upsert_group_session("2025-03-01", "Robotics", &left_note),
            right.upsert_group_session("2025-03-01", "Robotics", &right_note),
        );
        let (a, b) = (ok(a.unwrap()), ok(b.unwrap()));
        assert_eq!(a.contact_id, b.contact_id);
        assert!(a.created != b.created);

        let reopened = Desk::new(workspace_over(Arc::new(
            CsvStore::open(dir.path()).await.unwrap(),
        )));
        let items = ok(reopened.list_queue(Some("2025-03-01"), None).await.unwrap()).items;
        let mut ids: Vec<&str> = items.iter().map(|item| item.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["S1", "S2"]);
        assert_ne!(items[0].row_key, items[1].row_key);
        let sessions = ok(reopened
            .list_active_sessions(Some("2025-03-01"))
            .await
            .unwrap())
        .sessions;
        assert_eq!(sessions[0].sign_in_count, 2);
        assert_eq!(
            reopened
                .workspace()
                .store()
                .rows("group_contact_sessions")
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
