//! Merged directory of everyone the program knows about.
//!
//! Several tables name the same students: the known_students directory, the
//! intake roster tables, the sign-in log and the attendance sheet. The
//! directory folds them into one entry per id. Each field remembers the
//! priority of the source that set it, so a higher-priority source replaces
//! a value whatever order the sources were read in, while within one
//! priority tier the first value encountered stays.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::cache::CacheKey;
use crate::error::Result;
use crate::models::{LinkedPerson, Person};
use crate::schema::{self, attendance, known_students, roster, sign_in_log};
use crate::workspace::Workspace;

pub const KNOWN_PRIORITY: u8 = 3;
pub const ROSTER_PRIORITY: u8 = 2;
pub const SIGN_IN_PRIORITY: u8 = 1;
pub const ATTENDANCE_PRIORITY: u8 = 0;

/// Lowercase and strip diacritics, for search comparisons.
pub fn normalize_text(raw: &str) -> String {
    raw.nfd()
        .filter(|ch| !is_combining_mark(*ch))
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Map grade spellings onto Freshman / Sophomore / Junior / Senior.
pub fn normalize_grade(raw: &str) -> String {
    let input = raw.trim();
    if input.is_empty() {
        return String::new();
    }

    const LABELS: [(&str, [&str; 7]); 4] = [
        (
            "Freshman",
            ["freshman", "freshmen", "9", "9th", "9th grade", "grade 9", "year 1"],
        ),
        (
            "Sophomore",
            ["sophomore", "sophomores", "10", "10th", "10th grade", "grade 10", "year 2"],
        ),
        (
            "Junior",
            ["junior", "juniors", "11", "11th", "11th grade", "grade 11", "year 3"],
        ),
        (
            "Senior",
            ["senior", "seniors", "12", "12th", "12th grade", "grade 12", "year 4"],
        ),
    ];
    let lower = input.to_lowercase();
    for (label, synonyms) in LABELS {
        if synonyms.contains(&lower.as_str()) {
            return label.to_string();
        }
    }

    match grade_number(&lower) {
        Some(9) => "Freshman".to_string(),
        Some(10) => "Sophomore".to_string(),
        Some(11) => "Junior".to_string(),
        Some(n) if n >= 12 => "Senior".to_string(),
        _ => title_case(input),
    }
}

/// Grade number from "11", "11th", "11 th", "grade 11" or "11th grade".
/// Digits inside other text ("Class of 2027", "Room 12") are not a grade.
fn grade_number(lower: &str) -> Option<u32> {
    let rest = lower.strip_prefix("grade").unwrap_or(lower).trim();
    let rest = rest.strip_suffix("grade").unwrap_or(rest).trim();
    let split = rest
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(rest.len());
    let (digits, suffix) = rest.split_at(split);
    if digits.is_empty() || !matches!(suffix.trim(), "" | "st" | "nd" | "rd" | "th") {
        return None;
    }
    digits.parse().ok()
}

/// Uppercase the first letter of every word.
pub fn title_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut at_boundary = true;
    for ch in raw.chars() {
        if at_boundary && ch.is_alphanumeric() {
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
        at_boundary = !(ch.is_alphanumeric() || ch == '_');
    }
    out
}

/// "Ana Maria Ruiz" -> ("Ana", "Maria Ruiz").
pub fn split_first_rest(full: &str) -> (String, String) {
    let mut words = full.split_whitespace();
    let first = words.next().unwrap_or_default().to_string();
    let rest = words.collect::<Vec<_>>().join(" ");
    (first, rest)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    KnownStudents,
    Roster,
    SignInLog,
    Attendance,
}

#[derive(Debug, Clone)]
pub struct Source {
    pub table: String,
    pub kind: SourceKind,
    pub priority: u8,
}

impl Source {
    pub fn new(table: impl Into<String>, kind: SourceKind, priority: u8) -> Self {
        Self {
            table: table.into(),
            kind,
            priority,
        }
    }
}

/// Sources read for the cached directory, highest priority first.
pub fn directory_sources(ws: &Workspace) -> Vec<Source> {
    let mut sources = vec![Source::new(
        known_students::TABLE.name,
        SourceKind::KnownStudents,
        KNOWN_PRIORITY,
    )];
    sources.extend(intake_sources(ws));
    sources
}

/// Every source except known_students itself.
pub fn intake_sources(ws: &Workspace) -> Vec<Source> {
    let mut sources: Vec<Source> = ws
        .settings
        .roster_tables
        .iter()
        .map(|table| Source::new(table.clone(), SourceKind::Roster, ROSTER_PRIORITY))
        .collect();
    sources.push(Source::new(
        sign_in_log::TABLE.name,
        SourceKind::SignInLog,
        SIGN_IN_PRIORITY,
    ));
    sources.push(Source::new(
        ws.settings.attendance_table.clone(),
        SourceKind::Attendance,
        ATTENDANCE_PRIORITY,
    ));
    sources
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    #[serde(flatten)]
    pub person: Person,
    pub last_sign_in: Option<String>,
    /// Present in known_students
    pub known: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub considered: usize,
    pub merged: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterIndex {
    pub entries: BTreeMap<String, DirectoryEntry>,
    pub sources: BTreeMap<String, SourceStats>,
}

impl RosterIndex {
    pub fn get(&self, id: &str) -> Option<&DirectoryEntry> {
        self.entries.get(id.trim())
    }

    /// Display name for `id`, falling back to the id itself.
    pub fn display_name(&self, id: &str) -> String {
        match self.get(id) {
            Some(entry) => entry.person.display_name(),
            None => id.trim().to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct Candidate {
    id: String,
    first_name: String,
    last_name: String,
    school: String,
    email: String,
    grade: String,
    seen_at: Option<DateTime<FixedOffset>>,
}

#[derive(Clone, Copy)]
enum Field {
    First,
    Last,
    School,
    Email,
    Grade,
}

#[derive(Default)]
struct Merger {
    index: RosterIndex,
    stamps: HashMap<String, [Option<u8>; 5]>,
    seen: HashMap<String, DateTime<FixedOffset>>,
}

impl Merger {
    fn merge(&mut self, source: &Source, candidate: Candidate) {
        let stats = self.index.sources.entry(source.table.clone()).or_default();
        stats.considered += 1;
        let id = candidate.id.trim().to_string();
        if id.is_empty() {
            stats.skipped += 1;
            return;
        }
        stats.merged += 1;

        let entry = self.index.entries.entry(id.clone()).or_insert_with(|| DirectoryEntry {
            person: Person {
                id: id.clone(),
                ..Person::default()
            },
            ..DirectoryEntry::default()
        });
        if source.kind == SourceKind::KnownStudents {
            entry.known = true;
        }
        let stamps = self.stamps.entry(id.clone()).or_default();
        let grade = normalize_grade(&candidate.grade);
        for (field, value) in [
            (Field::First, candidate.first_name.as_str()),
            (Field::Last, candidate.last_name.as_str()),
            (Field::School, candidate.school.as_str()),
            (Field::Email, candidate.email.as_str()),
            (Field::Grade, grade.as_str()),
        ] {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let stamp = &mut stamps[field as usize];
            if stamp.map_or(true, |current| source.priority > current) {
                *stamp = Some(source.priority);
                let slot = match field {
                    Field::First => &mut entry.person.first_name,
                    Field::Last => &mut entry.person.last_name,
                    Field::School => &mut entry.person.school,
                    Field::Email => &mut entry.person.email,
                    Field::Grade => &mut entry.person.grade,
                };
                *slot = value.to_string();
            }
        }

        if let Some(at) = candidate.seen_at {
            let latest = self.seen.entry(id).or_insert(at);
            if at > *latest {
                *latest = at;
            }
            entry.last_sign_in = Some(latest.to_rfc3339_opts(SecondsFormat::Secs, false));
        }
    }
}

/// Merge `sources` into a fresh index. Missing tables contribute nothing.
pub async fn build_index(ws: &Workspace, sources: &[Source]) -> Result<RosterIndex> {
    let mut merger = Merger::default();
    for source in sources {
        let Some(candidates) = read_source(ws, source).await? else {
            debug!(table = %source.table, "roster source absent");
            continue;
        };
        for candidate in candidates {
            merger.merge(source, candidate);
        }
    }
    Ok(merger.index)
}

/// The cached directory over known students and every intake source.
pub async fn directory(ws: &Workspace) -> Result<RosterIndex> {
    if let Some(hit) = ws.cache.get::<RosterIndex>(&CacheKey::RosterIndex) {
        return Ok(hit);
    }
    let index = build_index(ws, &directory_sources(ws)).await?;
    debug!(people = index.entries.len(), "rebuilt roster directory");
    ws.cache.put(CacheKey::RosterIndex, &index);
    Ok(index)
}

pub fn invalidate(ws: &Workspace) {
    ws.cache.remove(&CacheKey::RosterIndex);
}

/// `{id, name}` for each non-blank id, in request order.
pub async fn names_for_ids(ws: &Workspace, ids: &[String]) -> Result<Vec<LinkedPerson>> {
    let wanted: Vec<&str> = ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty()).collect();
    if wanted.is_empty() {
        return Ok(Vec::new());
    }
    let index = directory(ws).await?;
    let mut seen = std::collections::HashSet::new();
    Ok(wanted
        .into_iter()
        .filter(|id| seen.insert(*id))
        .map(|id| LinkedPerson {
            id: id.to_string(),
            name: index.display_name(id),
        })
        .collect())
}

async fn read_source(ws: &Workspace, source: &Source) -> Result<Option<Vec<Candidate>>> {
    let store = ws.store();
    let table = source.table.as_str();
    let def = match source.kind {
        SourceKind::KnownStudents => &known_students::TABLE,
        SourceKind::Roster => &roster::TABLE,
        SourceKind::SignInLog => &sign_in_log::TABLE,
        SourceKind::Attendance => &attendance::TABLE,
    };
    let Some(map) = schema::inspect(store, table, def).await? else {
        return Ok(None);
    };
    let rows = store.rows(table).await?;

    let candidates = match source.kind {
        SourceKind::KnownStudents => rows
            .iter()
            .map(|row| Candidate {
                id: map.get(&row.cells, &known_students::STUDENT_ID).to_string(),
                first_name: map.get(&row.cells, &known_students::FIRST_NAME).to_string(),
                last_name: map.get(&row.cells, &known_students::LAST_NAME).to_string(),
                school: map.get(&row.cells, &known_students::SCHOOL).to_string(),
                email: map.get(&row.cells, &known_students::EMAIL).to_string(),
                grade: map.get(&row.cells, &known_students::GRADE).to_string(),
                seen_at: ws
                    .clock
                    .timestamp(map.get(&row.cells, &known_students::LAST_SIGN_IN)),
            })
            .collect(),
        SourceKind::Roster => {
            if !map.has(&roster::ID) {
                debug!(table, "roster table has no id column");
                return Ok(None);
            }
            rows.iter()
                .map(|row| {
                    let mut first_name = map.get(&row.cells, &roster::FIRST_NAME).to_string();
                    let mut last_name = map.get(&row.cells, &roster::LAST_NAME).to_string();
                    if first_name.is_empty() && last_name.is_empty() {
                        (first_name, last_name) =
                            split_first_rest(map.get(&row.cells, &roster::FULL_NAME));
                    }
                    let email = match map.get(&row.cells, &roster::EMAIL) {
                        "" => map.get(&row.cells, &roster::PARTICIPANT_EMAILS),
                        primary => primary,
                    };
                    let email = email.split([';', ',']).next().unwrap_or_default().trim();
                    let grade = match map.get(&row.cells, &roster::CURRENT_GRADE) {
                        "" => map.get(&row.cells, &roster::GRADE_AT_INTAKE),
                        current => current,
                    };
                    Candidate {
                        id: map.get(&row.cells, &roster::ID).to_string(),
                        first_name,
                        last_name,
                        school: map.get(&row.cells, &roster::SCHOOL).to_string(),
                        email: email.to_string(),
                        grade: grade.to_string(),
                        seen_at: None,
                    }
                })
                .collect()
        }
        SourceKind::SignInLog => rows
            .iter()
            .map(|row| {
                let (first_name, last_name) =
                    split_first_rest(map.get(&row.cells, &sign_in_log::NAME));
                Candidate {
                    id: map.get(&row.cells, &sign_in_log::ID).to_string(),
                    first_name,
                    last_name,
                    school: map.get(&row.cells, &sign_in_log::SCHOOL).to_string(),
                    seen_at: ws.clock.timestamp(map.get(&row.cells, &sign_in_log::TIMESTAMP)),
                    ..Candidate::default()
                }
            })
            .collect(),
        SourceKind::Attendance => rows
            .iter()
            .map(|row| Candidate {
                id: map.get(&row.cells, &attendance::ID).to_string(),
                first_name: map.get(&row.cells, &attendance::FIRST_NAME).to_string(),
                last_name: map.get(&row.cells, &attendance::LAST_NAME).to_string(),
                school: map.get(&row.cells, &attendance::SCHOOL).to_string(),
                grade: map.get(&row.cells, &attendance::SCHOOL_YEAR).to_string(),
                seen_at: ws.clock.timestamp(map.get(&row.cells, &attendance::TIMESTAMP)),
                ..Candidate::default()
            })
            .collect(),
    };
    Ok(Some(candidates))
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub school: String,
    pub email: String,
    pub grade: String,
    /// "known" or "roster"
    pub source: String,
    pub label: String,
}

pub const DEFAULT_SUGGESTIONS: usize = 10;
pub const MAX_SUGGESTIONS: usize = 20;

pub fn clamp_limit(limit: Option<usize>) -> usize {
    match limit {
        Some(0) | None => DEFAULT_SUGGESTIONS,
        Some(n) => n.clamp(1, MAX_SUGGESTIONS),
    }
}

/// Score each entry against the whitespace-separated tokens of `query`:
/// +6 exact, +4 prefix, +2 substring for every (token, field) pair.
pub fn rank<'a>(
    entries: impl IntoIterator<Item = &'a DirectoryEntry>,
    query: &str,
    limit: Option<usize>,
) -> Vec<Suggestion> {
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(normalize_text)
        .filter(|token| !token.is_empty())
        .collect();
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(u32, String, Suggestion)> = entries
        .into_iter()
        .filter_map(|entry| {
            let person = &entry.person;
            let full = person.full_name();
            let fields = [
                normalize_text(&person.id),
                normalize_text(&person.first_name),
                normalize_text(&person.last_name),
                normalize_text(&full),
                normalize_text(&person.school),
                normalize_text(&person.email),
                normalize_text(&person.grade),
            ];
            let score = score(&tokens, &fields);
            (score > 0).then(|| (score, full.clone(), suggestion(entry, &full)))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.id.cmp(&b.2.id))
    });
    scored
        .into_iter()
        .take(clamp_limit(limit))
        .map(|(_, _, suggestion)| suggestion)
        .collect()
}

fn score(tokens: &[String], fields: &[String]) -> u32 {
    let mut total = 0;
    for token in tokens {
        for field in fields.iter().filter(|field| !field.is_empty()) {
            if field == token {
                total += 6;
            } else if field.starts_with(token.as_str()) {
                total += 4;
            } else if field.contains(token.as_str()) {
                total += 2;
            }
        }
    }
    total
}

fn suggestion(entry: &DirectoryEntry, full: &str) -> Suggestion {
    let person = &entry.person;
    let head: Vec<&str> = [full, person.id.as_str()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect();
    let meta: Vec<&str> = [person.school.as_str(), person.grade.as_str()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect();
    let label = if meta.is_empty() {
        head.join(" · ")
    } else {
        format!("{} ({})", head.join(" · "), meta.join(" • "))
    };
    Suggestion {
        id: person.id.clone(),
        first_name: person.first_name.clone(),
        last_name: person.last_name.clone(),
        school: person.school.clone(),
        email: person.email.clone(),
        grade: person.grade.clone(),
        source: if entry.known { "known" } else { "roster" }.to_string(),
        label,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{MemoryStore, TabularStore};
    use crate::workspace::testing::{strings, workspace_with};

    fn entry(id: &str, first: &str, last: &str) -> DirectoryEntry {
        DirectoryEntry {
            person: Person {
                id: id.to_string(),
                first_name: first.to_string(),
                last_name: last.to_string(),
                ..Person::default()
            },
            ..DirectoryEntry::default()
        }
    }

    #[test]
    fn grades_normalize_to_labels() {
        for input in ["9", "9th", "Freshman", "grade 9", "FRESHMEN", "Year 1"] {
            assert_eq!(normalize_grade(input), "Freshman", "{input}");
        }
        assert_eq!(normalize_grade("10th Grade"), "Sophomore");
        assert_eq!(normalize_grade("11"), "Junior");
        assert_eq!(normalize_grade("13"), "Senior");
        assert_eq!(normalize_grade("N/A"), "N/A");
        assert_eq!(normalize_grade("n/a"), "N/A");
        assert_eq!(normalize_grade("8th"), "8th");
        assert_eq!(normalize_grade("graduated"), "Graduated");
        assert_eq!(normalize_grade("  "), "");
    }

    #[test]
    fn only_grade_shaped_numbers_map_to_labels() {
        assert_eq!(normalize_grade("11 th"), "Junior");
        assert_eq!(normalize_grade("Grade 12"), "Senior");
        assert_eq!(normalize_grade("12th grade"), "Senior");
        assert_eq!(normalize_grade("Class of 2027"), "Class Of 2027");
        assert_eq!(normalize_grade("Room 12"), "Room 12");
        assert_eq!(normalize_grade("9-10"), "9-10");
    }

    #[test]
    fn text_normalization_strips_accents() {
        assert_eq!(normalize_text("  José ÁLVAREZ "), "jose alvarez");
        assert_eq!(split_first_rest("Ana Maria  Ruiz"), ("Ana".into(), "Maria Ruiz".into()));
        assert_eq!(split_first_rest("Prince"), ("Prince".into(), String::new()));
    }

    #[test]
    fn exact_matches_outrank_prefixes() {
        let entries = vec![entry("2", "Jane", "D."), entry("1", "Jane", "Doe")];
        let ranked = rank(&entries, "Jane Doe", None);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, "1");
        assert_eq!(ranked[1].id, "2");
        assert_eq!(ranked[0].label, "Jane Doe · 1");
    }

    #[test]
    fn ties_break_on_name_then_id_and_limit_is_clamped() {
        let entries: Vec<DirectoryEntry> = (0..30)
            .map(|n| entry(&format!("S{n:02}"), "Sam", if n % 2 == 0 { "Beta" } else { "Alpha" }))
            .collect();
        let ranked = rank(&entries, "sam", Some(500));
        assert_eq!(ranked.len(), MAX_SUGGESTIONS);
        assert_eq!(ranked[0].id, "S01");
        assert_eq!(ranked[1].id, "S03");
        assert_eq!(rank(&entries, "sam", None).len(), DEFAULT_SUGGESTIONS);
        assert!(rank(&entries, "   ", None).is_empty());
        assert!(rank(&entries, "zzz", None).is_empty());
    }

    #[test]
    fn label_carries_school_and_grade() {
        let mut e = entry("S1", "Ana", "Ruiz");
        e.person.school = "Lincoln".into();
        e.person.grade = "Junior".into();
        e.known = true;
        let ranked = rank([&e], "ana", None);
        assert_eq!(ranked[0].label, "Ana Ruiz · S1 (Lincoln • Junior)");
        assert_eq!(ranked[0].source, "known");
    }

    async fn seed(store: &MemoryStore, table: &str, header: &[&str], rows: &[&[&str]]) {
        store.create_table(table, &strings(header)).await.unwrap();
        for row in rows {
            store.append_row(table, strings(row)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn higher_priority_source_wins_regardless_of_order() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            "2026",
            &["CPS ID Number", "First Name", "Last Name", "School"],
            &[&["S100", "Ana", "Ruiz", "Lincoln"]],
        )
        .await;
        seed(
            &store,
            "sign_in_log",
            &["Timestamp", "ID number", "First Name + Last Name", "School"],
            &[&["2025-03-01T09:00:00-06:00", "S100", "Anita Ruiz", "Douglass"]],
        )
        .await;
        let ws = workspace_with(store);

        let roster_first = [
            Source::new("2026", SourceKind::Roster, ROSTER_PRIORITY),
            Source::new("sign_in_log", SourceKind::SignInLog, SIGN_IN_PRIORITY),
        ];
        let log_first = [roster_first[1].clone(), roster_first[0].clone()];
        for sources in [&roster_first[..], &log_first[..]] {
            let index = build_index(&ws, sources).await.unwrap();
            let merged = index.get("S100").unwrap();
            assert_eq!(merged.person.school, "Lincoln");
            assert_eq!(merged.person.first_name, "Ana");
            assert_eq!(
                merged.last_sign_in.as_deref(),
                Some("2025-03-01T09:00:00-06:00")
            );
        }
    }

    #[tokio::test]
    async fn first_value_wins_within_a_tier_and_blank_ids_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            "2026",
            &["CPS ID", "Full Name", "Email Address", "Participant Emails", "Grade at Intake"],
            &[
                &["S1", "Ana Ruiz", "", "ana@a.org; alt@a.org", "9th"],
                &["S1", "Ana R", "other@a.org", "", "10"],
                &["", "Nobody", "", "", ""],
            ],
        )
        .await;
        let ws = workspace_with(store);
        let index = build_index(&ws, &[Source::new("2026", SourceKind::Roster, ROSTER_PRIORITY)])
            .await
            .unwrap();

        let merged = index.get("S1").unwrap();
        assert_eq!(merged.person.last_name, "Ruiz");
        assert_eq!(merged.person.email, "ana@a.org");
        assert_eq!(merged.person.grade, "Freshman");
        assert!(!merged.known);
        let stats = &index.sources["2026"];
        assert_eq!((stats.considered, stats.merged, stats.skipped), (3, 2, 1));
    }

    #[tokio::test]
    async fn directory_is_cached_until_invalidated() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            "known_students",
            &["StudentID", "FirstName", "LastName"],
            &[&["S1", "Ana", "Ruiz"]],
        )
        .await;
        let ws = workspace_with(store.clone());

        let names = names_for_ids(&ws, &strings(&["S1", " ", "S9", "S1"])).await.unwrap();
        assert_eq!(
            names,
            vec![
                LinkedPerson { id: "S1".into(), name: "Ana Ruiz".into() },
                LinkedPerson { id: "S9".into(), name: "S9".into() },
            ]
        );

        store
            .append_row("known_students", strings(&["S2", "Ben", "Ode"]))
            .await
            .unwrap();
        assert!(directory(&ws).await.unwrap().get("S2").is_none());
        invalidate(&ws);
        let fresh = directory(&ws).await.unwrap();
        assert!(fresh.get("S2").unwrap().known);
    }
}
