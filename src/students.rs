//! The known_students directory: one row per student id, upserted on every
//! sign-in and never deleted.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::cache::CacheKey;
use crate::error::{Error, Result};
use crate::lock::Held;
use crate::models::{KnownStudent, Person};
use crate::roster::{self, normalize_grade};
use crate::schema::{self, known_students as ks};
use crate::store::{RowKey, RowUpdate};
use crate::workspace::Workspace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted {
    pub created: bool,
    pub row_key: RowKey,
}

/// All known students, cached for five minutes.
pub async fn fetch_known(ws: &Workspace) -> Result<Vec<KnownStudent>> {
    if let Some(hit) = ws.cache.get::<Vec<KnownStudent>>(&CacheKey::KnownStudents) {
        return Ok(hit);
    }
    let store = ws.store();
    let Some(map) = schema::inspect(store, ks::TABLE.name, &ks::TABLE).await? else {
        return Ok(Vec::new());
    };
    let known: Vec<KnownStudent> = store
        .rows(ks::TABLE.name)
        .await?
        .iter()
        .filter_map(|row| {
            let id = map.get(&row.cells, &ks::STUDENT_ID);
            if id.is_empty() {
                return None;
            }
            Some(KnownStudent {
                person: Person {
                    id: id.to_string(),
                    first_name: map.get(&row.cells, &ks::FIRST_NAME).to_string(),
                    last_name: map.get(&row.cells, &ks::LAST_NAME).to_string(),
                    school: map.get(&row.cells, &ks::SCHOOL).to_string(),
                    email: map.get(&row.cells, &ks::EMAIL).to_string(),
                    grade: map.get(&row.cells, &ks::GRADE).to_string(),
                },
                created_at: map.get(&row.cells, &ks::CREATED_AT).to_string(),
                last_sign_in: map.get(&row.cells, &ks::LAST_SIGN_IN).to_string(),
            })
        })
        .collect();
    ws.cache.put(CacheKey::KnownStudents, &known);
    Ok(known)
}

pub fn invalidate(ws: &Workspace) {
    ws.cache.remove(&CacheKey::KnownStudents);
    roster::invalidate(ws);
}

/// Insert or refresh the row for `student.id`.
///
/// Blank incoming fields never clear stored ones. CreatedAt is filled only
/// when blank; LastSignIn is written only when `last_sign_in` is given.
pub async fn upsert_locked(
    ws: &Workspace,
    held: &Held<'_>,
    student: &Person,
    last_sign_in: Option<String>,
) -> Result<Upserted> {
    let id = student.id.trim();
    if id.is_empty() {
        return Err(Error::validation("Student ID is required."));
    }
    let store = ws.store();
    let map = schema::ensure_table(store, ks::TABLE.name, &ks::TABLE).await?;
    let incoming = [
        (&ks::FIRST_NAME, student.first_name.trim().to_string()),
        (&ks::LAST_NAME, student.last_name.trim().to_string()),
        (&ks::SCHOOL, student.school.trim().to_string()),
        (&ks::EMAIL, student.email.trim().to_string()),
        (&ks::GRADE, normalize_grade(&student.grade)),
    ];
    let now = ws.clock.stamp();

    let rows = store.rows(ks::TABLE.name).await?;
    if let Some(existing) = rows
        .iter()
        .find(|row| map.get(&row.cells, &ks::STUDENT_ID) == id)
    {
        let mut update = RowUpdate::new(existing.key);
        for (field, value) in &incoming {
            if !value.is_empty() {
                update = update.set(map.require(field)?, value.clone());
            }
        }
        if let Some(at) = &last_sign_in {
            update = update.set(map.require(&ks::LAST_SIGN_IN)?, at.clone());
        }
        if map.get(&existing.cells, &ks::CREATED_AT).is_empty() {
            update = update.set(map.require(&ks::CREATED_AT)?, now);
        }
        held.update_rows(ks::TABLE.name, &[update]).await?;
        invalidate(ws);
        debug!(id, "refreshed known student");
        return Ok(Upserted {
            created: false,
            row_key: existing.key,
        });
    }

    let mut row = map.blank_row();
    map.put(&mut row, &ks::STUDENT_ID, id)?;
    for (field, value) in incoming {
        map.put(&mut row, field, value)?;
    }
    map.put(&mut row, &ks::CREATED_AT, now)?;
    if let Some(at) = last_sign_in {
        map.put(&mut row, &ks::LAST_SIGN_IN, at)?;
    }
    let row_key = held.append_row(ks::TABLE.name, row).await?;
    invalidate(ws);
    info!(id, "added known student");
    Ok(Upserted {
        created: true,
        row_key,
    })
}

/// Append rows for people whose id is not yet known. Existing rows are
/// never touched. Returns how many rows were added.
pub async fn insert_missing_locked(
    ws: &Workspace,
    held: &Held<'_>,
    people: Vec<(Person, Option<String>)>,
) -> Result<usize> {
    let store = ws.store();
    let map = schema::ensure_table(store, ks::TABLE.name, &ks::TABLE).await?;
    let mut known: HashSet<String> = store
        .rows(ks::TABLE.name)
        .await?
        .iter()
        .map(|row| map.get(&row.cells, &ks::STUDENT_ID).to_string())
        .filter(|id| !id.is_empty())
        .collect();
    let now = ws.clock.stamp();

    let mut rows = Vec::new();
    for (person, last_sign_in) in people {
        let person = person.trimmed();
        if person.id.is_empty() || !known.insert(person.id.clone()) {
            continue;
        }
        let mut row = map.blank_row();
        map.put(&mut row, &ks::STUDENT_ID, person.id)?;
        map.put(&mut row, &ks::FIRST_NAME, person.first_name)?;
        map.put(&mut row, &ks::LAST_NAME, person.last_name)?;
        map.put(&mut row, &ks::SCHOOL, person.school)?;
        map.put(&mut row, &ks::EMAIL, person.email)?;
        map.put(&mut row, &ks::GRADE, normalize_grade(&person.grade))?;
        map.put(&mut row, &ks::CREATED_AT, now.as_str())?;
        map.put(&mut row, &ks::LAST_SIGN_IN, last_sign_in.unwrap_or_default())?;
        rows.push(row);
    }
    let added = rows.len();
    if added > 0 {
        held.append_rows(ks::TABLE.name, rows).await?;
        invalidate(ws);
    }
    info!(added, "inserted missing known students");
    Ok(added)
}
