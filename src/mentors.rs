//! Read-only mentor directory.

use std::collections::HashMap;

use crate::cache::CacheKey;
use crate::error::Result;
use crate::models::Mentor;
use crate::schema::{self, mentors as m};
use crate::workspace::Workspace;

fn is_active_cell(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "true" | "t" | "yes" | "y" | "1" | "✓"
    )
}

/// Mentors sorted by last then first name. A missing table, or one without
/// an id column, is an empty directory.
pub async fn list(ws: &Workspace, active_only: bool) -> Result<Vec<Mentor>> {
    let key = CacheKey::Mentors { active_only };
    if let Some(hit) = ws.cache.get::<Vec<Mentor>>(&key) {
        return Ok(hit);
    }
    let store = ws.store();
    let table = ws.settings.mentors_table.as_str();
    let Some(map) = schema::inspect(store, table, &m::TABLE).await? else {
        return Ok(Vec::new());
    };
    if !map.has(&m::ID) {
        return Ok(Vec::new());
    }
    let has_active = map.has(&m::ACTIVE);

    let mut mentors: Vec<Mentor> = store
        .rows(table)
        .await?
        .iter()
        .filter_map(|row| {
            let id = map.get(&row.cells, &m::ID);
            if id.is_empty() {
                return None;
            }
            let first = map.get(&row.cells, &m::FIRST_NAME).to_string();
            let last = map.get(&row.cells, &m::LAST_NAME).to_string();
            let name = match format!("{first} {last}").trim() {
                "" => id.to_string(),
                full => full.to_string(),
            };
            Some(Mentor {
                id: id.to_string(),
                first,
                last,
                name,
                active: !has_active || is_active_cell(map.get(&row.cells, &m::ACTIVE)),
            })
        })
        .filter(|mentor| !active_only || mentor.active)
        .collect();
    mentors.sort_by(|a, b| {
        a.last
            .to_lowercase()
            .cmp(&b.last.to_lowercase())
            .then_with(|| a.first.to_lowercase().cmp(&b.first.to_lowercase()))
    });
    ws.cache.put(key, &mentors);
    Ok(mentors)
}

/// Uppercased mentor id to display name.
pub async fn names_by_id(ws: &Workspace) -> Result<HashMap<String, String>> {
    Ok(list(ws, true)
        .await?
        .into_iter()
        .map(|mentor| (mentor.id.to_uppercase(), mentor.name))
        .collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{MemoryStore, TabularStore};
    use crate::workspace::testing::{strings, workspace, workspace_with};

    async fn seeded(header: &[&str], rows: &[&[&str]]) -> Workspace {
        let store = Arc::new(MemoryStore::new());
        store.create_table("mentors", &strings(header)).await.unwrap();
        store
            .append_rows("mentors", rows.iter().map(|row| strings(row)).collect())
            .await
            .unwrap();
        workspace_with(store)
    }

    #[tokio::test]
    async fn active_filter_and_sort_order() {
        let ws = seeded(
            &["Mentor ID", "First Name", "Last Name", "Active"],
            &[
                &["m2", "Zoe", "Adams", "yes"],
                &["m1", "Al", "Baker", "✓"],
                &["m3", "Cy", "Adams", "no"],
                &["", "Ghost", "Row", "yes"],
                &["m4", "", "", "1"],
            ],
        )
        .await;

        let all: Vec<String> = list(&ws, false)
            .await
            .unwrap()
            .into_iter()
            .map(|mentor| mentor.id)
            .collect();
        assert_eq!(all, vec!["m4", "m3", "m2", "m1"]);

        let active = list(&ws, true).await.unwrap();
        let ids: Vec<&str> = active.iter().map(|mentor| mentor.id.as_str()).collect();
        assert_eq!(ids, vec!["m4", "m2", "m1"]);
        assert_eq!(active[0].name, "m4");
        assert_eq!(active[1].name, "Zoe Adams");
    }

    #[tokio::test]
    async fn missing_active_column_means_everyone_is_active() {
        let ws = seeded(&["ID", "First", "Last"], &[&["m1", "Al", "Baker"]]).await;
        let mentors = list(&ws, true).await.unwrap();
        assert_eq!(mentors.len(), 1);
        assert!(mentors[0].active);
        assert_eq!(names_by_id(&ws).await.unwrap()["M1"], "Al Baker");
    }

    #[tokio::test]
    async fn missing_table_or_id_column_is_empty() {
        assert!(list(&workspace(), false).await.unwrap().is_empty());
        let ws = seeded(&["First", "Last"], &[&["Al", "Baker"]]).await;
        assert!(list(&ws, false).await.unwrap().is_empty());
    }
}
