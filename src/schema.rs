//! Logical column registry for every table the desk reads or writes.
//!
//! Headers in the workbook are edited by hand, so each logical field lists
//! the header spellings it accepts. Spellings are compared after
//! [`normalize_key`], which ignores case, accents and punctuation. A table is
//! resolved once per open into a [`ColumnMap`]; writes go through it and never
//! through hard-coded positions.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::{Error, Result};
use crate::store::TabularStore;

#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    /// Spelling written when the column is seeded or appended
    pub header: &'static str,
    /// Accepted normalized spellings, tried in order
    pub aliases: &'static [&'static str],
    /// Seeded into new tables and appended to existing ones when absent
    pub ensure: bool,
}

impl FieldDef {
    pub const fn ensured(header: &'static str, aliases: &'static [&'static str]) -> Self {
        Self {
            header,
            aliases,
            ensure: true,
        }
    }

    pub const fn optional(header: &'static str, aliases: &'static [&'static str]) -> Self {
        Self {
            header,
            aliases,
            ensure: false,
        }
    }
}

#[derive(Debug)]
pub struct TableDef {
    /// Default table name; configurable tables are opened under another name
    pub name: &'static str,
    pub columns: &'static [FieldDef],
}

impl TableDef {
    pub fn default_header(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|field| field.ensure)
            .map(|field| field.header.to_string())
            .collect()
    }

    fn position(&self, field: &FieldDef) -> Option<usize> {
        self.columns
            .iter()
            .position(|candidate| candidate.header == field.header)
    }
}

/// Lowercase, strip accents, keep only ASCII letters and digits.
pub fn normalize_key(raw: &str) -> String {
    raw.nfd()
        .filter(|ch| !is_combining_mark(*ch))
        .flat_map(char::to_lowercase)
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Physical positions of a table's logical fields.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    table: String,
    def: &'static TableDef,
    indices: Vec<Option<usize>>,
    width: usize,
}

impl ColumnMap {
    pub fn resolve(table: &str, def: &'static TableDef, header: &[String]) -> Self {
        let normalized: Vec<String> = header.iter().map(|title| normalize_key(title)).collect();
        let indices = def
            .columns
            .iter()
            .map(|field| {
                field.aliases.iter().find_map(|alias| {
                    normalized
                        .iter()
                        .position(|candidate| !candidate.is_empty() && candidate == alias)
                })
            })
            .collect();
        Self {
            table: table.to_string(),
            def,
            indices,
            width: header.len(),
        }
    }

    pub fn index(&self, field: &FieldDef) -> Option<usize> {
        self.def
            .position(field)
            .and_then(|position| self.indices[position])
    }

    pub fn has(&self, field: &FieldDef) -> bool {
        self.index(field).is_some()
    }

    pub fn require(&self, field: &FieldDef) -> Result<usize> {
        self.index(field)
            .ok_or_else(|| Error::column(&self.table, field.header))
    }

    fn missing_ensured(&self) -> Vec<String> {
        self.def
            .columns
            .iter()
            .zip(&self.indices)
            .filter(|(field, index)| field.ensure && index.is_none())
            .map(|(field, _)| field.header.to_string())
            .collect()
    }

    /// Trimmed cell for `field`, or "" when the column or cell is absent.
    pub fn get<'r>(&self, cells: &'r [String], field: &FieldDef) -> &'r str {
        self.index(field)
            .and_then(|index| cells.get(index))
            .map(|value| value.trim())
            .unwrap_or("")
    }

    pub fn blank_row(&self) -> Vec<String> {
        vec![String::new(); self.width]
    }

    /// Write `value` into `field`; fails rather than guessing a position.
    pub fn put(&self, cells: &mut Vec<String>, field: &FieldDef, value: impl Into<String>) -> Result<()> {
        let index = self.require(field)?;
        crate::store::write_cell(cells, index, value.into());
        Ok(())
    }

    /// Write `value` into `field` when the column exists.
    pub fn put_if_present(&self, cells: &mut Vec<String>, field: &FieldDef, value: impl Into<String>) {
        if let Some(index) = self.index(field) {
            crate::store::write_cell(cells, index, value.into());
        }
    }
}

/// Open `name`, creating it from `def` when missing and repairing its header.
pub async fn ensure_table(
    store: &dyn TabularStore,
    name: &str,
    def: &'static TableDef,
) -> Result<ColumnMap> {
    if !store.table_exists(name).await? {
        store.create_table(name, &def.default_header()).await?;
    }
    repair(store, name, def).await
}

/// Open a table that must already exist; missing columns are still appended.
pub async fn open_existing(
    store: &dyn TabularStore,
    name: &str,
    def: &'static TableDef,
) -> Result<ColumnMap> {
    if !store.table_exists(name).await? {
        return Err(Error::MissingTable(name.to_string()));
    }
    repair(store, name, def).await
}

/// Resolve a read-only source without touching it; `None` when absent.
pub async fn inspect(
    store: &dyn TabularStore,
    name: &str,
    def: &'static TableDef,
) -> Result<Option<ColumnMap>> {
    if !store.table_exists(name).await? {
        return Ok(None);
    }
    let header = store.header(name).await?;
    Ok(Some(ColumnMap::resolve(name, def, &header)))
}

async fn repair(store: &dyn TabularStore, name: &str, def: &'static TableDef) -> Result<ColumnMap> {
    let mut header = store.header(name).await?;
    if header.iter().all(|title| title.trim().is_empty()) {
        let mut seeded = def.default_header();
        if seeded.len() < header.len() {
            seeded.resize(header.len(), String::new());
        }
        store.set_header(name, &seeded).await?;
        header = seeded;
    }

    let map = ColumnMap::resolve(name, def, &header);
    let missing = map.missing_ensured();
    if missing.is_empty() {
        return Ok(map);
    }

    tracing::info!(table = name, columns = ?missing, "appending missing columns");
    header.extend(missing);
    store.set_header(name, &header).await?;
    Ok(ColumnMap::resolve(name, def, &header))
}

pub mod sign_in_log {
    use super::{FieldDef, TableDef};

    pub const TIMESTAMP: FieldDef =
        FieldDef::ensured("Timestamp", &["timestamp", "date", "signindate"]);
    pub const ID: FieldDef =
        FieldDef::ensured("ID number", &["idnumber", "id", "studentid", "cpsid"]);
    pub const NAME: FieldDef = FieldDef::ensured(
        "First Name + Last Name",
        &[
            "firstnamelastname",
            "name",
            "fullname",
            "studentname",
            "firstlast",
            "fullnamestudent",
        ],
    );
    pub const SCHOOL: FieldDef = FieldDef::ensured("School", &["school", "site"]);
    pub const MENTOR: FieldDef =
        FieldDef::ensured("Mentor", &["mentor", "mentorid", "staff", "advisor"]);
    pub const STATUS: FieldDef = FieldDef::ensured("Status", &["status"]);
    pub const CLAIMED_BY: FieldDef = FieldDef::ensured("ClaimedBy", &["claimedby"]);
    pub const CLAIMED_AT: FieldDef = FieldDef::ensured("ClaimedAt", &["claimedat"]);
    pub const PROCESSED_AT: FieldDef = FieldDef::ensured("ProcessedAt", &["processedat"]);
    pub const CONTACT_ID: FieldDef = FieldDef::ensured("ContactID", &["contactid"]);
    pub const GROUP: FieldDef = FieldDef::optional("Group", &["group", "session", "sessionlabel"]);

    pub const TABLE: TableDef = TableDef {
        name: "sign_in_log",
        columns: &[
            TIMESTAMP,
            ID,
            NAME,
            SCHOOL,
            MENTOR,
            STATUS,
            CLAIMED_BY,
            CLAIMED_AT,
            PROCESSED_AT,
            CONTACT_ID,
            GROUP,
        ],
    };
}

pub mod known_students {
    use super::{FieldDef, TableDef};

    pub const STUDENT_ID: FieldDef =
        FieldDef::ensured("StudentID", &["studentid", "id", "cpsid", "cpsidnumber"]);
    pub const FIRST_NAME: FieldDef = FieldDef::ensured("FirstName", &["firstname", "first"]);
    pub const LAST_NAME: FieldDef = FieldDef::ensured("LastName", &["lastname", "last"]);
    pub const SCHOOL: FieldDef = FieldDef::ensured("School", &["school", "site"]);
    pub const EMAIL: FieldDef = FieldDef::ensured("Email", &["email", "emailaddress"]);
    pub const GRADE: FieldDef =
        FieldDef::ensured("Grade", &["grade", "currentgrade", "currentgradelevel"]);
    pub const CREATED_AT: FieldDef = FieldDef::ensured("CreatedAt", &["createdat", "created"]);
    pub const LAST_SIGN_IN: FieldDef =
        FieldDef::ensured("LastSignIn", &["lastsignin", "lastsignedin"]);

    pub const TABLE: TableDef = TableDef {
        name: "known_students",
        columns: &[
            STUDENT_ID,
            FIRST_NAME,
            LAST_NAME,
            SCHOOL,
            EMAIL,
            GRADE,
            CREATED_AT,
            LAST_SIGN_IN,
        ],
    };
}

pub mod sign_in_sessions {
    use super::{FieldDef, TableDef};

    pub const SESSION_ID: FieldDef = FieldDef::ensured("SessionID", &["sessionid", "id"]);
    pub const LABEL: FieldDef = FieldDef::ensured("Label", &["label", "group", "name"]);
    pub const TYPE: FieldDef = FieldDef::ensured("Type", &["type", "sessiontype"]);
    pub const DATE: FieldDef = FieldDef::ensured("Date", &["date", "ymd"]);
    pub const IS_ACTIVE: FieldDef = FieldDef::ensured("IsActive", &["isactive", "active"]);
    pub const CREATED_AT: FieldDef = FieldDef::ensured("CreatedAt", &["createdat", "created"]);
    pub const CLOSED_AT: FieldDef = FieldDef::ensured("ClosedAt", &["closedat", "closed"]);
    pub const LAST_SIGN_IN_AT: FieldDef =
        FieldDef::ensured("LastSignInAt", &["lastsigninat", "lastsignin"]);
    pub const SIGN_IN_COUNT: FieldDef =
        FieldDef::ensured("SignInCount", &["signincount", "signins"]);

    pub const TABLE: TableDef = TableDef {
        name: "sign_in_sessions",
        columns: &[
            SESSION_ID,
            LABEL,
            TYPE,
            DATE,
            IS_ACTIVE,
            CREATED_AT,
            CLOSED_AT,
            LAST_SIGN_IN_AT,
            SIGN_IN_COUNT,
        ],
    };
}

pub mod attendance {
    use super::{FieldDef, TableDef};

    pub const TIMESTAMP: FieldDef = FieldDef::ensured("Timestamp", &["timestamp", "date"]);
    pub const FIRST_NAME: FieldDef = FieldDef::ensured("First Name", &["firstname", "first"]);
    pub const LAST_NAME: FieldDef = FieldDef::ensured("Last Name", &["lastname", "last"]);
    pub const SCHOOL_YEAR: FieldDef =
        FieldDef::ensured("School Year", &["schoolyear", "grade", "currentgrade"]);
    pub const SCHOOL: FieldDef = FieldDef::ensured("School", &["school", "site"]);
    pub const ID: FieldDef =
        FieldDef::ensured("ID Number", &["idnumber", "id", "studentid", "cpsid"]);
    pub const GROUP: FieldDef = FieldDef::ensured("Group", &["group", "session"]);

    pub const TABLE: TableDef = TableDef {
        name: "attendance",
        columns: &[TIMESTAMP, FIRST_NAME, LAST_NAME, SCHOOL_YEAR, SCHOOL, ID, GROUP],
    };
}

/// Intake form / roster tables. Read only.
pub mod roster {
    use super::{FieldDef, TableDef};

    pub const ID: FieldDef = FieldDef::optional(
        "CPS ID Number",
        &["cpsidnumber", "cpsid", "idnumber", "id", "studentid"],
    );
    pub const FIRST_NAME: FieldDef =
        FieldDef::optional("First Name", &["firstname", "first", "fname", "givenname"]);
    pub const LAST_NAME: FieldDef = FieldDef::optional(
        "Last Name",
        &["lastname", "last", "lname", "surname", "familyname"],
    );
    pub const FULL_NAME: FieldDef = FieldDef::optional(
        "Full Name",
        &["firstnamelastname", "fullname", "name", "studentname"],
    );
    pub const SCHOOL: FieldDef = FieldDef::optional("School", &["school", "site"]);
    pub const EMAIL: FieldDef = FieldDef::optional("Email Address", &["emailaddress", "email"]);
    pub const PARTICIPANT_EMAILS: FieldDef =
        FieldDef::optional("Participant Emails", &["participantemails", "participantemail"]);
    pub const CURRENT_GRADE: FieldDef = FieldDef::optional(
        "Current Grade Level",
        &["currentgradelevel", "currentgrade", "grade"],
    );
    pub const GRADE_AT_INTAKE: FieldDef =
        FieldDef::optional("Grade at Intake", &["gradeatintake"]);

    pub const TABLE: TableDef = TableDef {
        name: "2026",
        columns: &[
            ID,
            FIRST_NAME,
            LAST_NAME,
            FULL_NAME,
            SCHOOL,
            EMAIL,
            PARTICIPANT_EMAILS,
            CURRENT_GRADE,
            GRADE_AT_INTAKE,
        ],
    };
}

/// Staff directory. Read only.
pub mod mentors {
    use super::{FieldDef, TableDef};

    pub const ID: FieldDef =
        FieldDef::optional("MentorID", &["mentorid", "id", "employeeid", "staffid"]);
    pub const FIRST_NAME: FieldDef =
        FieldDef::optional("FirstName", &["firstname", "first", "fname", "givenname"]);
    pub const LAST_NAME: FieldDef = FieldDef::optional(
        "LastName",
        &["lastname", "last", "lname", "surname", "familyname"],
    );
    pub const ACTIVE: FieldDef =
        FieldDef::optional("Active", &["active", "isactive", "enabled", "status"]);

    pub const TABLE: TableDef = TableDef {
        name: "mentors",
        columns: &[ID, FIRST_NAME, LAST_NAME, ACTIVE],
    };
}

pub mod group_contact_sessions {
    use super::{FieldDef, TableDef};

    pub const CONTACT_ID: FieldDef = FieldDef::ensured("ContactID", &["contactid"]);
    pub const DATE: FieldDef = FieldDef::ensured("Date", &["date"]);
    pub const GROUP: FieldDef = FieldDef::ensured("Group", &["group"]);
    pub const TOPIC: FieldDef = FieldDef::ensured("Topic", &["topic", "subject"]);
    pub const SUMMARY: FieldDef =
        FieldDef::ensured("Summary", &["summary", "note", "notes", "description"]);
    pub const DURATION: FieldDef = FieldDef::ensured(
        "DurationMinutes",
        &["durationminutes", "duration", "minutes", "mins"],
    );
    pub const CREATED_AT: FieldDef = FieldDef::ensured("CreatedAt", &["createdat", "created"]);
    pub const EDITED_AT: FieldDef =
        FieldDef::ensured("EditedAt", &["editedat", "lastedited", "updated"]);

    pub const TABLE: TableDef = TableDef {
        name: "group_contact_sessions",
        columns: &[
            CONTACT_ID, DATE, GROUP, TOPIC, SUMMARY, DURATION, CREATED_AT, EDITED_AT,
        ],
    };
}

pub mod group_contact_participants {
    use super::{FieldDef, TableDef};

    pub const CONTACT_ID: FieldDef = FieldDef::ensured("ContactID", &["contactid"]);
    pub const STUDENT_ID: FieldDef =
        FieldDef::ensured("StudentID", &["studentid", "id", "cpsid", "participantid"]);
    pub const FIRST_NAME: FieldDef = FieldDef::ensured("FirstName", &["firstname", "first"]);
    pub const LAST_NAME: FieldDef = FieldDef::ensured("LastName", &["lastname", "last"]);
    pub const CREATED_AT: FieldDef = FieldDef::ensured("CreatedAt", &["createdat", "created"]);
    pub const EDITED_AT: FieldDef = FieldDef::ensured("EditedAt", &["editedat", "updated"]);

    pub const TABLE: TableDef = TableDef {
        name: "group_contact_participants",
        columns: &[CONTACT_ID, STUDENT_ID, FIRST_NAME, LAST_NAME, CREATED_AT, EDITED_AT],
    };
}

pub mod group_contact_mentors {
    use super::{FieldDef, TableDef};

    pub const CONTACT_ID: FieldDef = FieldDef::ensured("ContactID", &["contactid"]);
    pub const MENTOR_ID: FieldDef = FieldDef::ensured("MentorID", &["mentorid", "id", "staffid"]);
    pub const NAME: FieldDef = FieldDef::ensured("Name", &["name", "mentorname"]);
    pub const CREATED_AT: FieldDef = FieldDef::ensured("CreatedAt", &["createdat", "created"]);
    pub const EDITED_AT: FieldDef = FieldDef::ensured("EditedAt", &["editedat", "updated"]);

    pub const TABLE: TableDef = TableDef {
        name: "group_contact_mentors",
        columns: &[CONTACT_ID, MENTOR_ID, NAME, CREATED_AT, EDITED_AT],
    };
}

pub mod individual_contact_sessions {
    use super::{FieldDef, TableDef};

    pub const CONTACT_ID: FieldDef = FieldDef::ensured("ContactID", &["contactid"]);
    pub const DATE: FieldDef = FieldDef::ensured("Date", &["date"]);
    pub const DURATION: FieldDef =
        FieldDef::ensured("DurationMinutes", &["durationminutes", "minutes", "duration"]);
    pub const CONTACT_WITH: FieldDef = FieldDef::ensured("ContactWith", &["contactwith", "with"]);
    pub const TYPE_OF_CONTACT: FieldDef =
        FieldDef::ensured("TypeOfContact", &["typeofcontact", "channel", "type"]);
    pub const TOPIC: FieldDef = FieldDef::ensured("Topic", &["topic", "topicprimary"]);
    pub const SUCCESS: FieldDef = FieldDef::ensured("Success", &["success", "outcome"]);
    pub const NOTES: FieldDef = FieldDef::ensured("Notes", &["notes", "summary", "description"]);
    pub const REFERRALS: FieldDef =
        FieldDef::ensured("Referrals", &["referrals", "referralsmade"]);
    pub const LOCATION: FieldDef = FieldDef::ensured("Location", &["location", "place"]);
    pub const MENTOR_ID: FieldDef = FieldDef::ensured("MentorID", &["mentorid", "mentor"]);
    pub const CREATED_AT: FieldDef = FieldDef::ensured("CreatedAt", &["createdat", "created"]);
    pub const EDITED_AT: FieldDef =
        FieldDef::ensured("EditedAt", &["editedat", "lastedited", "updated"]);

    pub const TABLE: TableDef = TableDef {
        name: "individual_contact_sessions",
        columns: &[
            CONTACT_ID,
            DATE,
            DURATION,
            CONTACT_WITH,
            TYPE_OF_CONTACT,
            TOPIC,
            SUCCESS,
            NOTES,
            REFERRALS,
            LOCATION,
            MENTOR_ID,
            CREATED_AT,
            EDITED_AT,
        ],
    };
}

pub mod individual_contact_participants {
    use super::{FieldDef, TableDef};

    pub const CONTACT_ID: FieldDef = FieldDef::ensured("ContactID", &["contactid"]);
    pub const STUDENT_ID: FieldDef =
        FieldDef::ensured("StudentID", &["studentid", "id", "cpsid", "participantid"]);
    pub const NOTES_STUDENT: FieldDef =
        FieldDef::ensured("NotesStudent", &["notesstudent", "studentnotes"]);
    pub const CREATED_AT: FieldDef = FieldDef::ensured("CreatedAt", &["createdat", "created"]);

    pub const TABLE: TableDef = TableDef {
        name: "individual_contact_participants",
        columns: &[CONTACT_ID, STUDENT_ID, NOTES_STUDENT, CREATED_AT],
    };
}

/// Tables the desk owns under fixed names.
pub const DESK_TABLES: [&TableDef; 8] = [
    &sign_in_log::TABLE,
    &known_students::TABLE,
    &sign_in_sessions::TABLE,
    &group_contact_sessions::TABLE,
    &group_contact_participants::TABLE,
    &group_contact_mentors::TABLE,
    &individual_contact_sessions::TABLE,
    &individual_contact_participants::TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn keys_ignore_case_accents_and_punctuation() {
        assert_eq!(normalize_key("First Name + Last Name"), "firstnamelastname");
        assert_eq!(normalize_key("  ID number "), "idnumber");
        assert_eq!(normalize_key("Último_Acceso"), "ultimoacceso");
        assert_eq!(normalize_key("LastSignIn_At"), "lastsigninat");
    }

    #[test]
    fn aliases_are_tried_in_order() {
        let header = strings(&["Student Name", "CPS ID", "Site", "Name"]);
        let map = ColumnMap::resolve("sign_in_log", &sign_in_log::TABLE, &header);
        assert_eq!(map.index(&sign_in_log::ID), Some(1));
        assert_eq!(map.index(&sign_in_log::SCHOOL), Some(2));
        // "name" is listed before "studentname"
        assert_eq!(map.index(&sign_in_log::NAME), Some(3));
        assert_eq!(map.index(&sign_in_log::STATUS), None);
        assert!(matches!(
            map.require(&sign_in_log::STATUS),
            Err(Error::ColumnUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn new_tables_are_seeded_with_the_default_header() {
        let store = MemoryStore::new();
        let map = ensure_table(&store, "sign_in_log", &sign_in_log::TABLE)
            .await
            .unwrap();
        let header = store.header("sign_in_log").await.unwrap();
        assert_eq!(header.len(), 10);
        assert_eq!(header[1], "ID number");
        assert_eq!(map.index(&sign_in_log::CONTACT_ID), Some(9));
        assert!(!map.has(&sign_in_log::GROUP));
    }

    #[tokio::test]
    async fn missing_columns_are_appended_without_moving_data() {
        let store = MemoryStore::new();
        store
            .create_table("sign_in_log", &strings(&["Date", "Student ID", "Full Name"]))
            .await
            .unwrap();
        store
            .append_row(
                "sign_in_log",
                strings(&["2025-03-01", "S100", "Ana Ruiz"]),
            )
            .await
            .unwrap();

        let map = ensure_table(&store, "sign_in_log", &sign_in_log::TABLE)
            .await
            .unwrap();
        let header = store.header("sign_in_log").await.unwrap();
        assert_eq!(&header[..3], &strings(&["Date", "Student ID", "Full Name"])[..]);
        assert_eq!(map.index(&sign_in_log::TIMESTAMP), Some(0));
        assert_eq!(map.index(&sign_in_log::ID), Some(1));
        assert!(map.index(&sign_in_log::STATUS).unwrap() >= 3);

        let rows = store.rows("sign_in_log").await.unwrap();
        assert_eq!(map.get(&rows[0].cells, &sign_in_log::ID), "S100");
        assert_eq!(map.get(&rows[0].cells, &sign_in_log::STATUS), "");
    }

    #[tokio::test]
    async fn blank_header_is_reseeded() {
        let store = MemoryStore::new();
        store
            .create_table("known_students", &strings(&["", " "]))
            .await
            .unwrap();
        let map = ensure_table(&store, "known_students", &known_students::TABLE)
            .await
            .unwrap();
        assert_eq!(map.index(&known_students::STUDENT_ID), Some(0));
        assert_eq!(map.blank_row().len(), 8);
    }

    #[tokio::test]
    async fn required_tables_are_not_created() {
        let store = MemoryStore::new();
        let result = open_existing(&store, "attendance", &attendance::TABLE).await;
        assert!(matches!(result, Err(Error::MissingTable(_))));
        assert!(inspect(&store, "2026", &roster::TABLE).await.unwrap().is_none());
    }

    #[test]
    fn put_refuses_unresolved_columns() {
        let header = strings(&["ContactID"]);
        let map = ColumnMap::resolve("group_contact_sessions", &group_contact_sessions::TABLE, &header);
        let mut row = map.blank_row();
        map.put(&mut row, &group_contact_sessions::CONTACT_ID, "abc").unwrap();
        assert!(map.put(&mut row, &group_contact_sessions::TOPIC, "x").is_err());
        map.put_if_present(&mut row, &group_contact_sessions::SUMMARY, "ignored");
        assert_eq!(row, vec!["abc"]);
    }
}
