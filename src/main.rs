use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

mod cache;
mod config;
mod contacts;
mod coordinator;
mod dates;
mod error;
mod lock;
mod mentors;
mod models;
mod queue;
mod roster;
mod schema;
mod sessions;
mod store;
mod students;
mod workspace;

use config::Settings;
use coordinator::Desk;
use dates::Clock;
use models::{GroupNote, IndividualContactPayload, LinkedPerson, Person, PersonRef};
use store::{CsvStore, PgStore, RowKey, TabularStore};
use workspace::Workspace;

#[derive(Parser)]
#[command(name = "signin-desk")]
#[command(about = "Sign-in, queue and contact-note desk for Group Scholar programs", long_about = None)]
struct Cli {
    /// TOML settings file
    #[arg(long, env = "SIGNIN_DESK_CONFIG")]
    config: Option<PathBuf>,
    /// Directory of <table>.csv files to use as the workbook
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Postgres workbook, used when --data-dir is not given
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply migrations (Postgres) and create the desk tables
    InitDb,
    /// Start, or reopen, the session for a label on a day
    StartSession {
        #[arg(long)]
        label: String,
        #[arg(long)]
        date: Option<String>,
        /// group or individual
        #[arg(long = "type", default_value = "individual")]
        session_type: String,
    },
    /// Close a session
    EndSession {
        #[arg(long)]
        session_id: String,
    },
    /// Active sessions for a day
    Sessions {
        #[arg(long)]
        date: Option<String>,
    },
    /// Sign one student into a session; --student is a JSON object
    SignIn {
        #[arg(long)]
        session_id: String,
        #[arg(long)]
        student: String,
    },
    /// Sign several students into a session; --students is a JSON array
    SignInBatch {
        #[arg(long)]
        session_id: String,
        #[arg(long)]
        students: String,
    },
    /// Queue rows for a day
    Queue {
        #[arg(long)]
        date: Option<String>,
        /// Staff identity used to flag rows they claimed
        #[arg(long)]
        viewer: Option<String>,
    },
    /// Claim queue rows
    Claim {
        #[arg(long, value_delimiter = ',')]
        rows: Vec<RowKey>,
        #[arg(long, default_value = "")]
        claimant: String,
    },
    /// Mark queue rows processed under a contact id
    Process {
        #[arg(long, value_delimiter = ',')]
        rows: Vec<RowKey>,
        #[arg(long)]
        contact_id: String,
    },
    /// Attach a contact id to a day's queue rows by student id
    ProcessIds {
        #[arg(long)]
        date: Option<String>,
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        #[arg(long, default_value = "")]
        contact_id: String,
        #[arg(long)]
        status: Option<String>,
    },
    /// Create or update the group session for a day and group
    GroupSession {
        #[arg(long)]
        date: String,
        #[arg(long)]
        group: String,
        #[arg(long, default_value = "")]
        topic: String,
        #[arg(long, default_value = "")]
        summary: String,
        #[arg(long, default_value_t = 0)]
        duration: u32,
    },
    /// Save a group note with its participants and mentors (JSON arrays of {id, name})
    GroupNote {
        #[arg(long)]
        date: String,
        #[arg(long)]
        group: String,
        #[arg(long, default_value = "")]
        topic: String,
        #[arg(long, default_value = "")]
        summary: String,
        #[arg(long, default_value_t = 0)]
        duration: u32,
        #[arg(long, default_value = "[]")]
        participants: String,
        #[arg(long, default_value = "[]")]
        mentors: String,
    },
    /// File an individual contact note; --people is a JSON array of {id, rowKey?}
    IndividualNote {
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        people: String,
        #[arg(long, default_value = "{}")]
        payload: String,
        #[arg(long, value_delimiter = ',')]
        rows: Vec<RowKey>,
    },
    /// Saved notes and mentors for several groups on a day
    Prefill {
        #[arg(long)]
        date: String,
        #[arg(long, value_delimiter = ',')]
        groups: Vec<String>,
    },
    /// Latest saved note for a group on a day
    LatestGroupNote {
        #[arg(long)]
        date: String,
        #[arg(long)]
        group: String,
    },
    /// Search the roster tables
    Suggest {
        #[arg(long)]
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Search everyone the desk knows about
    SignInSuggest {
        #[arg(long)]
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Look up a student by id
    Lookup {
        #[arg(long)]
        id: String,
    },
    /// Display names for ids
    Names {
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
    },
    /// Seed known students from every intake table
    BootstrapRoster,
    /// List mentors
    Mentors {
        /// Include inactive mentors
        #[arg(long)]
        all: bool,
    },
    /// Recent individual contacts per student id
    RecentContacts {
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        #[arg(long)]
        per_id: Option<usize>,
    },
}

fn parse_json<T: DeserializeOwned>(raw: &str, what: &str) -> anyhow::Result<T> {
    serde_json::from_str(raw).with_context(|| format!("--{what} is not valid JSON"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_store(cli: &Cli) -> anyhow::Result<(Arc<dyn TabularStore>, Option<Arc<PgStore>>)> {
    if let Some(dir) = &cli.data_dir {
        let store = CsvStore::open(dir)
            .await
            .with_context(|| format!("failed to open workbook directory {}", dir.display()))?;
        let store: Arc<dyn TabularStore> = Arc::new(store);
        return Ok((store, None));
    }
    let Some(database_url) = &cli.database_url else {
        bail!("either --data-dir or --database-url (DATABASE_URL) is required");
    };
    let store = Arc::new(
        PgStore::connect(database_url)
            .await
            .context("failed to connect to Postgres")?,
    );
    let shared: Arc<dyn TabularStore> = store.clone();
    Ok((shared, Some(store)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    let clock = Clock::system(settings.zone()?);
    let (store, postgres) = open_store(&cli).await?;
    info!(backend = store.backend(), "workbook opened");

    let ws = Workspace::new(store, settings, clock);
    if let Commands::InitDb = cli.command {
        if let Some(pg) = &postgres {
            pg.migrate().await.context("failed to apply migrations")?;
        }
        let held = ws.lock.acquire().await?;
        for def in schema::DESK_TABLES {
            schema::ensure_table(ws.store(), def.name, def).await?;
        }
        schema::ensure_table(ws.store(), &ws.settings.attendance_table, &schema::attendance::TABLE)
            .await?;
        drop(held);
        println!("Workbook ready.");
        return Ok(());
    }

    let desk = Desk::new(ws);
    match cli.command {
        Commands::InitDb => {}
        Commands::StartSession {
            label,
            date,
            session_type,
        } => print_json(
            &desk
                .start_session(&label, date.as_deref(), &session_type)
                .await?,
        )?,
        Commands::EndSession { session_id } => print_json(&desk.end_session(&session_id).await?)?,
        Commands::Sessions { date } => {
            print_json(&desk.list_active_sessions(date.as_deref()).await?)?
        }
        Commands::SignIn {
            session_id,
            student,
        } => {
            let student: Person = parse_json(&student, "student")?;
            print_json(&desk.record_sign_in(&session_id, &student).await?)?
        }
        Commands::SignInBatch {
            session_id,
            students,
        } => {
            let students: Vec<Person> = parse_json(&students, "students")?;
            print_json(&desk.record_batch(&session_id, &students).await?)?
        }
        Commands::Queue { date, viewer } => print_json(
            &desk
                .list_queue(date.as_deref(), viewer.as_deref())
                .await?,
        )?,
        Commands::Claim { rows, claimant } => {
            print_json(&desk.claim_rows(&rows, &claimant).await?)?
        }
        Commands::Process { rows, contact_id } => {
            print_json(&desk.mark_processed(&rows, &contact_id).await?)?
        }
        Commands::ProcessIds {
            date,
            ids,
            contact_id,
            status,
        } => print_json(
            &desk
                .mark_processed_by_ids(date.as_deref(), &ids, &contact_id, status.as_deref())
                .await?,
        )?,
        Commands::GroupSession {
            date,
            group,
            topic,
            summary,
            duration,
        } => {
            let note = GroupNote {
                topic,
                summary,
                duration,
            };
            print_json(&desk.upsert_group_session(&date, &group, &note).await?)?
        }
        Commands::GroupNote {
            date,
            group,
            topic,
            summary,
            duration,
            participants,
            mentors,
        } => {
            let note = GroupNote {
                topic,
                summary,
                duration,
            };
            let participants: Vec<LinkedPerson> = parse_json(&participants, "participants")?;
            let mentors: Vec<LinkedPerson> = parse_json(&mentors, "mentors")?;
            print_json(
                &desk
                    .save_full_group_note(&date, &group, &note, &participants, &mentors)
                    .await?,
            )?
        }
        Commands::IndividualNote {
            date,
            people,
            payload,
            rows,
        } => {
            let people: Vec<PersonRef> = parse_json(&people, "people")?;
            let payload: IndividualContactPayload = parse_json(&payload, "payload")?;
            let rows = (!rows.is_empty()).then_some(rows.as_slice());
            print_json(
                &desk
                    .save_individual_note(date.as_deref(), &people, &payload, rows)
                    .await?,
            )?
        }
        Commands::Prefill { date, groups } => {
            print_json(&desk.group_prefill(&date, &groups).await?)?
        }
        Commands::LatestGroupNote { date, group } => {
            print_json(&desk.latest_group_note(&date, &group).await?)?
        }
        Commands::Suggest { query, limit } => {
            print_json(&desk.suggest_people(&query, limit).await?)?
        }
        Commands::SignInSuggest { query, limit } => {
            print_json(&desk.sign_in_suggest_people(&query, limit).await?)?
        }
        Commands::Lookup { id } => print_json(&desk.lookup_sign_in(&id).await?)?,
        Commands::Names { ids } => print_json(&desk.names_for_ids(&ids).await?)?,
        Commands::BootstrapRoster => print_json(&desk.bootstrap_known_students().await?)?,
        Commands::Mentors { all } => print_json(&desk.list_mentors(!all).await?)?,
        Commands::RecentContacts { ids, per_id } => {
            print_json(&desk.recent_contacts(&ids, per_id).await?)?
        }
    }

    Ok(())
}
