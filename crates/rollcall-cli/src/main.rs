use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use rollcall_core::{FaceDetector, ImageSource, ModelStore};
use rollcall_engine::{
    AttendanceEngine, AttendanceFilter, AttendanceLog, AttendanceRecord, Caller, FaceRegistry,
    RecordStatus, Roster,
};
use rollcall_store::{NewIdentity, SqliteStore};

mod config;
use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance CLI")]
struct Cli {
    /// Act as this enrolled identity instead of an administrator
    #[arg(long = "as", global = true, value_name = "IDENTITY_ID")]
    acting: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new identity from a reference photo
    Enroll {
        /// Unique identity code (e.g., a badge number)
        #[arg(long)]
        code: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// Department or group
        #[arg(long, default_value = "general")]
        department: String,
        /// Reference photo containing exactly one face
        photo: PathBuf,
    },
    /// Record today's attendance from a photo
    CheckIn {
        /// Photo of the person checking in
        photo: PathBuf,
    },
    /// List attendance records
    Attendance {
        /// Only this identity's records
        #[arg(long)]
        identity: Option<i64>,
        /// Only this exact date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Start of a date range
        #[arg(long)]
        from: Option<NaiveDate>,
        /// End of a date range
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Only records with this status
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one attendance record
    Record {
        /// Record id
        id: i64,
    },
    /// Correct a record's status
    SetStatus {
        /// Record id
        id: i64,
        /// present, excused or absent
        status: String,
    },
    /// Delete an attendance record
    Remove {
        /// Record id
        id: i64,
    },
    /// Attendance statistics
    Stats {
        /// Only this identity's records
        #[arg(long)]
        identity: Option<i64>,
        /// Start of a date range
        #[arg(long)]
        from: Option<NaiveDate>,
        /// End of a date range
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Count faces in a photo without resolving identities
    Scan {
        /// Photo to inspect
        photo: PathBuf,
    },
    /// List enrolled identities
    Identities {
        /// Substring filter over code, name and department
        #[arg(long)]
        search: Option<String>,
    },
    /// Remove an identity and all of its attendance records
    RemoveIdentity {
        /// Identity id
        id: i64,
    },
    /// Refit the matcher from all reference photos
    Retrain,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let detector = Arc::new(FaceDetector::from_xml_file(&config.cascade_path)?);
    let registry = Arc::new(FaceRegistry::new(
        detector,
        ModelStore::new(&config.model_dir),
        Arc::clone(&store) as Arc<dyn Roster>,
    ));
    let engine = AttendanceEngine::new(
        Arc::clone(&registry),
        Arc::clone(&store) as Arc<dyn Roster>,
        Arc::clone(&store) as Arc<dyn AttendanceLog>,
    );
    tracing::debug!(data_dir = %config.data_dir.display(), "rollcall ready");

    let caller = cli.acting.map(Caller::Holder).unwrap_or(Caller::Admin);

    match cli.command {
        Commands::Enroll {
            code,
            name,
            department,
            photo,
        } => {
            let new = NewIdentity {
                code,
                name,
                department,
                photo_path: None,
            };
            run_enroll(&engine, &store, &config, caller, new, &photo)?;
        }
        Commands::CheckIn { photo } => {
            let checked = engine.check_in(caller, &ImageSource::from_path(photo))?;
            println!(
                "checked in {} ({}) on {} at {} [confidence {:.1}]",
                checked.record.identity_name,
                checked.record.identity_code,
                checked.record.date,
                checked.record.time.format("%H:%M:%S"),
                checked.confidence
            );
        }
        Commands::Attendance {
            identity,
            date,
            from,
            to,
            status,
        } => {
            let status = match status {
                Some(s) => Some(parse_status_arg(&s)?),
                None => None,
            };
            let filter = AttendanceFilter {
                identity,
                date,
                from,
                to,
                status,
            };
            let records = engine.history(caller, filter)?;
            if records.is_empty() {
                println!("no attendance records");
            }
            for record in &records {
                print_record(record);
            }
        }
        Commands::Record { id } => {
            let record = engine.record(caller, id)?;
            print_record(&record);
        }
        Commands::SetStatus { id, status } => {
            let updated = engine.set_status(caller, id, &status)?;
            println!("record {} is now {}", updated.id, updated.status);
        }
        Commands::Remove { id } => {
            engine.remove(caller, id)?;
            println!("record {id} deleted");
        }
        Commands::Stats { identity, from, to } => {
            let filter = AttendanceFilter {
                identity,
                from,
                to,
                ..Default::default()
            };
            let stats = engine.statistics(caller, filter)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Scan { photo } => {
            let report = engine.scan(&ImageSource::from_path(photo))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Identities { search } => {
            let list = match search {
                Some(term) => store.search_identities(&term)?,
                None => store.identities()?,
            };
            if list.is_empty() {
                println!("no identities");
            }
            for identity in &list {
                println!(
                    "#{:<4} {:<10} {} ({})",
                    identity.id, identity.code, identity.name, identity.department
                );
            }
        }
        Commands::RemoveIdentity { id } => {
            if !caller.is_admin() {
                bail!("remove-identity requires administrative access");
            }
            if !store.remove_identity(id)? {
                bail!("identity {id} not found");
            }
            println!("identity {id} removed; run `rollcall retrain` to refresh the matcher");
        }
        Commands::Retrain => {
            let report = engine.rebuild_model(caller)?;
            println!(
                "retrained matcher from {} identities ({} samples)",
                report.identities, report.samples
            );
        }
    }

    Ok(())
}

/// Enrollment is a three-step sequence (copy photo, insert identity,
/// update matcher); later failures roll back the earlier steps.
fn run_enroll(
    engine: &AttendanceEngine,
    store: &SqliteStore,
    config: &Config,
    caller: Caller,
    mut new: NewIdentity,
    photo: &PathBuf,
) -> Result<()> {
    if !caller.is_admin() {
        bail!("enroll requires administrative access");
    }
    // Validate the photo before touching anything durable.
    let report = engine.scan(&ImageSource::from_path(photo))?;
    if report.face_count == 0 {
        bail!("no face detected in {}", photo.display());
    }
    if report.face_count > 1 {
        bail!(
            "expected exactly one face in {}, found {}",
            photo.display(),
            report.face_count
        );
    }

    std::fs::create_dir_all(&config.photo_dir)
        .with_context(|| format!("creating photo dir {}", config.photo_dir.display()))?;
    let ext = photo.extension().and_then(|e| e.to_str()).unwrap_or("png");
    let stored = config.photo_dir.join(format!("{}.{ext}", Uuid::new_v4()));
    std::fs::copy(photo, &stored)
        .with_context(|| format!("copying {} into the photo dir", photo.display()))?;
    new.photo_path = Some(stored.clone());

    let identity = match store.add_identity(&new) {
        Ok(identity) => identity,
        Err(err) => {
            let _ = std::fs::remove_file(&stored);
            return Err(err.into());
        }
    };
    if let Err(err) = engine.enroll_sample(caller, identity.id, &ImageSource::from_path(&stored)) {
        let _ = store.remove_identity(identity.id);
        let _ = std::fs::remove_file(&stored);
        return Err(err.into());
    }
    println!(
        "enrolled {} ({}) as identity {}",
        identity.name, identity.code, identity.id
    );
    Ok(())
}

fn parse_status_arg(s: &str) -> Result<RecordStatus> {
    RecordStatus::parse(s)
        .ok_or_else(|| anyhow::anyhow!("unknown status {s:?}: expected present, excused or absent"))
}

fn print_record(record: &AttendanceRecord) {
    println!(
        "#{:<4} {} {} {:<8} {} ({})",
        record.id,
        record.date,
        record.time.format("%H:%M:%S"),
        record.status,
        record.identity_name,
        record.identity_code
    );
}
