//! sentry_admin - manage users, enemies and the recognizer model
//!
//! - `list`: print the Users and/or Enemies tables
//! - `register`: add a Users row without enrolling
//! - `reclassify`: move a user (or the newest one) to Enemies and update the label map
//! - `train`: rebuild the recognizer from the dataset directory

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::IsTerminal;

use face_sentry::config::SentryConfig;
use face_sentry::records::now_s;
use face_sentry::{FaceKind, FaceRecognizer, FaceRecord, Recognizer, RecordStore, SqliteRecordStore};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "sentry_admin",
    about = "Manage face sentry records and the recognizer model"
)]
struct Args {
    /// UI mode for stderr progress
    #[arg(long, value_enum, default_value = "auto", value_name = "MODE", global = true)]
    ui: ui::UiMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered users and enemies
    List {
        #[arg(long, value_enum, default_value = "all")]
        table: Table,
    },
    /// Add a user record
    Register {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        sex: String,
    },
    /// Move a user to the enemies table (newest user when no name is given)
    Reclassify {
        #[arg(long)]
        name: Option<String>,
    },
    /// Retrain the recognizer from the dataset directory
    Train,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Table {
    All,
    Users,
    Enemies,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = ui::Ui::new(
        args.ui,
        std::io::stderr().is_terminal(),
        std::io::stdout().is_terminal(),
    );
    let cfg = {
        let _stage = ui.stage("Load configuration");
        SentryConfig::load()?
    };
    let mut records = {
        let _stage = ui.stage("Open record store");
        SqliteRecordStore::open(&cfg.db_path)?
    };

    match args.command {
        Command::List { table } => {
            if table != Table::Enemies {
                print_table("Users", &records.list(FaceKind::User)?);
            }
            if table != Table::Users {
                print_table("Enemies", &records.list(FaceKind::Enemy)?);
            }
        }
        Command::Register { name, sex } => {
            if name.trim().is_empty() {
                return Err(anyhow!("name must not be empty"));
            }
            if records.register_user(&name, &sex, now_s()?)? {
                println!("registered user {}", name);
            } else {
                println!("{} is already registered", name);
            }
        }
        Command::Reclassify { name } => {
            let moved = {
                let mut stage = ui.stage("Move record");
                let moved = records.reclassify_to_enemy(name.as_deref())?;
                if let Some(record) = &moved {
                    stage.set_detail(record.name.clone());
                }
                moved
            };
            let Some(record) = moved else {
                println!("no matching user to reclassify");
                return Ok(());
            };
            let relabeled = {
                let _stage = ui.stage("Update label map");
                let mut recognizer = Recognizer::load(cfg.recognizer.clone())?;
                recognizer.reclassify(&record.name, FaceKind::Enemy)?
            };
            println!("{} is now an enemy", record.name);
            if !relabeled {
                println!("(not in the trained model yet; takes effect on next training)");
            }
        }
        Command::Train => {
            let enemies = records.enemy_names()?;
            let mut recognizer = Recognizer::new(cfg.recognizer.clone());
            let summary = {
                let mut stage = ui.stage("Train recognizer");
                let summary = recognizer.train(&enemies)?;
                stage.set_detail(format!(
                    "{} labels, {} samples",
                    summary.labels, summary.samples
                ));
                summary
            };
            println!(
                "trained {} labels from {} samples ({} skipped) into {}",
                summary.labels,
                summary.samples,
                summary.skipped,
                cfg.recognizer.model_path.display()
            );
        }
    }
    Ok(())
}

fn print_table(title: &str, rows: &[FaceRecord]) {
    println!("=== {} ({}) ===", title, rows.len());
    for row in rows {
        println!(
            "{:<24} {:<6} {:>12} {}",
            row.name,
            if row.sex.is_empty() { "-" } else { row.sex.as_str() },
            row.register_time,
            row.kind
        );
    }
    println!();
}
