//! Command-line utility for operating the mailings database:
//! starting a mailing by hand, setting up the manager group, promoting users,
//! changing runtime settings.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use mailings::db;
use mailings::mailer::dispatch::{self, Dispatch};
use mailings::mailer::ConfiguredMailer;
use mailings::models::group::Permission;
use mailings::models::mailing::MailingStatus;
use mailings::models::settings::Setting;
use mailings::models::user::{ROLE_ADMIN, ROLE_USER};
use mailings::store::sqlite::SqliteStore;
use mailings::store::Store;

/// Operate the mailings database from the command line
#[derive(Parser, Debug)]
#[command(name = "mailingctl")]
#[command(about = "Manage mailings, groups and users", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the SQLite database (defaults to $MAILINGS_DB or data/mailings.db)
    #[arg(long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a mailing now. Only mailings in `created` status are accepted.
    StartMailing {
        /// Mailing ID
        id: i64,
    },
    /// Create a group with the manager permissions, or top up an existing one
    CreateManagerGroup {
        /// Group name
        name: String,
    },
    /// Add a user to an existing group
    AddToGroup {
        /// User email
        email: String,
        /// Group name
        group: String,
    },
    /// Change a user's role
    SetRole {
        /// User email
        email: String,
        /// admin or user
        role: String,
    },
    /// Change a runtime setting such as email_backend or email_smtp_host
    SetSetting {
        /// Setting key
        key: String,
        /// New value (empty string clears it)
        value: String,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or_else(db::db_path);

    let store = match open_store(&db_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open database {}: {}", db_path, e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::StartMailing { id } => cmd_start_mailing(store, id),
        Commands::CreateManagerGroup { name } => cmd_create_manager_group(&*store, &name),
        Commands::AddToGroup { email, group } => cmd_add_to_group(&*store, &email, &group),
        Commands::SetRole { email, role } => cmd_set_role(&*store, &email, &role),
        Commands::SetSetting { key, value } => cmd_set_setting(&*store, &key, &value),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn open_store(path: &str) -> Result<Arc<dyn Store>, String> {
    let store = SqliteStore::new_at(path)?;
    store.run_migrations()?;
    store.seed_defaults()?;
    Ok(Arc::new(store))
}

fn cmd_start_mailing(store: Arc<dyn Store>, id: i64) -> Result<(), String> {
    let mailing = store
        .mailing_find_by_id(id)
        .ok_or_else(|| format!("Mailing {} does not exist", id))?;
    if mailing.status != MailingStatus::Created {
        return Err(format!(
            "Mailing {} is {}; only created mailings can be started",
            id, mailing.status
        ));
    }

    let transport = ConfiguredMailer::new(Arc::clone(&store));
    match dispatch::send_mailing(&*store, &transport, id)? {
        Dispatch::Completed(report) => {
            println!(
                "Mailing {}: {} sent, {} failed ({}), status {}",
                id, report.succeeded, report.failed, report.outcome, report.status
            );
            Ok(())
        }
        Dispatch::Skipped(reason) => Err(reason.describe()),
    }
}

fn cmd_create_manager_group(store: &dyn Store, name: &str) -> Result<(), String> {
    let (group, created) = store.group_get_or_create(name)?;
    store.group_grant(group.id, &Permission::MANAGER)?;

    if created {
        println!("Group \"{}\" created", group.name);
    } else {
        println!("Group \"{}\" already exists", group.name);
    }
    let granted: Vec<String> = store
        .group_permissions(group.id)
        .iter()
        .map(|p| p.to_string())
        .collect();
    println!("Permissions: {}", granted.join(", "));
    Ok(())
}

fn cmd_add_to_group(store: &dyn Store, email: &str, group: &str) -> Result<(), String> {
    let user = store
        .user_get_by_email(email)
        .ok_or_else(|| format!("No user with email {}", email))?;
    let group = store
        .group_find_by_name(group)
        .ok_or_else(|| format!("No group named {}", group))?;
    store.group_add_user(group.id, user.id)?;
    println!("{} added to \"{}\"", user.email, group.name);
    Ok(())
}

fn cmd_set_role(store: &dyn Store, email: &str, role: &str) -> Result<(), String> {
    if role != ROLE_ADMIN && role != ROLE_USER {
        return Err(format!("Unknown role {:?}; use {} or {}", role, ROLE_ADMIN, ROLE_USER));
    }
    let user = store
        .user_get_by_email(email)
        .ok_or_else(|| format!("No user with email {}", email))?;
    store.user_update_role(user.id, role)?;
    println!("{} is now {}", user.email, role);
    Ok(())
}

fn cmd_set_setting(store: &dyn Store, key: &str, value: &str) -> Result<(), String> {
    if Setting::default_for(key).is_none() {
        return Err(format!("Unknown setting {:?}", key));
    }
    store.setting_set(key, value)?;
    let shown = if key.ends_with("password") && !value.is_empty() {
        "********"
    } else {
        value
    };
    println!("{} = {:?}", key, shown);
    Ok(())
}
