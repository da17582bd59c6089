//! `CipherVault` CLI: a password-locked encrypted journal in one file.
//!
//! Every invocation opens the vault, unlocks it if the command needs
//! plaintext, runs the command and locks again before exiting.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod config;

use std::io::Read as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use ciphervault_core::scanner;
use ciphervault_core::{
    DecryptedEntry, EntryId, EntrySummary, ScanReport, SessionStatus, VaultConfig, VaultSession,
};
use ciphervault_storage::{MemoryBackend, RedbBackend, StorageBackend};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use crate::config::{BackendKind, CliConfig};

// ── ANSI color helpers ───────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";

const BANNER_SMALL: &str = "⟐ CipherVault";

// ── CLI structure ────────────────────────────────────────────────────

/// CipherVault: an encrypted, password-locked journal.
#[derive(Parser)]
#[command(
    name = "ciphervault",
    version,
    about = "CipherVault CLI: write, read and scan entries in an encrypted journal",
    long_about = None,
    after_help = format!(
        "{DIM}Environment variables:{RESET}\n  \
         CIPHERVAULT_PATH            Vault file (default: ./ciphervault.redb)\n  \
         CIPHERVAULT_STORAGE         redb | memory (default: redb; memory lasts one command)\n  \
         CIPHERVAULT_PASSWORD        Vault password (skips the prompt)\n  \
         CIPHERVAULT_KDF_ITERATIONS  PBKDF2 rounds for new vaults (default: 100000)\n  \
         CIPHERVAULT_LOG_LEVEL       Log filter (default: warn)\n\n\
         {DIM}Examples:{RESET}\n  \
         ciphervault init\n  \
         ciphervault write --title \"Monday\" < monday.txt\n  \
         ciphervault list\n  \
         ciphervault read <id> --scan"
    ),
)]
struct Cli {
    /// Vault file location.
    #[arg(long, global = true)]
    path: Option<PathBuf>,

    /// Storage backend. `memory` starts empty and is discarded when the
    /// command exits, so it only suits a throwaway `init` or `status`.
    #[arg(long, value_enum, global = true)]
    storage: Option<BackendKind>,

    /// Vault password. Prompted for when absent.
    #[arg(long, env = "CIPHERVAULT_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault protected by a password.
    Init,
    /// Show whether a vault exists at the configured location.
    Status,
    /// List entry titles, newest first.
    List {
        /// Print the listing as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Encrypt and save an entry. The body is read from stdin unless --body is given.
    Write {
        /// Entry title (stored unencrypted).
        #[arg(long)]
        title: String,
        /// Replace this existing entry instead of creating a new one.
        #[arg(long)]
        id: Option<String>,
        /// Entry body.
        #[arg(long)]
        body: Option<String>,
    },
    /// Decrypt and print an entry.
    Read {
        /// Entry id.
        id: String,
        /// Also run the offline privacy scan on the entry.
        #[arg(long)]
        scan: bool,
    },
    /// Delete an entry permanently.
    Delete {
        /// Entry id.
        id: String,
    },
    /// Erase the vault and every entry. Irreversible.
    Wipe {
        /// Confirm the wipe.
        #[arg(long)]
        yes: bool,
    },
}

// ── Output helpers ───────────────────────────────────────────────────

fn header(icon: &str, title: &str) {
    println!();
    println!("  {icon} {BOLD}{title}{RESET}");
    println!("{DIM}─────────────────────────────────────────{RESET}");
}

fn kv_line(key: &str, value: &str) {
    println!("  {DIM}{key:<12}{RESET} {value}");
}

fn success(msg: &str) {
    println!("{GREEN}{BOLD}✓{RESET} {msg}");
}

fn warning(msg: &str) {
    println!("{YELLOW}{BOLD}⚠{RESET} {YELLOW}{msg}{RESET}");
}

fn format_timestamp(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map_or_else(|| ms.to_string(), |t| t.format("%Y-%m-%d %H:%M UTC").to_string())
}

fn print_listing(entries: &[EntrySummary]) {
    header("📓", "Entries");
    if entries.is_empty() {
        println!("  {DIM}(no entries){RESET}");
    }
    for entry in entries {
        println!(
            "  {CYAN}{}{RESET}  {DIM}{}{RESET}  {}",
            entry.id,
            format_timestamp(entry.timestamp),
            entry.title
        );
    }
    println!();
}

fn print_entry(entry: &DecryptedEntry) {
    header("📖", entry.title());
    kv_line("Id", &entry.id().to_string());
    kv_line("Saved", &format_timestamp(entry.timestamp()));
    println!();
    println!("{}", entry.body());
    println!();
}

fn print_scan(report: &ScanReport) {
    header("🛡", "Privacy Scan");
    let colour = match report.security_score {
        80..=100 => GREEN,
        50..=79 => YELLOW,
        _ => RED,
    };
    kv_line("Score", &format!("{colour}{BOLD}{}{RESET}/100", report.security_score));
    if report.is_clean() {
        println!("  {GREEN}No sensitive data detected.{RESET}");
    }
    for threat in &report.privacy_threats {
        println!("  {YELLOW}⚠{RESET} {threat}");
    }
    if !report.suggestions.is_empty() {
        println!();
        for suggestion in &report.suggestions {
            println!("  {DIM}•{RESET} {suggestion}");
        }
    }
    println!();
}

// ── Setup ────────────────────────────────────────────────────────────

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_storage(config: &CliConfig) -> Result<Arc<dyn StorageBackend>> {
    match config.backend {
        BackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        BackendKind::Redb => {
            if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let backend = RedbBackend::open(&config.path)
                .with_context(|| format!("failed to open vault file {}", config.path.display()))?;
            Ok(Arc::new(backend))
        }
    }
}

fn prompt(flag: Option<&str>, label: &str) -> Result<Zeroizing<String>> {
    if let Some(password) = flag {
        return Ok(Zeroizing::new(password.to_owned()));
    }
    let password = rpassword::prompt_password(label).context("failed to read password")?;
    Ok(Zeroizing::new(password))
}

async fn ensure_unlocked(session: &VaultSession, password: Option<&str>) -> Result<()> {
    match session.status().await {
        SessionStatus::Unlocked => Ok(()),
        SessionStatus::NoVault => bail!("no vault here yet, run `ciphervault init` first"),
        SessionStatus::Locked => {
            session
                .integrity()
                .await
                .context("vault is unreadable; `ciphervault wipe --yes` erases it")?;
            let password = prompt(password, "  Vault password: ")?;
            session.unlock(&password).await.context("failed to unlock vault")?;
            Ok(())
        }
    }
}

fn parse_id(raw: &str) -> Result<EntryId> {
    raw.parse()
        .with_context(|| format!("'{raw}' is not a valid entry id"))
}

// ── Command dispatch ─────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = CliConfig::from_env().with_overrides(cli.storage, cli.path.clone());
    init_tracing(&config.log_level, cli.log_json);

    match run(&config, cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("  {RED}{BOLD}✗ Error:{RESET} {e:#}");
            eprintln!();
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &CliConfig, cli: Cli) -> Result<()> {
    let storage = open_storage(config)?;
    let session = VaultSession::open(storage, VaultConfig::from_env())
        .await
        .context("failed to open vault")?;
    debug!(backend = ?config.backend, "vault opened");
    if config.backend == BackendKind::Memory {
        eprintln!("  {YELLOW}⚠ memory storage: nothing is kept after this command exits{RESET}");
    }

    let result = dispatch(&session, config, cli.password.as_deref(), cli.command).await;

    if session.status().await == SessionStatus::Unlocked {
        session.lock().await.context("failed to lock vault")?;
    }
    result
}

async fn dispatch(
    session: &VaultSession,
    config: &CliConfig,
    password: Option<&str>,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Init => cmd_init(session, password).await,
        Commands::Status => cmd_status(session, config).await,
        Commands::List { json } => cmd_list(session, password, json).await,
        Commands::Write { title, id, body } => {
            cmd_write(session, password, &title, id.as_deref(), body).await
        }
        Commands::Read { id, scan } => cmd_read(session, password, &id, scan).await,
        Commands::Delete { id } => cmd_delete(session, password, &id).await,
        Commands::Wipe { yes } => cmd_wipe(session, yes).await,
    }
}

// ── Commands ─────────────────────────────────────────────────────────

async fn cmd_init(session: &VaultSession, password: Option<&str>) -> Result<()> {
    if session.status().await != SessionStatus::NoVault {
        bail!("a vault already exists here");
    }

    let min_len = session.config().password_floor();
    let (password, confirm) = match password {
        Some(p) => (Zeroizing::new(p.to_owned()), Zeroizing::new(p.to_owned())),
        None => {
            println!("  {DIM}Minimum {min_len} characters. It cannot be recovered if lost.{RESET}");
            (
                prompt(None, "  Create password: ")?,
                prompt(None, "  Confirm password: ")?,
            )
        }
    };

    session
        .initialize(&password, &confirm)
        .await
        .context("failed to create vault")?;
    success("Vault created");
    Ok(())
}

async fn cmd_status(session: &VaultSession, config: &CliConfig) -> Result<()> {
    header(BANNER_SMALL, "Vault Status");
    let location = match config.backend {
        BackendKind::Redb => config.path.display().to_string(),
        BackendKind::Memory => "memory".to_owned(),
    };
    kv_line("Location", &location);
    let state = match (session.status().await, session.integrity().await) {
        (_, Err(e)) => {
            format!("{RED}corrupt: {e}{RESET} {DIM}(run `wipe --yes` to start over){RESET}")
        }
        (SessionStatus::NoVault, _) => format!("{DIM}no vault{RESET}"),
        (SessionStatus::Locked, _) => format!("{GREEN}initialized, locked{RESET}"),
        (SessionStatus::Unlocked, _) => format!("{YELLOW}unlocked{RESET}"),
    };
    kv_line("State", &state);
    println!();
    Ok(())
}

async fn cmd_list(session: &VaultSession, password: Option<&str>, json: bool) -> Result<()> {
    ensure_unlocked(session, password).await?;
    let entries = session.list_entries().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        print_listing(&entries);
    }
    Ok(())
}

async fn cmd_write(
    session: &VaultSession,
    password: Option<&str>,
    title: &str,
    id: Option<&str>,
    body: Option<String>,
) -> Result<()> {
    let existing = id.map(parse_id).transpose()?;
    let body = match body {
        Some(body) => Zeroizing::new(body),
        None => {
            let mut buf = Zeroizing::new(String::new());
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read entry body from stdin")?;
            buf
        }
    };

    ensure_unlocked(session, password).await?;
    let outcome = session
        .save_entry(title, &body, existing)
        .await
        .context("failed to save entry")?;

    let verb = if existing.is_some() { "Updated" } else { "Saved" };
    success(&format!("{verb} entry {CYAN}{}{RESET}", outcome.id));
    Ok(())
}

async fn cmd_read(session: &VaultSession, password: Option<&str>, id: &str, scan: bool) -> Result<()> {
    let id = parse_id(id)?;
    ensure_unlocked(session, password).await?;
    let entry = session.read_entry(&id).await.context("failed to read entry")?;

    print_entry(&entry);
    if scan {
        print_scan(&scanner::scan(&entry));
    }
    Ok(())
}

async fn cmd_delete(session: &VaultSession, password: Option<&str>, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    ensure_unlocked(session, password).await?;
    let remaining = session.delete_entry(&id).await.context("failed to delete entry")?;
    success(&format!("Deleted entry {id} ({} left)", remaining.len()));
    Ok(())
}

async fn cmd_wipe(session: &VaultSession, yes: bool) -> Result<()> {
    if !yes {
        warning("This erases the vault and every entry. Re-run with --yes to confirm.");
        bail!("wipe not confirmed");
    }
    session.wipe().await.context("failed to wipe vault")?;
    success("Vault wiped");
    Ok(())
}
