//! `biopunchctl` — operational CLI sharing the daemon's Store/config, not a
//! separate data path. Exit codes: 0 ok, 1 generic error, 130 interrupted.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::{Parser, Subcommand};

use biopunch::capture::{CameraDevice, Capture, Frame};
use biopunch::config::Config;
use biopunch::store::Store;
use biopunch::sync_worker::SyncWorker;

#[derive(Parser)]
#[command(name = "biopunchctl")]
#[command(about = "Operational CLI for the biopunch kiosk", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "/etc/biopunch/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export recorded punches as CSV.
    Export {
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    /// User management.
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },
    /// Camera diagnostics.
    Camera {
        #[command(subcommand)]
        action: CameraAction,
    },
    /// Store-and-forward sync control.
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },
}

#[derive(Subcommand)]
enum UsersAction {
    /// List enrolled users.
    List {
        /// Include deactivated users.
        #[arg(long)]
        all: bool,
    },
    /// Deactivate a user by employee code.
    Deactivate {
        #[arg(long = "employee-code")]
        employee_code: String,
    },
}

#[derive(Subcommand)]
enum CameraAction {
    /// Run the camera diagnostic and print the result.
    Test,
}

#[derive(Subcommand)]
enum SyncAction {
    /// Trigger an immediate sync tick.
    Now,
}

struct UnboundCamera;

impl CameraDevice for UnboundCamera {
    fn open(&mut self, _width: u32, _height: u32) -> bool {
        false
    }
    fn is_open(&self) -> bool {
        false
    }
    fn close(&mut self) {}
    fn capture_frame(&mut self) -> Option<Frame> {
        None
    }
}

fn main() {
    biopunch::init_tracing();
    let cli = Cli::parse();

    let code = match run(cli) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<(), String> {
    let config = Config::load(&cli.config).unwrap_or_default();
    let store = std::sync::Arc::new(
        Store::open(std::path::Path::new(&config.database.path)).map_err(|e| e.to_string())?,
    );

    match cli.command {
        Command::Export { output, start, end } => export(&store, &output, start, end),
        Command::Users { action } => users(&store, action),
        Command::Camera { action } => camera(&config, action),
        Command::Sync { action } => sync(&store, &config, action),
    }
}

fn parse_iso(value: &str) -> Result<chrono::NaiveDateTime, String> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.naive_utc())
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        })
        .map_err(|e| format!("invalid ISO timestamp '{value}': {e}"))
}

fn export(store: &Store, output: &PathBuf, start: Option<String>, end: Option<String>) -> Result<(), String> {
    let start = start.map(|s| parse_iso(&s)).transpose()?;
    let end = end.map(|s| parse_iso(&s)).transpose()?;

    let punches = store.get_punches(start, end, None).map_err(|e| e.to_string())?;

    let mut file = std::fs::File::create(output).map_err(|e| e.to_string())?;
    writeln!(
        file,
        "id,user_id,timestamp_utc,timestamp_local,punch_type,match_score,device_id,synced,sync_error"
    )
    .map_err(|e| e.to_string())?;
    for punch in &punches {
        writeln!(
            file,
            "{},{},{},{},{},{},{},{},{}",
            punch.id,
            punch.user_id,
            punch.timestamp_utc.to_rfc3339(),
            punch.timestamp_local,
            punch.punch_type,
            punch.match_score,
            punch.device_id,
            punch.synced,
            punch.sync_error.as_deref().unwrap_or(""),
        )
        .map_err(|e| e.to_string())?;
    }

    println!("exported {} punches to {}", punches.len(), output.display());
    Ok(())
}

fn users(store: &Store, action: UsersAction) -> Result<(), String> {
    match action {
        UsersAction::List { all } => {
            let users = store.list_users(!all).map_err(|e| e.to_string())?;
            for user in users {
                println!(
                    "{}\t{}\t{}\t{}",
                    user.id,
                    user.employee_code,
                    user.name,
                    if user.active { "active" } else { "inactive" }
                );
            }
            Ok(())
        }
        UsersAction::Deactivate { employee_code } => {
            let user = store
                .get_user_by_code(&employee_code)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("no user with employee code '{employee_code}'"))?;
            store.deactivate_user(user.id).map_err(|e| e.to_string())?;
            println!("deactivated {employee_code}");
            Ok(())
        }
    }
}

fn camera(config: &Config, action: CameraAction) -> Result<(), String> {
    match action {
        CameraAction::Test => {
            let capture = Mutex::new(Capture::new(
                Box::new(UnboundCamera),
                config.camera.resolution_width,
                config.camera.resolution_height,
            ));
            let result = capture.lock().unwrap().test_camera(config.camera.roi());
            println!("{}", serde_json::to_string_pretty(&result).map_err(|e| e.to_string())?);
            Ok(())
        }
    }
}

fn sync(store: &std::sync::Arc<Store>, config: &Config, action: SyncAction) -> Result<(), String> {
    match action {
        SyncAction::Now => {
            let runtime = tokio::runtime::Runtime::new().map_err(|e| e.to_string())?;
            let worker = SyncWorker::new(
                store.clone(),
                config.server.url.clone(),
                config.server.api_key.clone(),
                true,
                std::time::Duration::from_secs(300),
            );
            runtime
                .block_on(worker.sync_now())
                .map_err(|e| e.to_string())?;
            let unsynced = store.get_unsynced_punches(i64::MAX / 2).map_err(|e| e.to_string())?;
            println!("sync triggered, {} punch(es) still unsynced", unsynced.len());
            Ok(())
        }
    }
}
