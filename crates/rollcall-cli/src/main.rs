use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    fn status(&self) -> zbus::Result<String>;
    fn start_training(&self) -> zbus::Result<bool>;
    fn cancel_training(&self) -> zbus::Result<bool>;
    fn training_status(&self) -> zbus::Result<String>;
    fn validate_dataset(&self) -> zbus::Result<String>;
    fn scan_dataset(&self) -> zbus::Result<String>;
    fn create_sample_dataset(&self) -> zbus::Result<u32>;
    fn enroll(&self, name: &str, images: Vec<Vec<u8>>) -> zbus::Result<String>;
    fn set_threshold(&self, value: f64) -> zbus::Result<f64>;
    fn reload(&self) -> zbus::Result<u32>;
    fn model_info(&self) -> zbus::Result<String>;
    fn statistics(&self) -> zbus::Result<String>;
    fn list_attendance(&self, identity: &str, session_id: &str) -> zbus::Result<String>;
    fn deactivate_identity(&self, identity: &str) -> zbus::Result<bool>;
    fn start_session(&self, session_id: &str, location: &str, subject_code: &str, period: &str)
        -> zbus::Result<String>;
    fn stop_session(&self, session_id: &str) -> zbus::Result<String>;
    fn list_sessions(&self) -> zbus::Result<String>;
    fn recognize(&self, image: Vec<u8>, session_id: &str) -> zbus::Result<String>;
    fn send_message(&self, message: &str) -> zbus::Result<String>;
    fn announce(&self, message: &str) -> zbus::Result<u32>;

    #[zbus(signal)]
    fn event(&self, payload: String) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face-recognition attendance CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Start a training run over the dataset
    Train {
        /// Poll until the run finishes
        #[arg(short, long)]
        wait: bool,
    },
    /// Show the current or last training run
    TrainingStatus,
    /// Cancel the running training run
    Cancel,
    /// Validate the dataset layout
    Validate,
    /// Summarize the dataset
    Scan,
    /// Create a sample dataset layout
    InitDataset,
    /// Enroll one identity from image files or directories
    Enroll {
        name: String,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Set the recognition threshold
    Threshold { value: f64 },
    /// Reload persisted embeddings
    Reload,
    /// Show the loaded model
    ModelInfo,
    /// Show dataset, stored and loaded counts
    Stats,
    /// List attendance marks, newest first
    Attendance {
        /// Only marks for this identity key
        #[arg(long)]
        identity: Option<String>,
        #[arg(long)]
        session: Option<String>,
    },
    /// Stop recognizing an identity
    Deactivate { identity: String },
    /// Start a recognition session
    StartSession {
        /// Session id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        period: Option<String>,
    },
    /// Stop a recognition session
    StopSession { id: String },
    /// List active sessions
    Sessions,
    /// Recognize faces in an image
    Recognize {
        image: PathBuf,
        #[arg(long)]
        session: Option<String>,
    },
    /// Stream live events
    Watch,
    /// Broadcast an announcement to observers
    Announce { message: String },
    /// Ping the daemon
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")?;

    match cli.command {
        Commands::Status => print_json(&proxy.status().await?),
        Commands::Train { wait } => {
            if proxy.start_training().await? {
                println!("Training started");
            } else {
                println!("Training already running");
            }
            if wait {
                wait_for_training(&proxy).await?;
            }
        }
        Commands::TrainingStatus => print_json(&proxy.training_status().await?),
        Commands::Cancel => {
            if proxy.cancel_training().await? {
                println!("Cancellation requested");
            } else {
                println!("No training run in progress");
            }
        }
        Commands::Validate => print_json(&proxy.validate_dataset().await?),
        Commands::Scan => print_json(&proxy.scan_dataset().await?),
        Commands::InitDataset => {
            let created = proxy.create_sample_dataset().await?;
            println!("Created {created} sample identity folders");
        }
        Commands::Enroll { name, images } => {
            let images = read_images(&images)?;
            println!("Enrolling {name} from {} images...", images.len());
            print_json(&proxy.enroll(&name, images).await?);
        }
        Commands::Threshold { value } => {
            let old = proxy.set_threshold(value).await?;
            println!("Threshold: {old} -> {value}");
        }
        Commands::Reload => {
            let count = proxy.reload().await?;
            println!("Loaded {count} identities");
        }
        Commands::ModelInfo => print_json(&proxy.model_info().await?),
        Commands::Stats => print_json(&proxy.statistics().await?),
        Commands::Attendance { identity, session } => {
            let reply = proxy
                .list_attendance(
                    identity.as_deref().unwrap_or_default(),
                    session.as_deref().unwrap_or_default(),
                )
                .await?;
            print_json(&reply);
        }
        Commands::Deactivate { identity } => {
            if proxy.deactivate_identity(&identity).await? {
                println!("Deactivated {identity}");
            } else {
                bail!("unknown identity: {identity}");
            }
        }
        Commands::StartSession {
            id,
            location,
            subject,
            period,
        } => {
            let reply = proxy
                .start_session(
                    id.as_deref().unwrap_or_default(),
                    location.as_deref().unwrap_or_default(),
                    subject.as_deref().unwrap_or_default(),
                    period.as_deref().unwrap_or_default(),
                )
                .await?;
            print_json(&reply);
        }
        Commands::StopSession { id } => print_json(&proxy.stop_session(&id).await?),
        Commands::Sessions => print_json(&proxy.list_sessions().await?),
        Commands::Recognize { image, session } => {
            let bytes = std::fs::read(&image).with_context(|| format!("failed to read {}", image.display()))?;
            print_json(&proxy.recognize(bytes, session.as_deref().unwrap_or_default()).await?);
        }
        Commands::Watch => {
            let mut events = proxy.receive_event().await?;
            println!("Watching events (Ctrl-C to stop)...");
            while let Some(signal) = events.next().await {
                let args = signal.args()?;
                println!("{}", args.payload());
            }
        }
        Commands::Announce { message } => {
            let reached = proxy.announce(&message).await?;
            println!("Delivered to {reached} observers");
        }
        Commands::Ping => {
            let reply = proxy.send_message(r#"{"type":"ping"}"#).await?;
            if reply.is_empty() {
                bail!("daemon sent no reply");
            }
            println!("{reply}");
        }
    }

    Ok(())
}

fn print_json(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string())),
        Err(_) => println!("{raw}"),
    }
}

async fn wait_for_training(proxy: &AttendanceProxy<'_>) -> Result<()> {
    loop {
        let raw = proxy.training_status().await?;
        let run: serde_json::Value = serde_json::from_str(&raw)?;
        let status = run["status"].as_str().unwrap_or("unknown");
        if status != "running" {
            print_json(&raw);
            return Ok(());
        }
        println!(
            "  {}/{} {}",
            run["progress"],
            run["total"],
            run["current_identity"].as_str().unwrap_or("")
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Read every image file named directly or found one level inside a directory.
fn read_images(paths: &[PathBuf]) -> Result<Vec<Vec<u8>>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("failed to list {}", path.display()))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| is_image(p))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }
    if files.is_empty() {
        bail!("no image files found");
    }
    files
        .iter()
        .map(|f| std::fs::read(f).with_context(|| format!("failed to read {}", f.display())))
        .collect()
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(ext)))
}
