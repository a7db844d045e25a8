use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.emosense.Emosense1",
    default_service = "org.emosense.Emosense1",
    default_path = "/org/emosense/Emosense1"
)]
trait Emosense {
    async fn upload_image(&self, image: &[u8]) -> zbus::Result<String>;
    async fn detect_file(&self, path: &str) -> zbus::Result<String>;
    async fn capture_camera(&self) -> zbus::Result<String>;
    async fn save_result(
        &self,
        emotion: &str,
        confidence_score: f64,
        health_tip: &str,
        image: &[u8],
    ) -> zbus::Result<String>;
    async fn get_result(&self, id: &str) -> zbus::Result<String>;
    async fn list_results(&self, limit: u32) -> zbus::Result<String>;
    async fn export_report(&self, id: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "emosense", about = "Emosense facial emotion detection CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the emotion in an image and store the result
    Detect {
        /// Image file to upload
        path: PathBuf,
        /// Let the daemon read the file itself and skip storing the result
        #[arg(long)]
        no_store: bool,
    },
    /// Capture a camera frame and detect the emotion in it
    Capture,
    /// Store a result computed elsewhere
    Save {
        #[arg(short, long)]
        emotion: String,
        /// Confidence in percent (0–100)
        #[arg(short, long)]
        confidence: f64,
        /// Health tip; derived from the emotion when omitted
        #[arg(short, long, default_value = "")]
        tip: String,
        /// Optional image to attach
        #[arg(short, long)]
        image: Option<PathBuf>,
    },
    /// Show a stored result
    Show {
        id: String,
    },
    /// List recent results
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// Write a text report for a stored result
    Report {
        id: String,
    },
    /// Show daemon status
    Status,
    /// List V4L2 capture devices (does not need the daemon)
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let reply = match cli.command {
        Commands::Devices => {
            list_devices();
            return Ok(());
        }
        command => call_daemon(command).await?,
    };

    print_json(&reply);
    Ok(())
}

async fn call_daemon(command: Commands) -> Result<String> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    let proxy = EmosenseProxy::new(&conn)
        .await
        .context("emosensed is not reachable")?;

    let method = method_name(&command);
    tracing::debug!(method, "calling emosensed");

    let reply = match command {
        Commands::Detect { path, no_store } => {
            if no_store {
                let absolute = std::fs::canonicalize(&path).unwrap_or(path);
                proxy.detect_file(&absolute.to_string_lossy()).await?
            } else {
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                proxy.upload_image(&bytes).await?
            }
        }
        Commands::Capture => proxy.capture_camera().await?,
        Commands::Save {
            emotion,
            confidence,
            tip,
            image,
        } => {
            let bytes = match image {
                Some(path) => std::fs::read(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => Vec::new(),
            };
            proxy.save_result(&emotion, confidence, &tip, &bytes).await?
        }
        Commands::Show { id } => proxy.get_result(&id).await?,
        Commands::List { limit } => proxy.list_results(limit).await?,
        Commands::Report { id } => proxy.export_report(&id).await?,
        Commands::Status => proxy.status().await?,
        Commands::Devices => anyhow::bail!("device listing does not go through the daemon"),
    };
    tracing::debug!(method, len = reply.len(), "reply received");
    Ok(reply)
}

/// D-Bus method a subcommand maps to.
fn method_name(command: &Commands) -> &'static str {
    match command {
        Commands::Detect { no_store: true, .. } => "DetectFile",
        Commands::Detect { .. } => "UploadImage",
        Commands::Capture => "CaptureCamera",
        Commands::Save { .. } => "SaveResult",
        Commands::Show { .. } => "GetResult",
        Commands::List { .. } => "ListResults",
        Commands::Report { .. } => "ExportReport",
        Commands::Status => "Status",
        Commands::Devices => "none",
    }
}

fn print_json(reply: &str) {
    match serde_json::from_str::<serde_json::Value>(reply) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{reply}"),
        },
        Err(_) => println!("{reply}"),
    }
}

fn list_devices() {
    let devices = emosense_hw::Camera::list_devices();
    tracing::debug!(count = devices.len(), "probed V4L2 devices");
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(std::iter::once("emosense").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn test_subcommands_map_to_daemon_methods() {
        assert_eq!(method_name(&parse(&["detect", "face.jpg"])), "UploadImage");
        assert_eq!(
            method_name(&parse(&["detect", "face.jpg", "--no-store"])),
            "DetectFile"
        );
        assert_eq!(method_name(&parse(&["capture"])), "CaptureCamera");
        assert_eq!(
            method_name(&parse(&["save", "-e", "happy", "-c", "80"])),
            "SaveResult"
        );
        assert_eq!(method_name(&parse(&["show", "abc"])), "GetResult");
        assert_eq!(method_name(&parse(&["list"])), "ListResults");
        assert_eq!(method_name(&parse(&["report", "abc"])), "ExportReport");
        assert_eq!(method_name(&parse(&["status"])), "Status");
    }

    #[test]
    fn test_list_default_limit() {
        match parse(&["list"]) {
            Commands::List { limit } => assert_eq!(limit, 20),
            _ => panic!("expected list"),
        }
    }
}
