use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[zbus::proxy(
    interface = "org.sentinel.Sentinel1",
    default_service = "org.sentinel.Sentinel1",
    default_path = "/org/sentinel/Sentinel1"
)]
trait Sentinel {
    fn status(&self) -> zbus::Result<String>;
    fn retrain(&self) -> zbus::Result<bool>;
    fn latest_frame(&self) -> zbus::Result<Vec<u8>>;
    fn raw_frame(&self, source: &str) -> zbus::Result<Vec<u8>>;
    fn capture_enrollment(&self, user: &str, index: u32) -> zbus::Result<String>;
    fn list_users(&self) -> zbus::Result<String>;
    fn remove_user(&self, user: &str) -> zbus::Result<bool>;
}

#[derive(Parser)]
#[command(name = "sentinel", about = "Sentinel home surveillance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Rebuild the face gallery from enrolled images
    Retrain,
    /// List enrolled users
    Users,
    /// Delete a user's enrollment images
    RemoveUser {
        user: String,
        /// Skip retraining afterwards
        #[arg(long)]
        no_retrain: bool,
    },
    /// Capture enrollment images from the enrollment camera
    Enroll {
        #[arg(short, long)]
        user: String,
        /// Number of images to capture
        #[arg(short, long, default_value_t = 5)]
        count: u32,
        /// Index of the first image (img_<start>.jpg)
        #[arg(long, default_value_t = 0)]
        start: u32,
        /// Delay between captures
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
        /// Skip retraining afterwards
        #[arg(long)]
        no_retrain: bool,
    },
    /// Save the latest frame as JPEG
    Snapshot {
        #[arg(short, long)]
        out: PathBuf,
        /// Raw camera frame instead of the annotated one
        #[arg(long)]
        raw: bool,
        /// Source for --raw: index, device path or URL (default: main camera)
        #[arg(long, requires = "raw")]
        source: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("cannot connect to D-Bus")?;
    tracing::debug!(system = cli.system, unique_name = ?connection.unique_name(), "connected to D-Bus");
    let proxy = SentinelProxy::new(&connection)
        .await
        .context("cannot reach sentineld")?;
    tracing::debug!(destination = %proxy.inner().destination(), "sentineld proxy ready");

    match cli.command {
        Commands::Status => {
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Retrain => retrain(&proxy).await?,
        Commands::Users => {
            let users: Vec<String> = serde_json::from_str(&proxy.list_users().await?)?;
            if users.is_empty() {
                println!("No users enrolled");
            }
            for user in users {
                println!("{user}");
            }
        }
        Commands::RemoveUser { user, no_retrain } => {
            if !proxy.remove_user(&user).await? {
                bail!("no such user: {user}");
            }
            println!("Removed {user}");
            if !no_retrain {
                retrain(&proxy).await?;
            }
        }
        Commands::Enroll {
            user,
            count,
            start,
            interval_ms,
            no_retrain,
        } => {
            for i in 0..count {
                if i > 0 {
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                }
                let path = proxy
                    .capture_enrollment(&user, start + i)
                    .await
                    .with_context(|| format!("capture {} of {count} failed", i + 1))?;
                println!("[{}/{count}] saved {path}", i + 1);
            }
            if !no_retrain {
                retrain(&proxy).await?;
            }
        }
        Commands::Snapshot { out, raw, source } => {
            let jpeg = if raw {
                proxy.raw_frame(source.as_deref().unwrap_or("")).await?
            } else {
                proxy.latest_frame().await?
            };
            if jpeg.is_empty() {
                bail!("no frame available yet");
            }
            std::fs::write(&out, &jpeg).with_context(|| format!("cannot write {}", out.display()))?;
            println!("Wrote {} ({} bytes)", out.display(), jpeg.len());
        }
    }

    Ok(())
}

async fn retrain(proxy: &SentinelProxy<'_>) -> Result<()> {
    if proxy.retrain().await? {
        println!("Gallery retrained");
    } else {
        println!("Gallery empty: no usable faces found; everyone will be treated as unknown");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_enroll_defaults() {
        let cli = Cli::try_parse_from(["sentinel", "enroll", "--user", "alice"]).unwrap();
        match cli.command {
            Commands::Enroll {
                user,
                count,
                start,
                interval_ms,
                no_retrain,
            } => {
                assert_eq!(user, "alice");
                assert_eq!((count, start, interval_ms, no_retrain), (5, 0, 500, false));
            }
            _ => panic!("expected enroll"),
        }
    }

    #[test]
    fn test_snapshot_source_requires_raw() {
        assert!(Cli::try_parse_from(["sentinel", "snapshot", "--out", "a.jpg", "--source", "1"]).is_err());
        let cli =
            Cli::try_parse_from(["sentinel", "snapshot", "--out", "a.jpg", "--raw", "--source", "1"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Snapshot { raw: true, source: Some(ref s), .. } if s == "1"
        ));
    }

    #[test]
    fn test_remove_user_positional() {
        let cli = Cli::try_parse_from(["sentinel", "--system", "remove-user", "bob"]).unwrap();
        assert!(cli.system);
        assert!(matches!(cli.command, Commands::RemoveUser { ref user, no_retrain: false } if user == "bob"));
    }
}
