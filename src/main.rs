//! Wristkit entry point
//!
//! Minimal argument dispatch over the command structs; the heavy lifting
//! lives in the workspace crates.

use anyhow::{bail, Result};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use wristkit::commands::{EnsureCommand, KillCommand, StatusCommand, StopCommand, WipeCommand};
use wristkit::core::Platform;
use wristkit::{APP_NAME, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut args = args.iter().map(String::as_str);

    match args.next() {
        Some("ensure") => {
            let (platform, version) = platform_version(&mut args)?;
            let display = args.any(|a| a == "--display");
            EnsureCommand {
                platform,
                version,
                display,
            }
            .execute()
            .await
        }
        Some("stop") => {
            let (platform, version) = platform_version(&mut args)?;
            let force = args.any(|a| a == "--force");
            StopCommand {
                platform,
                version,
                force,
            }
            .execute()
            .await
        }
        Some("kill") => {
            let force = args.any(|a| a == "--force");
            KillCommand { force }.execute().await
        }
        Some("status") => StatusCommand.execute().await,
        Some("wipe") => {
            let target = wipe_target(&mut args)?;
            WipeCommand { target }.execute().await
        }
        Some("version") => {
            println!("{} v{}", APP_NAME, VERSION);
            Ok(())
        }
        _ => {
            eprintln!("{} v{}", APP_NAME, VERSION);
            eprintln!();
            eprintln!("Usage:");
            eprintln!("  wristkit ensure <platform> <version> [--display]");
            eprintln!("  wristkit stop <platform> <version> [--force]");
            eprintln!("  wristkit kill [--force]");
            eprintln!("  wristkit status");
            eprintln!("  wristkit wipe <platform> <version> | --everything");
            eprintln!("  wristkit version");
            eprintln!();
            eprintln!(
                "Platforms: {}",
                Platform::ALL
                    .iter()
                    .map(Platform::name)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            std::process::exit(2);
        }
    }
}

fn platform_version<'a>(
    args: &mut impl Iterator<Item = &'a str>,
) -> Result<(Platform, String)> {
    let Some(platform) = args.next() else {
        bail!("missing platform argument");
    };
    let Some(version) = args.next() else {
        bail!("missing version argument");
    };
    Ok((platform.parse()?, version.to_string()))
}

/// Wiping the whole persist tree destroys every instance's data, so it
/// takes an explicit `--everything`; a bare `wipe` is an error.
fn wipe_target<'a>(
    args: &mut impl Iterator<Item = &'a str>,
) -> Result<Option<(Platform, String)>> {
    match args.next() {
        Some("--everything") => Ok(None),
        Some(platform) => {
            let platform: Platform = platform.parse()?;
            let Some(version) = args.next() else {
                bail!("wipe needs a platform and a version");
            };
            Ok(Some((platform, version.to_string())))
        }
        None => bail!("wipe needs a platform and a version, or --everything"),
    }
}
