use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::Parser;
use log::debug;
use std::path::PathBuf;

use oci_append::{DistributionClient, ImageAppender, ImageReference, Notifier, RegistryAuth};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(help = "Base image to extend (e.g., localhost:5000/my-alpine:latest)")]
    base: String,

    #[arg(help = "Tag to publish the result as, in the same repository (e.g., localhost:5000/my-alpine:with-file)")]
    target: String,

    #[arg(short, long, help = "Local file whose content goes into the new layer")]
    file: PathBuf,

    #[arg(
        short,
        long,
        help = "Path of the file inside the image [default: the local file name]"
    )]
    path: Option<String>,

    #[arg(long, help = "Talk to the registry over plain HTTP")]
    insecure: bool,

    #[arg(long, env = "REGISTRY_USERNAME", requires = "password")]
    username: Option<String>,

    #[arg(long, env = "REGISTRY_PASSWORD", hide_env_values = true, requires = "username")]
    password: Option<String>,

    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Print log lines instead of a spinner; repeat for more detail (-v steps, -vv digests, -vvv trace)"
    )]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let notifier = Notifier::new(cli.verbose);
    notifier.init_logging();

    let path = match &cli.path {
        Some(path) => path.clone(),
        None => cli
            .file
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Cannot derive an image path from {}", cli.file.display()))?,
    };
    let content = std::fs::read(&cli.file)
        .with_context(|| format!("Failed to read {}", cli.file.display()))?;
    debug!("Read {} bytes from {}", content.len(), cli.file.display());

    let auth = match (cli.username, cli.password) {
        (Some(username), Some(password)) => RegistryAuth::basic(username, password),
        _ => RegistryAuth::anonymous(),
    };

    // The client is bound to the base repository; the appender rejects targets
    // outside it before any request is made.
    let base = ImageReference::parse(&cli.base)?;
    let client = DistributionClient::new(&base, auth, cli.insecure)?;
    let appender = ImageAppender::new(client, notifier);

    let outcome = appender.append_file(&cli.base, &cli.target, &path, &content, Utc::now())?;

    println!("{}@{}", outcome.target, outcome.manifest_digest);
    Ok(())
}
