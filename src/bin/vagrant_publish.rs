use anyhow::Context;
use clap::Parser;

use access_metrics::app::publish_use_case::{run_publish, PublishOptions};
use access_metrics::observability;

/// Publish or link Vagrant boxes built on OBS to Vagrant Cloud.
#[derive(Parser, Debug)]
#[command(name = "vagrant-publish")]
#[command(version)]
struct Args {
    /// URL to the box description JSON published on OBS
    #[arg(long)]
    url: String,

    /// Organization/publisher of the Vagrant box
    #[arg(long)]
    organization: String,

    /// Alternative name for the Vagrant box
    #[arg(short = 'n', long = "new-box-name")]
    new_box_name: Option<String>,

    /// Only upload the supplied provider (unsupported for linking)
    #[arg(short, long, conflicts_with = "link")]
    provider: Option<String>,

    /// Just link the box from OBS and don't upload it
    #[arg(short, long)]
    link: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenv::dotenv().ok();
    observability::logging::init_logging();

    let token =
        std::env::var("ATLAS_TOKEN").context("Environment variable ATLAS_TOKEN is required")?;

    let options = PublishOptions {
        organization: args.organization,
        new_name: args.new_box_name,
        provider: args.provider,
        link: args.link,
    };
    run_publish(&args.url, token, options).await?;

    Ok(())
}
