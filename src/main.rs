use clap::Parser;
use sqlgate::cmd::{run_service, Cli};

#[tokio::main]
async fn main() -> sqlgate::Result<()> {
    let cli = Cli::parse();
    run_service(&cli).await
}
