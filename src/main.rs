mod cli;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::Args;
use relio::RelioError;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relio=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args = Args::parse();

    if let Err(e) = cli::run(args).await {
        match e.downcast_ref::<RelioError>() {
            Some(err) => eprintln!("❌ {}", err.user_notice()),
            None => eprintln!("❌ {:#}", e),
        }
        std::process::exit(1);
    }
}
