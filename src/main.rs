use anyhow::Result;
use clap::Parser;

use maildigest::config::Config;
use maildigest::http;

#[derive(Parser)]
#[command(name = "maildigest")]
#[command(about = "HTTP API that returns recent mailbox messages as a plain-text digest", long_about = None)]
struct Cli {
    /// Listening port (overrides the PORT environment variable)
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut cfg = Config::from_env();
    if let Some(port) = cli.port {
        cfg.port = port;
    }

    http::serve(cfg)
}
