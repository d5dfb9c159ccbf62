mod cli;

use clap::{Parser, Subcommand};
use cli::{args::Args, op::Op, Daemon, Init, Version};
use shroud_daemon::http_server::api::{HistoryRequest, StatusRequest, StopRequest};

command_enum! {
    (Daemon, Daemon),
    (History, HistoryRequest),
    (Init, Init),
    (Status, StatusRequest),
    (Stop, StopRequest),
    (Version, Version),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let remote = match cli::op::resolve_remote(args.remote, args.config_path.clone()) {
        Ok(remote) => remote,
        Err(e) => {
            eprintln!("Error: invalid remote URL: {}", e);
            std::process::exit(1);
        }
    };

    let ctx = match cli::op::OpContext::new(remote, args.config_path) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: Failed to create API client: {}", e);
            std::process::exit(1);
        }
    };

    match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
