use clap::Parser;
use std::time::Duration;
use tracker::RconClient;

/// Runs one RCON command and prints the response.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server RCON address
    #[arg(short, long, env = "TRACKER_RCON_ADDRESS", default_value = "127.0.0.1:27015")]
    address: String,
    /// RCON password
    #[arg(short, long, env = "RCON_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,
    /// Response timeout in milliseconds
    #[arg(short, long, default_value = "1000")]
    timeout_ms: u64,
    /// Command to run; the words are joined with spaces
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let client = RconClient::new(args.address, args.password, Duration::from_millis(args.timeout_ms));
    let response = client.exec(&args.command.join(" "), true).await?;
    client.close().await;

    print!("{}", response);
    if !response.ends_with('\n') {
        println!();
    }
    Ok(())
}
