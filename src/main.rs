mod client;
mod config;
mod inference;
mod metrics;
mod protocol;
mod server;
mod session;
mod staging;
mod startup;
mod utils;

use std::path::PathBuf;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use config::ServerConfig;
use protocol::{reply::Reply, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "captiond")]
#[command(about = "Image captioning over a raw TCP transfer protocol")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(long, help = "Config file path")]
    config: Option<String>,

    #[arg(long, help = "Listen address (overrides config)")]
    listen: Option<String>,

    #[arg(long, help = "Staging directory for received images (overrides config)")]
    staging: Option<PathBuf>,

    #[arg(long, help = "Output as JSON")]
    json: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the caption server (the default)
    Serve,
    /// Send one image and print its caption
    Send {
        image: PathBuf,
        #[arg(long, default_value = "127.0.0.1", help = "Server host name or IP address")]
        server: String,
        #[arg(long, default_value_t = DEFAULT_PORT, help = "Server port")]
        port: u16,
    },
    GenerateConfig {
        #[arg(long, default_value = config::DEFAULT_CONFIG_FILE, help = "Config file path")]
        output: String,
    },
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("captiond={}", default_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Send { image, server, port }) => {
            init_tracing("warn");
            let addr = format!("{}:{}", server, port);

            match client::send_image(&image, &addr).await {
                Ok(Reply::Caption(caption)) => {
                    if cli.json {
                        println!("{}", serde_json::json!({"caption": caption}));
                    } else {
                        println!("Caption: {}", caption);
                    }
                    Ok(())
                }
                Ok(Reply::Error) => {
                    if cli.json {
                        println!("{}", serde_json::json!({"error": "server failed to caption the image"}));
                    } else {
                        eprintln!("❌ Server failed to caption the image");
                    }
                    std::process::exit(1);
                }
                Err(e) => {
                    if cli.json {
                        println!("{}", serde_json::json!({"error": format!("{:#}", e)}));
                        std::process::exit(1);
                    }
                    Err(e)
                }
            }
        }
        Some(Commands::GenerateConfig { output }) => {
            init_tracing("info");
            let config = ServerConfig::default();
            config.save(&output)?;

            if cli.json {
                println!("{}", serde_json::json!({"success": true, "config_file": output}));
            } else {
                println!("✅ Configuration written to {}", output);
            }
            Ok(())
        }
        Some(Commands::Serve) | None => {
            let mut config = ServerConfig::load_or_create(cli.config.as_deref())?;

            // Override config with CLI args if provided
            if let Some(listen) = cli.listen {
                config.listen_address = listen;
            }
            if let Some(staging) = cli.staging {
                config.staging_directory = staging;
            }

            init_tracing(&config.log_level);

            let captioner = startup::initialize(&config).await?;
            server::run(config, captioner).await
        }
    }
}
