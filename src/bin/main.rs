use cgigate::application::config::loader::ConfigLoader;
use cgigate::application::server::Server;
use cgigate::common::logger;
use clap::Parser;
use log::info;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cgigate")]
#[command(about = "CGI/1.1 gateway: runs one program per HTTP request.", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, default_value = "gateway.toml")]
    config: PathBuf,

    /// Overrides [server].listen
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// error, warn, info, debug or trace; RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let cli = Cli::parse();
    logger::init(logger::parse_level(&cli.log_level));

    let mut config = match ConfigLoader::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config file '{}': {}", cli.config.display(), e);
            std::process::exit(1);
        }
    };
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    let server = match Server::bind(&config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Error starting server: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "serving {} script mapping(s) from {}",
        config.scripts.len(),
        config.gateway.document_root.display()
    );
    for mapping in &config.scripts {
        info!("  {} -> {}", mapping.prefix, mapping.directory.display());
    }

    if let Err(e) = server.run() {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
