//! `treezam` - CLI for the TreeZam backend
//!
//! Runs the HTTP API server and offers a few maintenance commands.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::Context;
use clap::Parser;

use treezam::cli::{Cli, Command, ConfigCommand, ServeCommand};
use treezam::{init_logging, Config, Storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    match cli.command {
        Command::Serve(serve_cmd) => handle_serve(config, serve_cmd).await,
        Command::Status(status_cmd) => handle_status(&config, status_cmd.json),
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
    }
}

async fn handle_serve(mut config: Config, cmd: ServeCommand) -> anyhow::Result<()> {
    if let Some(host) = cmd.host {
        config.server.host = host;
    }
    if let Some(port) = cmd.port {
        config.server.port = port;
    }
    config.validate()?;

    treezam::server::serve(config).await?;
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let path = config.database_path();
    let storage = Storage::open(&path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;
    let stats = storage.stats()?;

    if json {
        let status = serde_json::json!({
            "database_path": path,
            "db_size_bytes": stats.db_size_bytes,
            "users": stats.users,
            "identifications": stats.identifications,
            "challenges": stats.challenges,
            "participants": stats.participants,
            "sessions": stats.sessions,
            "newest_identification": stats.newest_identification,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("treezam status");
        println!("--------------");
        println!("Database:        {}", path.display());
        println!("Size:            {} bytes", stats.db_size_bytes);
        println!("Users:           {}", stats.users);
        println!("Identifications: {}", stats.identifications);
        println!("Challenges:      {}", stats.challenges);
        println!("Participants:    {}", stats.participants);
        println!("Sessions:        {}", stats.sessions);
        match stats.newest_identification {
            Some(at) => println!("Last activity:   {}", at.to_rfc3339()),
            None => println!("Last activity:   never"),
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Server]");
                println!("  Bind address:       {}:{}", config.server.host, config.server.port);
                println!("  CORS max age (s):   {}", config.server.cors_max_age_secs);
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Upload directory:   {}", config.upload_dir().display());
                println!("  Max upload bytes:   {}", config.storage.max_upload_bytes);
                println!();
                println!("[Auth]");
                println!("  Session TTL (h):    {}", config.auth.session_ttl_hours);
                println!("  Min password len:   {}", config.auth.min_password_len);
                println!();
                println!("[Game]");
                println!("  XP per tree:        {}", config.game.identification_experience);
                println!("  XP per level:       {}", config.game.experience_per_level);
                println!("  Default reward XP:  {}", config.game.default_challenge_experience);
                println!("  Default radius (m): {}", config.game.default_challenge_radius_m);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
