// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::Level;

use campusgate::config::{mask_key, AppConfig};
use campusgate::router::{can_access_route, get_redirect_route, required_role, resolve_route};
use campusgate::server::Server;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// Route check denied
    pub const DENIED: i32 = 1;
    /// Configuration error - invalid or missing config
    pub const CONFIG: i32 = 78;
}

/// campusgate - session security, role routing and proxy endpoints for a learning platform.
#[derive(Parser)]
#[command(name = "campusgate")]
#[command(version = VERSION)]
#[command(about = "Session security, role routing and proxy endpoints for a learning platform.")]
#[command(long_about = "campusgate - role routing and proxy endpoints\n\n\
    Start the proxy:     campusgate serve\n\
    Landing route:       campusgate resolve \"student,educator\"\n\
    Check a route:       campusgate can-access student /admin-dashboard\n\
    Show config:         campusgate config show")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Quiet mode: errors only
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Verbose mode: debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    ///
    /// Examples:
    ///   campusgate serve
    ///   campusgate serve --port 9000 --bind 0.0.0.0
    Serve {
        /// Port to listen on (defaults to config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Address to bind (defaults to config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Print the landing route for a role string
    ///
    /// Examples:
    ///   campusgate resolve admin
    ///   campusgate resolve "student,admin" --login
    Resolve {
        /// Raw role string (may list several roles)
        role: Option<String>,
        /// Resolve as at sign-in
        #[arg(long)]
        login: bool,
    },

    /// Check whether a role may open a route
    CanAccess {
        role: String,
        route: String,
    },

    /// Print where a role would be redirected from a route, if anywhere
    Redirect {
        route: String,
        /// Raw role string; omit for a signed-out visitor
        #[arg(short, long)]
        role: Option<String>,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration (keys masked)
    Show,
    /// Print the config file path
    Path,
}

fn init_logging(quiet: bool, verbose: bool) {
    let level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn print_route(label: &str, route: &str) {
    println!("{} {}", format!("{}:", label).dimmed(), route.bright_cyan());
}

fn handle_resolve(role: Option<String>, login: bool) {
    let route = resolve_route(role.as_deref(), login);
    print_route(if login { "Sign-in landing" } else { "Landing" }, route);
}

fn handle_can_access(role: &str, route: &str) -> bool {
    let allowed = can_access_route(Some(role), route);
    let requirement = required_role(route)
        .map(|r| r.to_string())
        .unwrap_or_else(|| "none".to_string());
    if allowed {
        println!("{} {} may open {}", "[✓]".green(), role.bold(), route);
    } else {
        println!(
            "{} {} may not open {} (requires {})",
            "[✗]".red(),
            role.bold(),
            route,
            requirement.yellow()
        );
    }
    allowed
}

fn handle_redirect(role: Option<String>, route: &str) {
    match get_redirect_route(role.as_deref(), route) {
        Some(target) => print_route("Redirect to", target),
        None => println!("{} no redirect needed for {}", "[✓]".green(), route),
    }
}

fn show_config(config: &AppConfig) -> Result<()> {
    let masked = |v: &Option<String>| {
        v.as_deref()
            .map(mask_key)
            .unwrap_or_else(|| "(not set)".dimmed().to_string())
    };

    println!("{}", "Backend".bold());
    println!(
        "  url:       {}",
        config.backend_url.as_deref().unwrap_or("(not set)")
    );
    println!("  anon key:  {}", masked(&config.backend_anon_key));
    println!();
    println!("{}", "Server".bold());
    println!(
        "  listen:    {}:{}",
        config.server.bind_address, config.server.port
    );
    println!(
        "  throttle:  {}/s, burst {}",
        config.server.per_second, config.server.burst_size
    );
    println!("  rp:        {} ({})", config.server.rp_name, config.server.rp_id);
    println!();
    println!("{}", "Session".bold());
    println!("  timeout:   {}s", config.session.timeout_secs);
    println!("  warning:   {}s before expiry", config.session.warning_lead_secs);
    println!("  poll:      every {}s", config.session.poll_interval_secs);
    println!();
    println!("{}", "Sign-in throttling".bold());
    println!(
        "  {} attempts per {}s, blocked for {}s",
        config.rate_limit.max_attempts,
        config.rate_limit.window_secs,
        config.rate_limit.block_secs
    );
    println!();
    println!("{}", "Providers".bold());
    println!("  openrouter: {}", masked(&config.providers.openrouter_key));
    println!("  model:      {}", config.providers.chat_model);
    println!("  resend:     {}", masked(&config.providers.resend_key));
    println!("  from:       {}", config.providers.email_from);
    println!("  translate:  {}", masked(&config.providers.translate_key));

    if !config.backend_configured() {
        println!();
        println!(
            "{} backend not configured; security services run offline",
            "[!]".yellow()
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Serve { port, bind } => {
            let mut config = match AppConfig::load() {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("{} Failed to load config: {:#}", "[✗]".red(), e);
                    std::process::exit(exit_codes::CONFIG);
                }
            };
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }

            let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            runtime.block_on(Server::from_config(config).start())?;
        }
        Commands::Resolve { role, login } => handle_resolve(role, login),
        Commands::CanAccess { role, route } => {
            if !handle_can_access(&role, &route) {
                std::process::exit(exit_codes::DENIED);
            }
        }
        Commands::Redirect { route, role } => handle_redirect(role, &route),
        Commands::Config { command } => match command.unwrap_or(ConfigCommands::Show) {
            ConfigCommands::Show => {
                let config = AppConfig::load()?;
                show_config(&config)?;
            }
            ConfigCommands::Path => {
                println!("{}", AppConfig::config_path()?.display());
            }
        },
    }

    Ok(())
}
