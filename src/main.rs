use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use qdesk::client::ApiClient;
use qdesk::config::{PollConfig, ServerConfig};
use qdesk::dashboard::Transition;
use qdesk::queue::{Desk, DeskStatus, Token, TokenStatus};
use qdesk::server::Server;
use qdesk::service::Completion;
use qdesk::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "qdesk")]
#[command(version)]
#[command(about = "A service-desk queue with numbered tokens and desk assignment")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the qdesk server (HTTP API and background loops)
    Server(ServerArgs),

    /// Token commands
    Token {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Desk commands
    Desk {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: DeskCommands,
    },

    /// Assign a token to a desk, or run one auto-assign step when no
    /// numbers are given
    Assign {
        #[command(flatten)]
        client: ClientArgs,

        /// Token number
        #[arg(requires = "desk_number")]
        token_number: Option<u64>,

        /// Desk number
        desk_number: Option<u64>,
    },

    /// System settings
    Settings {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: SettingsCommands,
    },

    /// Daily counts and revenue
    Summary {
        #[command(flatten)]
        client: ClientArgs,

        /// Day to summarize (YYYY-MM-DD, defaults to today in UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Repair tokens and desks that no longer point at each other
    Reconcile {
        #[command(flatten)]
        client: ClientArgs,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on for HTTP
    #[arg(long, default_value = "8080")]
    port: u16,

    /// JSON snapshot file; keeps everything in memory when omitted
    #[arg(long)]
    data_file: Option<PathBuf>,

    /// Base interval between auto-assign passes
    #[arg(long, default_value = "5000", value_parser = clap::value_parser!(u64).range(1..))]
    auto_assign_interval_ms: u64,

    /// Random extra delay added to each auto-assign interval
    #[arg(long, default_value = "500")]
    poll_jitter_ms: u64,

    /// Interval between reconcile sweeps (0 disables them)
    #[arg(long, default_value = "60000")]
    reconcile_interval_ms: u64,

    /// Days of paid and cancelled tokens to keep (0 keeps only today's)
    #[arg(long, default_value = "7")]
    retention_days: u64,

    /// Retries after losing a conditional write
    #[arg(long, default_value = "3")]
    conflict_retries: u32,

    /// Force auto-assignment on or off at startup
    #[arg(long)]
    auto_assign: Option<Toggle>,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8080")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        matches!(self, Toggle::On)
    }
}

#[derive(clap::Subcommand, Debug)]
enum TokenCommands {
    /// Take the next token
    Take {
        /// Customer name
        name: String,
    },
    /// List tokens in queue order
    List {
        /// Only these statuses (comma-separated)
        #[arg(long, value_delimiter = ',')]
        status: Vec<TokenStatus>,
    },
    /// Show one token
    Status { number: u64 },
    /// Finish serving a token
    Complete { number: u64 },
    /// Record payment for a completed token
    Pay {
        number: u64,

        /// Fee in cents
        #[arg(long)]
        fee_cents: Option<u64>,
    },
    /// Cancel a waiting or assigned token
    Cancel { number: u64 },
}

#[derive(clap::Subcommand, Debug)]
enum DeskCommands {
    /// Register a new desk
    Add {
        name: String,

        #[arg(long, default_value = "")]
        operator: String,
    },
    /// List desks
    List,
    /// Complete whatever token the desk is serving
    Complete { number: u64 },
    /// Set a desk free or under maintenance
    Status { number: u64, status: DeskStatus },
    /// Take a desk in or out of rotation
    Active { number: u64, state: Toggle },
    /// Change the operator staffing a desk
    Operator { number: u64, name: String },
}

#[derive(clap::Subcommand, Debug)]
enum SettingsCommands {
    /// Show current settings
    Show,
    /// Turn automatic assignment on or off
    AutoAssign { state: Toggle },
}

// =============================================================================
// Output Helpers
// =============================================================================

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn desk_label(desk_id: Option<Uuid>, desks: &HashMap<Uuid, u64>) -> String {
    desk_id
        .and_then(|id| desks.get(&id))
        .map(|n| n.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_token(token: &Token) {
    println!("Token:       #{}", token.token_number);
    println!("Name:        {}", token.name);
    println!("Status:      {}", token.status);
    if let Some(at) = token.assigned_at {
        println!("Assigned at: {}", at.to_rfc3339());
    }
    if let Some(at) = token.completed_at {
        println!("Completed:   {}", at.to_rfc3339());
    }
    if let Some(at) = token.paid_at {
        println!("Paid at:     {}", at.to_rfc3339());
    }
    if let Some(fee) = token.fee_cents {
        println!("Fee:         {}.{:02}", fee / 100, fee % 100);
    }
    println!("Created:     {}", token.created_at.to_rfc3339());
}

fn print_desks(desks: &[Desk], tokens: &HashMap<Uuid, u64>) {
    if desks.is_empty() {
        println!("No desks registered.");
        return;
    }
    println!(
        "{:<6} {:<16} {:<16} {:<12} {:<7} {:<7} SERVED",
        "DESK", "NAME", "OPERATOR", "STATUS", "ACTIVE", "TOKEN"
    );
    println!("{}", "-".repeat(78));
    for desk in desks {
        let token = desk
            .assigned_token_id
            .and_then(|id| tokens.get(&id))
            .map(|n| format!("#{}", n))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<16} {:<16} {:<12} {:<7} {:<7} {}",
            desk.desk_number,
            desk.name,
            desk.operator_name,
            desk.status.to_string(),
            if desk.is_active { "yes" } else { "no" },
            token,
            desk.total_tokens_served
        );
    }
}

fn print_completion(result: &Transition<Completion>) {
    let token = &result.result.token;
    if result.applied {
        println!("Token #{} completed.", token.token_number);
    } else {
        println!("Token #{} was already {}.", token.token_number, token.status);
    }
    if let Some(desk) = &result.result.desk {
        println!("Desk {} is now {}.", desk.desk_number, desk.status);
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let poll = PollConfig {
        auto_assign_interval_ms: args.auto_assign_interval_ms,
        poll_jitter_ms: args.poll_jitter_ms,
        reconcile_interval_ms: args.reconcile_interval_ms,
        retention_days: args.retention_days,
    };

    let mut config = ServerConfig::new(listen_addr).with_poll(poll);
    config.conflict_retries = args.conflict_retries;
    if let Some(path) = args.data_file {
        config = config.with_data_path(path);
    }
    if let Some(toggle) = args.auto_assign {
        config = config.with_auto_assign(toggle.enabled());
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_path = ?config.data_path,
        auto_assign_interval_ms = config.poll.auto_assign_interval_ms,
        reconcile_interval_ms = config.poll.reconcile_interval_ms,
        retention_days = config.poll.retention_days,
        "Starting qdesk server"
    );

    let shutdown = install_shutdown_handler()?;
    Server::new(config).run(shutdown).await?;
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_token(
    client: &ApiClient,
    command: TokenCommands,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        TokenCommands::Take { name } => {
            let token = client.take_token(&name).await?;
            match output {
                OutputFormat::Json => print_json(&token)?,
                OutputFormat::Table => {
                    println!("Token taken successfully!");
                    println!("Your number: #{}", token.token_number);
                }
            }
        }
        TokenCommands::List { status } => {
            let tokens = client.tokens(&status).await?;
            match output {
                OutputFormat::Json => print_json(&tokens)?,
                OutputFormat::Table => {
                    if tokens.is_empty() {
                        println!("No tokens found.");
                        return Ok(());
                    }
                    let desks: HashMap<Uuid, u64> = client
                        .desks()
                        .await?
                        .into_iter()
                        .map(|d| (d.id, d.desk_number))
                        .collect();
                    println!(
                        "{:<7} {:<20} {:<10} {:<6} CREATED",
                        "TOKEN", "NAME", "STATUS", "DESK"
                    );
                    println!("{}", "-".repeat(72));
                    for token in &tokens {
                        let desk = desk_label(
                            token.assigned_desk_id.or(token.served_by_desk_id),
                            &desks,
                        );
                        let name = if token.name.chars().count() > 20 {
                            format!("{}...", token.name.chars().take(17).collect::<String>())
                        } else {
                            token.name.clone()
                        };
                        println!(
                            "{:<7} {:<20} {:<10} {:<6} {}",
                            format!("#{}", token.token_number),
                            name,
                            token.status.to_string(),
                            desk,
                            token.created_at.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                    println!();
                    println!("Showing {} tokens", tokens.len());
                }
            }
        }
        TokenCommands::Status { number } => {
            let token = client.token_by_number(number).await?;
            match output {
                OutputFormat::Json => print_json(&token)?,
                OutputFormat::Table => print_token(&token),
            }
        }
        TokenCommands::Complete { number } => {
            let token = client.token_by_number(number).await?;
            let result = client.complete_token(token.id).await?;
            match output {
                OutputFormat::Json => print_json(&result)?,
                OutputFormat::Table => print_completion(&result),
            }
        }
        TokenCommands::Pay { number, fee_cents } => {
            let token = client.token_by_number(number).await?;
            let result = client.pay_token(token.id, fee_cents).await?;
            match output {
                OutputFormat::Json => print_json(&result)?,
                OutputFormat::Table => {
                    if result.applied {
                        println!("Token #{} paid.", result.result.token_number);
                    } else {
                        println!("Token #{} was already paid.", result.result.token_number);
                    }
                }
            }
        }
        TokenCommands::Cancel { number } => {
            let token = client.token_by_number(number).await?;
            let result = client.cancel_token(token.id).await?;
            match output {
                OutputFormat::Json => print_json(&result)?,
                OutputFormat::Table => {
                    if result.applied {
                        println!("Token #{} cancelled.", result.result.token_number);
                    } else {
                        println!("Token #{} was already cancelled.", result.result.token_number);
                    }
                }
            }
        }
    }
    Ok(())
}

async fn handle_desk(
    client: &ApiClient,
    command: DeskCommands,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        DeskCommands::Add { name, operator } => {
            let desk = client.register_desk(&name, &operator).await?;
            match output {
                OutputFormat::Json => print_json(&desk)?,
                OutputFormat::Table => {
                    println!("Desk registered successfully!");
                    println!("Desk number: {}", desk.desk_number);
                }
            }
        }
        DeskCommands::List => {
            let board = client.board().await?;
            match output {
                OutputFormat::Json => print_json(&board.desks)?,
                OutputFormat::Table => {
                    let tokens: HashMap<Uuid, u64> = board
                        .tokens
                        .iter()
                        .map(|t| (t.id, t.token_number))
                        .collect();
                    print_desks(&board.desks, &tokens);
                }
            }
        }
        DeskCommands::Complete { number } => {
            let result = client.complete_desk(number).await?;
            match output {
                OutputFormat::Json => print_json(&result)?,
                OutputFormat::Table => print_completion(&result),
            }
        }
        DeskCommands::Status { number, status } => {
            let desk = client.desk_by_number(number).await?;
            let result = client.set_desk_status(desk.id, status).await?;
            match output {
                OutputFormat::Json => print_json(&result)?,
                OutputFormat::Table => {
                    println!("Desk {} is {}.", result.result.desk_number, result.result.status);
                }
            }
        }
        DeskCommands::Active { number, state } => {
            let desk = client.desk_by_number(number).await?;
            let desk = client.set_desk_active(desk.id, state.enabled()).await?;
            match output {
                OutputFormat::Json => print_json(&desk)?,
                OutputFormat::Table => {
                    let label = if desk.is_active { "active" } else { "inactive" };
                    println!("Desk {} is {}.", desk.desk_number, label);
                }
            }
        }
        DeskCommands::Operator { number, name } => {
            let desk = client.desk_by_number(number).await?;
            let desk = client.set_desk_operator(desk.id, &name).await?;
            match output {
                OutputFormat::Json => print_json(&desk)?,
                OutputFormat::Table => {
                    println!("Desk {} is staffed by {}.", desk.desk_number, desk.operator_name);
                }
            }
        }
    }
    Ok(())
}

async fn handle_assign(
    client: &ApiClient,
    token_number: Option<u64>,
    desk_number: Option<u64>,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let assignment = match (token_number, desk_number) {
        (Some(token_number), Some(desk_number)) => {
            let token = client.token_by_number(token_number).await?;
            let desk = client.desk_by_number(desk_number).await?;
            Some(client.assign(token.id, desk.id).await?)
        }
        _ => client.auto_assign().await?.assignment,
    };

    match output {
        OutputFormat::Json => print_json(&assignment)?,
        OutputFormat::Table => match assignment {
            Some(a) => println!(
                "Token #{} assigned to desk {}.",
                a.token.token_number, a.desk.desk_number
            ),
            None => println!("Nothing to assign."),
        },
    }
    Ok(())
}

async fn handle_settings(
    client: &ApiClient,
    command: SettingsCommands,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = match command {
        SettingsCommands::Show => client.settings().await?,
        SettingsCommands::AutoAssign { state } => client.set_auto_assign(state.enabled()).await?,
    };
    match output {
        OutputFormat::Json => print_json(&settings)?,
        OutputFormat::Table => {
            let label = if settings.auto_assign_enabled { "on" } else { "off" };
            println!("Auto-assign: {}", label);
            println!("Updated:     {}", settings.updated_at.to_rfc3339());
        }
    }
    Ok(())
}

async fn handle_summary(
    client: &ApiClient,
    date: Option<NaiveDate>,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = client.summary(date).await?;
    match output {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => {
            println!("Summary for {}", summary.date);
            println!("{}", "=".repeat(40));
            println!("Issued:     {}", summary.issued);
            println!("Waiting:    {}", summary.waiting);
            println!("Assigned:   {}", summary.assigned);
            println!("Completed:  {}", summary.completed);
            println!("Paid:       {}", summary.paid);
            println!("Cancelled:  {}", summary.cancelled);
            println!(
                "Revenue:    {}.{:02}",
                summary.revenue_cents / 100,
                summary.revenue_cents % 100
            );
            if let Some(wait) = summary.average_wait_secs {
                println!("Avg wait:   {}s", wait);
            }
            println!();
            println!(
                "Desks: {} free, {} occupied, {} maintenance ({} served in total)",
                summary.desks_free,
                summary.desks_occupied,
                summary.desks_maintenance,
                summary.total_tokens_served
            );
        }
    }
    Ok(())
}

async fn handle_reconcile(
    client: &ApiClient,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let repaired = client.reconcile().await?;
    match output {
        OutputFormat::Json => print_json(&repaired)?,
        OutputFormat::Table => {
            if repaired.is_empty() {
                println!("No inconsistencies found.");
            } else {
                println!("{:<6} {:<8} PROBLEM", "KIND", "NUMBER");
                println!("{}", "-".repeat(60));
                for v in &repaired {
                    let kind = serde_json::to_value(v.kind)?;
                    println!(
                        "{:<6} {:<8} {}",
                        kind.as_str().unwrap_or("?"),
                        v.number,
                        v.problem
                    );
                }
                println!();
                println!("Repaired {} rows", repaired.len());
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Token { client, command } => {
            let api = ApiClient::new(&client.addr);
            handle_token(&api, command, &client.output).await?;
        }
        Commands::Desk { client, command } => {
            let api = ApiClient::new(&client.addr);
            handle_desk(&api, command, &client.output).await?;
        }
        Commands::Assign {
            client,
            token_number,
            desk_number,
        } => {
            let api = ApiClient::new(&client.addr);
            handle_assign(&api, token_number, desk_number, &client.output).await?;
        }
        Commands::Settings { client, command } => {
            let api = ApiClient::new(&client.addr);
            handle_settings(&api, command, &client.output).await?;
        }
        Commands::Summary { client, date } => {
            let api = ApiClient::new(&client.addr);
            handle_summary(&api, date, &client.output).await?;
        }
        Commands::Reconcile { client } => {
            let api = ApiClient::new(&client.addr);
            handle_reconcile(&api, &client.output).await?;
        }
    }

    Ok(())
}
