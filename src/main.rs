use anyhow::Context;
use clap::{Parser, Subcommand};
use futuresbot::config::Settings;
use futuresbot::models::{
    CreatePositionRequest, Environment, ExecuteManualSignalRequest, ExecuteTradeRequest,
    GenerateSignalRequest, OperationResult,
};
use futuresbot::TradingService;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "futuresbot")]
#[command(author, version, about = "Multi-agent futures signal generation and execution")]
struct Cli {
    /// Configuration file (defaults to ./futuresbot.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analysis agents and store a new signal
    Generate {
        symbol: String,
        /// Model name; falls back to the default when not whitelisted
        #[arg(short, long)]
        model: Option<String>,
        /// Timeframes (comma-separated), e.g. 15m,1h,4h
        #[arg(short, long, value_delimiter = ',')]
        timeframes: Vec<String>,
    },
    /// Execute a stored signal
    Execute {
        signal_id: String,
        #[arg(long)]
        testnet: bool,
    },
    /// Validate, store and execute a hand-written signal document
    ExecuteManual {
        /// Signal JSON; read from --file when omitted
        signal_json: Option<String>,
        #[arg(short, long)]
        file: Option<PathBuf>,
        #[arg(long)]
        testnet: bool,
    },
    /// Most recent signals
    Signals {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// One stored signal
    Signal { signal_id: String },
    /// All positions, open ones with live PnL
    Positions,
    /// Record a position by hand (no order is placed)
    OpenPosition {
        symbol: String,
        /// LONG or SHORT
        direction: String,
        size: f64,
        entry_price: f64,
        #[arg(short, long, default_value_t = 20)]
        leverage: u32,
        #[arg(long, default_value_t = 0.0)]
        stop_loss: f64,
        #[arg(long, default_value_t = 0.0)]
        take_profit: f64,
        #[arg(long)]
        testnet: bool,
    },
    /// Flatten an open position on the exchange
    Close { position_id: String },
    /// Transaction log, newest first
    Transactions {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Realized PnL and win rate over closed positions
    Performance,
    /// Print candles and indicators for a symbol
    Chart {
        symbol: String,
        #[arg(short, long, value_delimiter = ',')]
        timeframes: Vec<String>,
    },
    /// Quote-asset balance of the brokerage account
    Balance {
        #[arg(long)]
        testnet: bool,
    },
    /// Latest price, e.g. `price btc` or `price ETHUSDT`
    Price { symbol: String },
    /// Check collaborators and credentials
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging();

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let service = TradingService::from_settings(settings)
        .await
        .context("Failed to initialize service")?;

    let outcome = run(&service, cli.command).await;
    service.shutdown().await;
    outcome
}

async fn run(service: &TradingService, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Generate {
            symbol,
            model,
            timeframes,
        } => {
            let request = GenerateSignalRequest {
                symbol,
                model,
                timeframes,
            };
            print_json(&OperationResult::from_result(
                service.generate_signal(request).await,
            ))
        }
        Commands::Execute { signal_id, testnet } => {
            let response = service
                .execute_signal(ExecuteTradeRequest {
                    signal_id,
                    is_testnet: testnet,
                })
                .await;
            print_json(&response)
        }
        Commands::ExecuteManual {
            signal_json,
            file,
            testnet,
        } => {
            let signal_json = match (signal_json, file) {
                (Some(json), _) => json,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => anyhow::bail!("Provide the signal JSON or --file"),
            };
            let response = service
                .execute_manual(ExecuteManualSignalRequest {
                    signal_json,
                    is_testnet: testnet,
                })
                .await;
            print_json(&response)
        }
        Commands::Signals { limit } => {
            print_json(&OperationResult::from_result(service.signals(limit).await))
        }
        Commands::Signal { signal_id } => {
            print_json(&OperationResult::from_result(service.signal(&signal_id).await))
        }
        Commands::Positions => print_json(&OperationResult::from_result(service.positions().await)),
        Commands::OpenPosition {
            symbol,
            direction,
            size,
            entry_price,
            leverage,
            stop_loss,
            take_profit,
            testnet,
        } => {
            let request = CreatePositionRequest {
                symbol,
                direction,
                size,
                entry_price,
                leverage,
                is_testnet: testnet,
                stop_loss,
                take_profit,
            };
            print_json(&OperationResult::from_result(
                service.create_position(request).await,
            ))
        }
        Commands::Close { position_id } => print_json(&OperationResult::from_result(
            service.close_position(&position_id).await,
        )),
        Commands::Transactions { limit } => print_json(&OperationResult::from_result(
            service.transactions(limit).await,
        )),
        Commands::Performance => {
            print_json(&OperationResult::from_result(service.performance().await))
        }
        Commands::Chart { symbol, timeframes } => {
            let chart = service
                .chart_data(&symbol, &timeframes)
                .await
                .context("Failed to build chart data")?;
            println!("{}", chart);
            Ok(())
        }
        Commands::Balance { testnet } => print_json(&OperationResult::from_result(
            service.balance(Environment::from_testnet(testnet)).await,
        )),
        Commands::Price { symbol } => {
            print_json(&OperationResult::from_result(service.price(&symbol).await))
        }
        Commands::Status => print_json(&service.connection_status().await),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("futuresbot=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
