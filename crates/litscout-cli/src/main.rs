use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use litscout_core::{
    ConfigLoader, Pipeline, TelemetryOptions, TurnOutcome, execute_command, init_telemetry,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::runtime::Runtime;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "litscout",
    version,
    about = "Citation-gated literature research assistant"
)]
struct Cli {
    /// Configuration file (defaults to $LITSCOUT_CONFIG, then ./config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter directive, overriding RUST_LOG and the configured level.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer a single research question.
    Run(RunArgs),
    /// Interactive session; follow-up questions build on earlier ones.
    Chat(ChatArgs),
    /// Print the registered tool definitions as JSON.
    Tools,
    /// Apply a configuration command, or show the configuration when none is given.
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Question to research.
    query: String,

    /// Print the stage trace after the answer.
    #[arg(long, default_value_t = false)]
    trace: bool,
}

#[derive(Args, Debug)]
struct ChatArgs {
    /// Print the stage trace after every answer.
    #[arg(long, default_value_t = false)]
    trace: bool,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Command words, e.g. `disable orkg` or `set core timeout to 30`.
    command: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load(cli.config.clone())?;

    let mut telemetry = TelemetryOptions::from_logging(&config.logging);
    if let Some(level) = cli.log_level.clone() {
        telemetry.override_filter = Some(level);
    }
    init_telemetry(telemetry)?;
    if let Some(origin) = config.origin() {
        info!(path = %origin.display(), "configuration loaded");
    }

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Run(args) => run_command(config, args).await?,
            Command::Chat(args) => chat_command(config, args).await?,
            Command::Tools => tools_command(config)?,
            Command::Config(args) => config_command(config, args),
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

fn print_outcome(outcome: &TurnOutcome, with_trace: bool) {
    println!("{}", outcome.answer);
    if with_trace && !outcome.trace.is_empty() {
        println!();
        println!("{}", outcome.trace.summary().render_markdown());
    }
}

async fn run_command(config: litscout_core::Config, args: RunArgs) -> Result<()> {
    let mut pipeline = Pipeline::new(config)?;
    let outcome = pipeline.handle(&args.query).await;
    print_outcome(&outcome, args.trace);
    if outcome.is_failed() {
        std::process::exit(2);
    }
    Ok(())
}

async fn chat_command(config: litscout_core::Config, args: ChatArgs) -> Result<()> {
    let mut pipeline = Pipeline::new(config)?;
    info!(session = %pipeline.session_id(), "chat session started");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Ask a research question, or type `show config`. `exit` quits.");

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if matches!(input.to_lowercase().as_str(), "exit" | "quit") {
            break;
        }
        if input.is_empty() {
            continue;
        }
        let outcome = pipeline.handle(input).await;
        print_outcome(&outcome, args.trace);
        println!();
    }

    info!(turns = pipeline.conversation().len() / 2, "chat session ended");
    Ok(())
}

fn tools_command(config: litscout_core::Config) -> Result<()> {
    let pipeline = Pipeline::new(config)?;
    let definitions = pipeline.registry().definitions();
    println!("{}", serde_json::to_string_pretty(&definitions)?);
    Ok(())
}

fn config_command(mut config: litscout_core::Config, args: ConfigArgs) {
    let command = if args.command.is_empty() {
        "show config".to_string()
    } else {
        args.command.join(" ")
    };
    println!("{}", execute_command(&mut config, &command));
}
