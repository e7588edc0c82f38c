mod llama_cpp_backend;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use infero_core::{simple_inference, Callbacks, InferoConfig, Role, Session, UsageStats};
use llama_cpp_backend::LlamaCppEngine;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const FALLBACK_MAX_TOKENS: u32 = 1024;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (JSON, or YAML with a .yaml/.yml extension)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Name of the configured model to run
    #[arg(short, long)]
    model: String,

    /// Optional system prompt
    #[arg(short, long)]
    system: Option<String>,

    /// Extra history entries as ROLE=CONTENT, added in order before the prompt
    #[arg(long = "message", value_name = "ROLE=CONTENT")]
    messages: Vec<String>,

    /// The user question
    #[arg(short, long)]
    prompt: String,

    /// Maximum number of tokens to generate (default: the config's default_max_tokens)
    #[arg(short = 'n', long)]
    max_tokens: Option<u32>,

    /// One-shot mode: no streaming, print only the final answer
    #[arg(long)]
    simple: bool,

    /// Print usage statistics as JSON instead of a summary line
    #[arg(long)]
    json_usage: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        model = %args.model,
        "infero starting"
    );

    if args.simple {
        run_simple(&args)
    } else {
        run_session(&args)
    }
}

/// Logs go to stderr so stdout only carries generated text
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("infero=info,infero_core=info,warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run_simple(args: &Args) -> Result<()> {
    let max_tokens = match args.max_tokens {
        Some(n) => n,
        None => InferoConfig::load(&args.config)?.default_max_tokens,
    };

    let answer = simple_inference(
        Box::new(LlamaCppEngine::new()),
        &args.config,
        &args.model,
        &args.prompt,
        max_tokens,
    )?;

    println!("{}", answer);
    Ok(())
}

fn run_session(args: &Args) -> Result<()> {
    let callbacks = Callbacks::new()
        .on_load_model_progress(|_, model, progress| {
            eprint!("\rLoading {} {:>3.0}%", model, progress * 100.0);
            true
        })
        .on_load_model_complete(|_, model, success| {
            if success {
                eprintln!("\rLoaded {}      ", model);
            } else {
                eprintln!("\rFailed to load {}", model);
            }
        })
        .on_inference_token(|_, token| {
            if let Err(e) = write_token(&mut io::stdout(), token) {
                tracing::warn!(error = %e, "failed to write token to stdout");
            }
        })
        .on_inference_done(|_, _| println!());

    let mut session = Session::new(Box::new(LlamaCppEngine::new()));
    session
        .init(&args.config, callbacks)
        .with_context(|| format!("failed to initialize from {}", args.config.display()))?;

    let max_tokens = args
        .max_tokens
        .or_else(|| session.config().map(|config| config.default_max_tokens))
        .unwrap_or(FALLBACK_MAX_TOKENS);

    if let Some(system) = &args.system {
        session.add_message(Role::System, system.as_str())?;
    }
    for entry in &args.messages {
        let (role, content) = parse_message_arg(entry)?;
        session.add_message_str(role, content)?;
    }
    session.add_message(Role::User, args.prompt.as_str())?;

    let output = match session.inference(&args.model, max_tokens) {
        Ok(output) => output,
        Err(err) => {
            // Anything already streamed is incomplete
            println!();
            return Err(err).context(format!("inference on '{}' failed", args.model));
        }
    };

    report_usage(&output.usage, args.json_usage)?;
    session.quit();
    Ok(())
}

/// Stream one piece and flush so it shows up immediately
fn write_token(out: &mut impl Write, token: &str) -> io::Result<()> {
    out.write_all(token.as_bytes())?;
    out.flush()
}

/// Split a `ROLE=CONTENT` argument; the content may itself contain `=`
fn parse_message_arg(entry: &str) -> Result<(&str, &str)> {
    entry
        .split_once('=')
        .map(|(role, content)| (role.trim(), content))
        .ok_or_else(|| anyhow!("expected ROLE=CONTENT, got '{}'", entry))
}

fn report_usage(usage: &UsageStats, as_json: bool) -> Result<()> {
    if as_json {
        eprintln!("{}", serde_json::to_string(usage)?);
    } else {
        eprintln!(
            "Tokens :: Input: {}, Output: {}, Total: {}, Speed: {:.2} t/s in, {:.2} t/s out",
            usage.input_tokens,
            usage.output_tokens,
            usage.total_tokens,
            usage.token_input_speed,
            usage.token_output_speed,
        );
    }
    Ok(())
}
