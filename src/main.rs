//! Purpose: `cards` CLI entry point.
//! Role: Binary crate root; parses args, runs the gateway or drives the record view.
//! Invariants: Mutating commands print JSON on stdout when stdout is not a terminal.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]

use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use clap::error::ErrorKind as ClapErrorKind;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;

mod command_dispatch;
mod serve;
mod terminal;

use cards::api::{Error, ErrorKind, to_exit_code};
use cards::view::CardForm;

const DEFAULT_MAX_BODY_BYTES: u64 = 64 * 1024;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CLIENT_TIMEOUT_MS: u64 = 10_000;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse_from(std::env::args_os().collect::<Vec<OsString>>()) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint(clap_error_hint(&err)));
            }
        },
    };

    command_dispatch::dispatch_command(cli.command).map_err(add_unavailable_hint)
}

#[derive(Parser)]
#[command(
    name = "cards",
    version,
    about = "Card records: an HTTP gateway over a document store, and a terminal record view",
    long_about = None,
    after_help = r#"EXAMPLES
  $ cards serve --store-url memory:// --port 3000
  $ cards create --name Giant --elixir-cost 5 --rarity rare
  $ cards list
  $ cards edit card::<uuid> --elixir-cost 6
  $ cards delete card::<uuid> --yes

ENVIRONMENT
  CARDS_URL            gateway base URL for client commands
  CARDS_STORE_URL      backing store for `serve` (http(s)://... or memory://)
  PORT                 port for `serve`
  RUST_LOG             log filter for `serve` (default: info)"#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Run the card gateway",
        long_about = r#"Serve the /records API over HTTP, backed by a document store.

A store that cannot be reached at startup is logged and tolerated: data
requests answer 503 until it comes back, while /healthz and static assets
keep being served."#,
        after_help = r#"EXAMPLES
  $ cards serve --store-url memory:// --port 3000
  $ CARDS_STORE_URL=https://cb.example.com CARDS_BUCKET=ClashRoyale \
      CARDS_STORE_USERNAME=app CARDS_STORE_PASSWORD_FILE=/run/secrets/cb \
      PORT=3000 cards serve --static-dir ./public"#
    )]
    Serve(ServeRunArgs),
    #[command(about = "List every card")]
    List {
        #[command(flatten)]
        client: ClientArgs,
    },
    #[command(arg_required_else_help = true, about = "Print one card as JSON")]
    Show {
        #[arg(help = "Card identifier (card::<uuid>)")]
        id: String,
        #[command(flatten)]
        client: ClientArgs,
    },
    #[command(
        about = "Create a card",
        after_help = r#"EXAMPLES
  $ cards create --name Giant --elixir-cost 5
  $ cards create --name Knight --elixir-cost 3 --rarity common --type troop"#
    )]
    Create {
        #[command(flatten)]
        fields: CardFieldArgs,
        #[command(flatten)]
        client: ClientArgs,
    },
    #[command(
        arg_required_else_help = true,
        about = "Edit a card",
        long_about = r#"Load a card, overlay the supplied fields, and save it.

Fields that are not supplied keep their current values."#
    )]
    Edit {
        #[arg(help = "Card identifier (card::<uuid>)")]
        id: String,
        #[command(flatten)]
        fields: CardFieldArgs,
        #[command(flatten)]
        client: ClientArgs,
    },
    #[command(arg_required_else_help = true, about = "Delete a card")]
    Delete {
        #[arg(help = "Card identifier (card::<uuid>)")]
        id: String,
        #[arg(long, short = 'y', help = "Delete without asking for confirmation")]
        yes: bool,
        #[command(flatten)]
        client: ClientArgs,
    },
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completion scripts",
        after_help = r#"EXAMPLES
  $ cards completion bash > ~/.local/share/bash-completion/completions/cards
  $ cards completion zsh > ~/.zfunc/_cards
  $ cards completion fish > ~/.config/fish/completions/cards.fish"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Args)]
struct ClientArgs {
    #[arg(
        long,
        env = "CARDS_URL",
        default_value = "http://127.0.0.1:3000",
        help = "Gateway base URL",
        help_heading = "Connection"
    )]
    url: String,
    #[arg(
        long = "timeout-ms",
        value_name = "MS",
        default_value_t = DEFAULT_CLIENT_TIMEOUT_MS,
        help = "Per-request timeout",
        help_heading = "Connection"
    )]
    timeout_ms: u64,
    #[arg(long, help = "Emit JSON even when stdout is a terminal")]
    json: bool,
}

#[derive(Args, Default)]
struct CardFieldArgs {
    #[arg(long, help = "Card name", help_heading = "Card")]
    name: Option<String>,
    #[arg(long, value_name = "N", help = "Elixir cost (positive integer)", help_heading = "Card")]
    elixir_cost: Option<String>,
    #[arg(long, help = "Rarity, e.g. common or legendary", help_heading = "Card")]
    rarity: Option<String>,
    #[arg(long = "type", value_name = "TYPE", help = "Card type, e.g. troop or spell", help_heading = "Card")]
    card_type: Option<String>,
    #[arg(long, value_name = "URL", value_hint = ValueHint::Url, help_heading = "Card")]
    image_url: Option<String>,
    #[arg(long, value_name = "URL", value_hint = ValueHint::Url, help_heading = "Card")]
    evolution_image_url: Option<String>,
    #[arg(long, value_name = "URL", value_hint = ValueHint::Url, help_heading = "Card")]
    extra_image_url: Option<String>,
}

impl CardFieldArgs {
    /// Writes every supplied flag into `form`; absent flags leave fields as they are.
    fn overlay(self, form: &mut CardForm) {
        let slots = [
            (self.name, &mut form.name),
            (self.elixir_cost, &mut form.elixir_cost),
            (self.rarity, &mut form.rarity),
            (self.card_type, &mut form.card_type),
            (self.image_url, &mut form.image_url),
            (self.evolution_image_url, &mut form.evolution_image_url),
            (self.extra_image_url, &mut form.extra_image_url),
        ];
        for (value, slot) in slots {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }
}

#[derive(Args)]
struct ServeRunArgs {
    #[arg(
        long,
        env = "CARDS_STORE_URL",
        value_name = "URL",
        help = "Backing store: http(s)://host[:port] (Data API) or memory://",
        help_heading = "Store"
    )]
    store_url: String,
    #[arg(long, env = "CARDS_STORE_USERNAME", help_heading = "Store")]
    store_username: Option<String>,
    #[arg(
        long,
        env = "CARDS_STORE_PASSWORD",
        hide_env_values = true,
        help = "Store password (prefer --store-password-file)",
        help_heading = "Store"
    )]
    store_password: Option<String>,
    #[arg(
        long,
        env = "CARDS_STORE_PASSWORD_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        help = "Read the store password from a file",
        help_heading = "Store"
    )]
    store_password_file: Option<PathBuf>,
    #[arg(long, env = "CARDS_BUCKET", help = "Bucket holding the cards", help_heading = "Store")]
    bucket: Option<String>,
    #[arg(long, default_value = "_default", help_heading = "Store")]
    scope: String,
    #[arg(long, default_value = "_default", help_heading = "Store")]
    collection: String,
    #[arg(
        long,
        value_name = "MS",
        default_value_t = DEFAULT_STORE_TIMEOUT_MS,
        help = "Connect/read timeout for store requests",
        help_heading = "Store"
    )]
    store_timeout_ms: u64,
    #[arg(long, env = "PORT", help = "Port to listen on", help_heading = "Connection")]
    port: u16,
    #[arg(long, default_value = "0.0.0.0", help = "Address to bind", help_heading = "Connection")]
    host: IpAddr,
    #[arg(
        long = "cors-origin",
        value_name = "ORIGIN",
        help = "Allow browser requests from this origin (repeatable, explicit list)",
        help_heading = "Connection"
    )]
    cors_origin: Vec<String>,
    #[arg(
        long,
        value_name = "DIR",
        value_hint = ValueHint::DirPath,
        help = "Serve static assets from this directory at /",
        help_heading = "Connection"
    )]
    static_dir: Option<PathBuf>,
    #[arg(
        long,
        value_name = "N",
        help = "Return at most N cards from list (default: all)",
        help_heading = "Safety"
    )]
    list_limit: Option<usize>,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_BODY_BYTES,
        help = "Max request body size in bytes",
        help_heading = "Safety"
    )]
    max_body_bytes: u64,
}

fn read_secret_file(path: &Path) -> Result<String, Error> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("failed to read password file: {}", path.display()))
            .with_source(err)
    })?;
    let secret = raw.trim().to_string();
    if secret.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("password file is empty: {}", path.display())));
    }
    Ok(secret)
}

fn resolve_password(
    password: Option<String>,
    password_file: Option<PathBuf>,
) -> Result<Option<String>, Error> {
    if password.is_some() && password_file.is_some() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--store-password cannot be combined with --store-password-file")
            .with_hint("Use --store-password-file for safer handling."));
    }
    if let Some(path) = password_file {
        return read_secret_file(&path).map(Some);
    }
    Ok(password)
}

fn add_unavailable_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Unavailable || err.hint().is_some() {
        return err;
    }
    err.with_hint("Check that the gateway and its store are running, then retry.")
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Invalid => "invalid card".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Conflict => "conflict".to_string(),
        ErrorKind::Unavailable => "service unavailable".to_string(),
        ErrorKind::Busy => "busy".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(err.kind().as_str()));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(id) = err.id() {
        inner.insert("id".to_string(), json!(id));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(id) = err.id() {
        lines.push(format!("id: {id}"));
    }
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);
    let command = usage.and_then(|usage| {
        let tokens: Vec<&str> = usage.split_whitespace().collect();
        let pos = tokens.iter().position(|token| *token == "cards")?;
        let parts: Vec<&str> = tokens
            .iter()
            .skip(pos + 1)
            .take_while(|token| {
                !(token.starts_with('-') || token.starts_with('<') || token.starts_with('['))
            })
            .copied()
            .collect();
        Some(parts.join(" "))
    });
    match command {
        Some(command) if !command.is_empty() => format!("Try `cards {command} --help`."),
        _ => "Try `cards --help`.".to_string(),
    }
}
