//! Purpose: Hold top-level CLI command dispatch for `cards`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Client commands go through `RecordView` so they refresh like any other front-end.
//! Invariants: In human mode view failures were already shown by the renderer; only the exit code remains.

use super::*;

use std::net::SocketAddr;
use std::time::Duration;

use cards::api::{GatewayClient, RecordsApi};
use cards::store::StoreSettings;
use cards::view::RecordView;
use super::terminal::TerminalRenderer;

type TerminalView = RecordView<GatewayClient, TerminalRenderer>;

pub(super) fn dispatch_command(command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "cards", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Serve(args) => {
            let config = serve_config_from_run_args(args)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
        Command::List { client } => {
            let json = wants_json(&client);
            let view = open_view(&client, json, true, false)?;
            finish(view.refresh().map(|_| RunOutcome::ok()), json)
        }
        Command::Show { id, client } => {
            let card = connect(&client)?.get(&id)?;
            let value = serde_json::to_value(&card).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode card")
                    .with_source(err)
            })?;
            emit_json(value);
            Ok(RunOutcome::ok())
        }
        Command::Create { fields, client } => {
            if fields.name.is_none() || fields.elixir_cost.is_none() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("create requires --name and --elixir-cost")
                    .with_hint("Try `cards create --name Giant --elixir-cost 5`."));
            }
            let json = wants_json(&client);
            let view = open_view(&client, json, !json, false)?;
            let mut form = CardForm::default();
            fields.overlay(&mut form);
            view.set_form(form);
            finish(
                view.submit()
                    .map(|id| confirm_mutation("Card created", &id, json)),
                json,
            )
        }
        Command::Edit { id, fields, client } => {
            let json = wants_json(&client);
            let view = open_view(&client, json, !json, false)?;
            if let Err(err) = view.begin_edit(&id) {
                return finish(Err(err), json);
            }
            let mut form = view.form();
            fields.overlay(&mut form);
            view.set_form(form);
            finish(
                view.submit()
                    .map(|id| confirm_mutation("Card updated", &id, json)),
                json,
            )
        }
        Command::Delete { id, yes, client } => {
            let json = wants_json(&client);
            let view = open_view(&client, json, !json, yes)?;
            match view.delete(&id) {
                Ok(true) => Ok(confirm_mutation("Card deleted", &id, json)),
                Ok(false) if io::stdin().is_terminal() => {
                    eprintln!("Kept {id}.");
                    Ok(RunOutcome::ok())
                }
                Ok(false) => Err(Error::new(ErrorKind::Usage)
                    .with_message("delete was not confirmed")
                    .with_id(id)
                    .with_hint("Re-run with --yes to delete without prompting.")),
                Err(err) => finish(Err(err), json),
            }
        }
    }
}

fn serve_config_from_run_args(args: ServeRunArgs) -> Result<serve::ServeConfig, Error> {
    let password = resolve_password(args.store_password, args.store_password_file)?;
    if password.is_some() && args.store_username.is_none() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("a store password requires --store-username")
            .with_hint("Set --store-username or CARDS_STORE_USERNAME."));
    }
    let store = StoreSettings {
        url: args.store_url,
        username: args.store_username,
        password,
        bucket: args.bucket,
        scope: args.scope,
        collection: args.collection,
        timeout: Duration::from_millis(args.store_timeout_ms),
    };
    Ok(serve::ServeConfig {
        bind: SocketAddr::new(args.host, args.port),
        store,
        list_limit: args.list_limit,
        max_body_bytes: args.max_body_bytes,
        cors_allowed_origins: args.cors_origin,
        static_dir: args.static_dir,
    })
}

fn wants_json(client: &ClientArgs) -> bool {
    client.json || !io::stdout().is_terminal()
}

fn connect(client: &ClientArgs) -> Result<GatewayClient, Error> {
    Ok(GatewayClient::new(client.url.clone())?
        .with_timeout(Duration::from_millis(client.timeout_ms)))
}

fn open_view(
    client: &ClientArgs,
    json: bool,
    show_list: bool,
    assume_yes: bool,
) -> Result<TerminalView, Error> {
    let renderer = TerminalRenderer::new(json, assume_yes).with_list(show_list);
    Ok(RecordView::new(connect(client)?, renderer))
}

fn confirm_mutation(message: &str, id: &str, json: bool) -> RunOutcome {
    if json {
        emit_json(json!({ "message": message, "id": id }));
    } else {
        eprintln!("{message}: {id}");
    }
    RunOutcome::ok()
}

fn finish(result: Result<RunOutcome, Error>, json: bool) -> Result<RunOutcome, Error> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(err) if json => Err(err),
        Err(err) => Ok(RunOutcome::with_code(to_exit_code(err.kind()))),
    }
}
