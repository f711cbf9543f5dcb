use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use healthlink_lib::bus::event_types::changed_field;
use healthlink_lib::db::queries::get_setting_updated_at;
use healthlink_lib::settings::config::SETTINGS_RECORD_KEY;
use healthlink_lib::settings::{
    ConnectionStatus, CoordinatorTimeouts, ModelRole, ServiceKind, SettingChange, SettingsError,
};
use healthlink_lib::{init_tracing, stable_db_path, AppState};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Show,
    SetHost(ServiceKind, String),
    SetPort(ServiceKind, String),
    SetModel(ModelRole, String),
    SetContext(u32),
    Models(Option<ModelRole>),
    Test(Option<ServiceKind>),
    Reset,
    Watch,
}

struct CliOptions {
    command: Command,
    db_path: Option<PathBuf>,
    timeout: Duration,
    json: bool,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    init_tracing();

    if let Err(error) = run().await {
        eprintln!("healthlink: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let Some(options) = parse_args(std::env::args().skip(1))? else {
        print_help();
        return Ok(());
    };

    let db_path = match options.db_path {
        Some(path) => path,
        None => stable_db_path().map_err(|e| e.to_string())?,
    };
    let timeouts = CoordinatorTimeouts {
        directory: options.timeout,
        probe: options.timeout,
    };
    let state = AppState::open(&db_path, timeouts).map_err(|e| e.to_string())?;
    let settings = &state.settings;

    match options.command {
        Command::Show => {
            let snapshot = settings.snapshot();
            if options.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&snapshot).map_err(|e| e.to_string())?
                );
                return Ok(());
            }
            println!("database        {}", db_path.display());
            let updated_at = get_setting_updated_at(&state.db, SETTINGS_RECORD_KEY)
                .map_err(|e| e.to_string())?;
            println!(
                "last saved      {}",
                updated_at.as_deref().unwrap_or("never")
            );
            println!("ollama          {}", snapshot.ollama_config.base_url());
            println!("docling         {}", snapshot.docling_config.base_url());
            let prefs = &snapshot.model_preferences;
            for &role in ModelRole::all() {
                let name = prefs.model_for(role);
                println!(
                    "{:<16}{}",
                    role.as_str(),
                    if name.is_empty() { "(none)" } else { name }
                );
            }
            println!("contextSize     {}", prefs.context_size_limit.get());
        }
        Command::SetHost(service, value) => {
            report_change(settings.set_endpoint_hostname(service, &value))?;
        }
        Command::SetPort(service, value) => {
            report_change(settings.set_endpoint_port(service, &value))?;
        }
        Command::SetModel(role, name) => {
            report_change(settings.set_model_preference(role, &name))?;
        }
        Command::SetContext(size) => {
            report_change(settings.set_context_size_limit(size))?;
        }
        Command::Models(role) => {
            let selection = settings.refresh_available_models().await;
            if let Some(error) = selection.error {
                return Err(error);
            }
            let roles: Vec<ModelRole> = match role {
                Some(role) => vec![role],
                None => ModelRole::all().to_vec(),
            };
            for role in roles {
                let options_for_role = settings.models_for_role(role);
                if options.json {
                    println!(
                        "{}",
                        serde_json::to_string(&options_for_role).map_err(|e| e.to_string())?
                    );
                    continue;
                }
                let selected = settings.model_preferences().model_for(role).to_string();
                println!("{}:", role.as_str());
                for option in options_for_role {
                    let marker = if option.name == selected { '*' } else { ' ' };
                    let vision = if option.supports_vision { " [vision]" } else { "" };
                    println!("  {marker} {}{vision}", option.display_name);
                }
            }
        }
        Command::Test(service) => {
            let results = match service {
                Some(service) => vec![(service, settings.test_connection(service).await)],
                None => settings.test_all_connections().await,
            };
            let mut failed = false;
            for (service, status) in results {
                println!("{:<8} {}", service.display_name(), status.text());
                failed |= status == ConnectionStatus::Failed;
            }
            if failed {
                return Err("one or more services are unreachable".to_string());
            }
        }
        Command::Reset => {
            report_change(settings.reset_to_defaults())?;
        }
        Command::Watch => {
            let mut rx = settings.subscribe();
            let refresh = settings.spawn_refresh();
            let chat = settings.spawn_connection_test(ServiceKind::Chat);
            let docling = settings.spawn_connection_test(ServiceKind::Document);

            let printer = tokio::spawn(async move {
                while let Ok(event) = rx.recv().await {
                    println!(
                        "#{:<4} {:<28} {:<16} {}",
                        event.seq,
                        event.event_type,
                        changed_field(&event).unwrap_or("-"),
                        event.payload
                    );
                }
            });

            let _ = refresh.await;
            let _ = chat.await;
            let _ = docling.await;
            // Give the printer a moment to drain what is already queued.
            tokio::time::sleep(Duration::from_millis(50)).await;
            printer.abort();
        }
    }

    Ok(())
}

fn report_change(result: Result<SettingChange, SettingsError>) -> Result<(), String> {
    match result {
        Ok(SettingChange::Applied) => {
            println!("saved");
            Ok(())
        }
        Ok(SettingChange::Unchanged) => {
            println!("unchanged");
            Ok(())
        }
        Err(error @ SettingsError::PersistenceFailure(_)) => {
            Err(format!("applied for this session only: {error}"))
        }
        Err(error) if error.is_retryable() => Err(format!("{error} (retrying may succeed)")),
        Err(error) => Err(error.to_string()),
    }
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Option<CliOptions>, String> {
    let mut db_path = None;
    let mut timeout = Duration::from_secs(5);
    let mut json = false;
    let mut positional = Vec::new();

    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Ok(None);
        }

        if let Some(value) = arg.strip_prefix("--db=") {
            db_path = Some(PathBuf::from(value));
            continue;
        }
        if arg == "--db" {
            let value = args
                .next()
                .ok_or_else(|| "--db requires a value".to_string())?;
            db_path = Some(PathBuf::from(value));
            continue;
        }

        if let Some(value) = arg.strip_prefix("--timeout-ms=") {
            timeout = parse_timeout(value)?;
            continue;
        }
        if arg == "--timeout-ms" {
            let value = args
                .next()
                .ok_or_else(|| "--timeout-ms requires a value".to_string())?;
            timeout = parse_timeout(&value)?;
            continue;
        }

        if arg == "--json" {
            json = true;
            continue;
        }

        if arg.starts_with("--") && arg != "--role" {
            return Err(format!("unknown option '{arg}'. Use --help for usage"));
        }
        positional.push(arg);
    }

    let Some((name, rest)) = positional.split_first() else {
        return Ok(None);
    };
    let command = parse_command(name, rest)?;
    Ok(Some(CliOptions {
        command,
        db_path,
        timeout,
        json,
    }))
}

fn parse_command(name: &str, rest: &[String]) -> Result<Command, String> {
    let arg = |index: usize, what: &str| {
        rest.get(index)
            .cloned()
            .ok_or_else(|| format!("{name} requires {what}"))
    };

    match name {
        "show" => Ok(Command::Show),
        "set-host" => Ok(Command::SetHost(
            ServiceKind::from_str(&arg(0, "a service")?)?,
            arg(1, "a hostname")?,
        )),
        "set-port" => Ok(Command::SetPort(
            ServiceKind::from_str(&arg(0, "a service")?)?,
            arg(1, "a port")?,
        )),
        "set-model" => Ok(Command::SetModel(
            ModelRole::from_str(&arg(0, "a role")?)?,
            rest.get(1).cloned().unwrap_or_default(),
        )),
        "set-context" => {
            let value = arg(0, "a size")?;
            let size = value
                .trim()
                .parse::<u32>()
                .map_err(|_| format!("invalid context size '{value}'"))?;
            Ok(Command::SetContext(size))
        }
        "models" => match rest {
            [] => Ok(Command::Models(None)),
            [flag, role] if flag == "--role" => Ok(Command::Models(Some(ModelRole::from_str(role)?))),
            [role] => Ok(Command::Models(Some(ModelRole::from_str(role)?))),
            _ => Err("usage: models [--role chat|document|vision]".to_string()),
        },
        "test" => match rest.first() {
            Some(service) => Ok(Command::Test(Some(ServiceKind::from_str(service)?))),
            None => Ok(Command::Test(None)),
        },
        "reset" => Ok(Command::Reset),
        "watch" => Ok(Command::Watch),
        other => Err(format!("unknown command '{other}'. Use --help for usage")),
    }
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    let parsed = value
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("invalid --timeout-ms value '{value}'"))?;
    if parsed == 0 {
        return Err("--timeout-ms must be greater than 0".to_string());
    }
    Ok(Duration::from_millis(parsed))
}

fn print_help() {
    println!("Healthlink settings tool");
    println!();
    println!("Usage:");
    println!("  healthlink [options] <command>");
    println!();
    println!("Commands:");
    println!("  show                          Print endpoints and model preferences");
    println!("  set-host <service> <host>     Set the hostname for ollama or docling");
    println!("  set-port <service> <port>     Set the port for ollama or docling (1-65535)");
    println!("  set-model <role> [name]       Set chat, document or vision model (empty clears)");
    println!("  set-context <size>            Set the context window (4096..65536)");
    println!("  models [--role <role>]        Refresh the Ollama model list and show pickers");
    println!("  test [service]                Test one or both connections");
    println!("  reset                         Restore default settings");
    println!("  watch                         Refresh and test while printing change events");
    println!();
    println!("Options:");
    println!("  --db <path>                   Settings database (default: $HEALTHLINK_DATA_DIR/healthlink.db)");
    println!("  --timeout-ms <n>              Per-request timeout (default: 5000)");
    println!("  --json                        Machine-readable output for show and models");
}
