use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use hostgate_audit::FileAuditSink;
use hostgate_core::{CapabilityRegistry, CapabilitySummary, HostConfig};
use hostgate_guard::Role;
use hostgate_kernel::{bootstrap, rpc, telemetry};
use std::path::PathBuf;

fn cli() -> Command {
    Command::new("hostgate")
        .version(hostgate_kernel::VERSION)
        .about("Policy-gated administration of applications on a single host")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .env("HOSTGATE_CONFIG")
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("managed-root")
                .long("managed-root")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Override the managed application root"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .help("Log filter directive, e.g. info or hostgate_release=debug"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(Command::new("serve").about("Serve JSON-lines requests on stdin/stdout"))
        .subcommand(
            Command::new("invoke")
                .about("Dispatch a single capability and print the response")
                .arg(
                    Arg::new("role")
                        .long("role")
                        .required(true)
                        .help("Role claimed by the caller"),
                )
                .arg(
                    Arg::new("capability")
                        .required(true)
                        .help("Capability name, e.g. apps.list"),
                )
                .arg(
                    Arg::new("args")
                        .long("args")
                        .default_value("{}")
                        .help("Arguments as a JSON object"),
                ),
        )
        .subcommand(
            Command::new("capabilities")
                .about("List capabilities available to a role")
                .arg(
                    Arg::new("role")
                        .long("role")
                        .default_value("admin")
                        .value_parser(|s: &str| s.parse::<Role>().map_err(|e| e.to_string()))
                        .help("Only show capabilities this role may invoke"),
                ),
        )
        .subcommand(Command::new("verify-audit").about("Check the hash chain of the audit trail"))
}

/// File, then environment, then command-line flags
fn resolve_config(matches: &ArgMatches) -> anyhow::Result<HostConfig> {
    let path = matches.get_one::<PathBuf>("config");
    let mut config = bootstrap::load_config(path.map(PathBuf::as_path))
        .context("loading configuration")?;
    if let Some(root) = matches.get_one::<PathBuf>("managed-root") {
        config.managed_root.clone_from(root);
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level.clone_from(level);
    }
    if matches.get_flag("log-json") {
        config.logging.json = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("capabilities", args)) => {
            let role = args.get_one::<Role>("role").copied().unwrap_or(Role::Admin);
            let registry = CapabilityRegistry::new()?;
            let listing: Vec<CapabilitySummary> =
                registry.list_for(role).map(|d| d.summary()).collect();
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        Some(("serve", _)) => {
            let config = resolve_config(&matches)?;
            telemetry::init(&config.logging)?;
            let dispatcher = bootstrap::build_dispatcher(config).await?;
            tracing::info!(version = hostgate_kernel::VERSION, "serving on stdio");
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let replies = rpc::serve(dispatcher, stdin, tokio::io::stdout())
                .await
                .context("stdio transport failed")?;
            tracing::info!(replies, "shutting down");
        }
        Some(("invoke", args)) => {
            let config = resolve_config(&matches)?;
            telemetry::init(&config.logging)?;
            let role = args.get_one::<String>("role").map_or("", String::as_str);
            let capability = args.get_one::<String>("capability").map_or("", String::as_str);
            let raw = args.get_one::<String>("args").map_or("{}", String::as_str);
            let arguments: serde_json::Value =
                serde_json::from_str(raw).context("--args is not valid JSON")?;

            let dispatcher = bootstrap::build_dispatcher(config).await?;
            let response = dispatcher.dispatch(role, capability, arguments).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.ok {
                std::process::exit(1);
            }
        }
        Some(("verify-audit", _)) => {
            let config = resolve_config(&matches)?;
            telemetry::init(&config.logging)?;
            let sink = FileAuditSink::open(&config.audit_log).await?;
            match sink.verify().await {
                Ok(count) => println!("audit trail intact: {count} record(s) in {}", sink.path().display()),
                Err(e) => {
                    eprintln!("audit trail broken: {e}");
                    std::process::exit(1);
                }
            }
        }
        _ => {}
    }
    Ok(())
}
