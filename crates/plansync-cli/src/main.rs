//! `plansync` command-line driver

mod simulate;

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use plansync_core::{Identity, SyncConfig, ToolCatalog};
use simulate::{run_simulation, SimulationConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("plansync")
        .version(plansync_core::VERSION)
        .about("Planning-tool state synchronization")
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Two devices edit the same tool; check that they converge")
                .arg(
                    Arg::new("tool")
                        .long("tool")
                        .default_value("strategic_canvas")
                        .help("Tool id from the catalog"),
                )
                .arg(
                    Arg::new("edits")
                        .long("edits")
                        .default_value("20")
                        .value_parser(value_parser!(u32))
                        .help("Number of random edits on the first device"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML config; accelerated timings are used when omitted"),
                ),
        )
        .subcommand(
            Command::new("tools")
                .about("List the tool catalog and resolved storage keys")
                .arg(
                    Arg::new("identity")
                        .long("identity")
                        .help("Resolve keys for this identity instead of a guest"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration as TOML")
                .arg(
                    Arg::new("file")
                        .long("file")
                        .value_parser(value_parser!(PathBuf))
                        .help("Config file layered over the defaults"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("simulate", args)) => simulate_cmd(args).await,
        Some(("tools", args)) => {
            tools_cmd(args);
            Ok(())
        }
        Some(("config", args)) => config_cmd(args),
        _ => Ok(()),
    }
}

async fn simulate_cmd(args: &ArgMatches) -> Result<()> {
    let tool_id = args
        .get_one::<String>("tool")
        .cloned()
        .unwrap_or_default();
    let edits = args.get_one::<u32>("edits").copied().unwrap_or(20);
    let seed = args.get_one::<u64>("seed").copied().unwrap_or(42);

    let sync = match args.get_one::<PathBuf>("config") {
        Some(path) => SyncConfig::load(Some(path.as_path()))
            .with_context(|| format!("loading {}", path.display()))?,
        None => SimulationConfig::accelerated_timings(),
    };

    let Some(tool) = ToolCatalog::builtin().get(&tool_id).cloned() else {
        bail!("unknown tool `{tool_id}`; see `plansync tools`");
    };
    if !tool.syncs() {
        bail!("tool `{tool_id}` has no storage keys to synchronize");
    }

    println!("Simulating {edits} edits on `{tool_id}` (seed {seed})");
    let report = run_simulation(SimulationConfig {
        tool,
        edits,
        seed,
        sync,
    })
    .await?;
    println!("{}", report.generate_text());

    std::process::exit(if report.converged { 0 } else { 1 });
}

fn tools_cmd(args: &ArgMatches) {
    let identity = args.get_one::<String>("identity").map(Identity::new);

    for tool in &ToolCatalog::builtin() {
        println!("{:<24} {}", tool.id.as_str(), tool.title);
        if !tool.syncs() {
            println!("    (no synchronized state)");
            continue;
        }
        match tool.resolve(identity.as_ref()) {
            Some(keys) => {
                for key in keys.iter() {
                    println!("    {key}");
                }
            }
            None => println!("    (sign-in required)"),
        }
    }
}

fn config_cmd(args: &ArgMatches) -> Result<()> {
    let path = args.get_one::<PathBuf>("file");
    let config = SyncConfig::load(path.map(PathBuf::as_path)).context("loading configuration")?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}
