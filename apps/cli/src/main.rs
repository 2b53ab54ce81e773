#![deny(warnings)]

//! Headless CLI: seed the database, inspect contracts, compute rebates for a
//! scenario file (per account or as one union) and run the margin simulator.

mod config;

use anyhow::{anyhow, bail, Context, Result};
use config::{AppConfig, Scenario};
use persistence::SqlitePool;
use rfa_core::{ContractId, ContractScope, TargetType};
use rfa_engine::{default_commission_rate, ImpactRates, InverseTurnover, MarginSimulator};
use rfa_registry::{AccountRef, EntitySource, InMemoryEntities, Registry, SharedRegistry};
use rust_decimal::Decimal;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: rfa [--config FILE] [--db URL] [--version] <command>

commands:
  init                                   create the schema and seed the standard contract
  contracts                              list contracts
  rules <contract_id>                    list the rules of a contract
  assign <CODE_UNION|GROUPE_CLIENT> <value> <contract_id>
  compute --scenario FILE                compute rebates for every account of a scenario
  union --scenario FILE                  compute a scenario as one union (active UNION contracts)
  margin (--commission R | --supplier NAME) --old R --new R --turnover T [--target PCT]
         [--impact-client R] [--impact-supplier R]";

#[derive(Debug, PartialEq)]
enum Command {
    Init,
    Contracts,
    Rules(ContractId),
    Assign {
        target_type: TargetType,
        target_value: String,
        contract: ContractId,
    },
    Compute {
        scenario: PathBuf,
    },
    Union {
        scenario: PathBuf,
    },
    Margin {
        commission: Decimal,
        old_rate: Decimal,
        new_rate: Decimal,
        turnover: Decimal,
        target: Decimal,
        impacts: ImpactRates,
    },
    Help,
}

#[derive(Debug, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    db: Option<String>,
    version: bool,
    command: Command,
}

fn decimal(flag: &str, value: Option<String>) -> Result<Decimal> {
    let v = value.ok_or_else(|| anyhow!("{flag} needs a value"))?;
    v.parse()
        .with_context(|| format!("{flag}: `{v}` is not a decimal number"))
}

fn contract_id(value: Option<String>) -> Result<ContractId> {
    let v = value.ok_or_else(|| anyhow!("missing contract id"))?;
    Ok(ContractId(
        v.parse().with_context(|| format!("invalid contract id `{v}`"))?,
    ))
}

fn parse_margin(mut it: impl Iterator<Item = String>) -> Result<Command> {
    let mut commission = None;
    let mut old_rate = None;
    let mut new_rate = None;
    let mut turnover = None;
    let mut target = Decimal::ZERO;
    let mut impacts = ImpactRates::default();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--commission" => commission = Some(decimal("--commission", it.next())?),
            "--supplier" => {
                let name = it.next().ok_or_else(|| anyhow!("--supplier needs a value"))?;
                commission = Some(default_commission_rate(&name).ok_or_else(|| {
                    anyhow!("no default commission rate for supplier `{name}`")
                })?);
            }
            "--old" => old_rate = Some(decimal("--old", it.next())?),
            "--new" => new_rate = Some(decimal("--new", it.next())?),
            "--turnover" => turnover = Some(decimal("--turnover", it.next())?),
            "--target" => target = decimal("--target", it.next())?,
            "--impact-client" => impacts.client = decimal("--impact-client", it.next())?,
            "--impact-supplier" => impacts.supplier = decimal("--impact-supplier", it.next())?,
            other => bail!("unknown margin option `{other}`"),
        }
    }
    Ok(Command::Margin {
        commission: commission.ok_or_else(|| anyhow!("--commission or --supplier is required"))?,
        old_rate: old_rate.ok_or_else(|| anyhow!("--old is required"))?,
        new_rate: new_rate.ok_or_else(|| anyhow!("--new is required"))?,
        turnover: turnover.ok_or_else(|| anyhow!("--turnover is required"))?,
        target,
        impacts,
    })
}

fn parse_scenario(command: &str, mut it: impl Iterator<Item = String>) -> Result<PathBuf> {
    let mut scenario = None;
    while let Some(a) = it.next() {
        match a.as_str() {
            "--scenario" => scenario = it.next().map(PathBuf::from),
            other => bail!("unknown {command} option `{other}`"),
        }
    }
    scenario.ok_or_else(|| anyhow!("{command} needs --scenario FILE"))
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut config = None;
    let mut db = None;
    let mut version = false;
    let mut it = args.into_iter();
    let mut command = Command::Help;
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => config = it.next().map(PathBuf::from),
            "--db" => db = it.next(),
            "--version" | "-V" => version = true,
            "--help" | "-h" => command = Command::Help,
            "init" => command = Command::Init,
            "contracts" => command = Command::Contracts,
            "rules" => command = Command::Rules(contract_id(it.next())?),
            "assign" => {
                let tt = it.next().unwrap_or_default();
                let target_type = TargetType::parse(&tt)
                    .ok_or_else(|| anyhow!("unknown target type `{tt}`"))?;
                let target_value = it.next().ok_or_else(|| anyhow!("missing target value"))?;
                command = Command::Assign {
                    target_type,
                    target_value,
                    contract: contract_id(it.next())?,
                };
            }
            "compute" => {
                command = Command::Compute {
                    scenario: parse_scenario("compute", it.by_ref())?,
                };
            }
            "union" => {
                command = Command::Union {
                    scenario: parse_scenario("union", it.by_ref())?,
                };
            }
            "margin" => {
                command = parse_margin(it.by_ref())?;
            }
            other => bail!("unknown argument `{other}`\n{USAGE}"),
        }
    }
    Ok(Args {
        config,
        db,
        version,
        command,
    })
}

const SCENARIO_SOURCE: &str = "scenario";

/// Accounts of a scenario, with each client's group taken from the entity
/// source when the account line omits it.
fn scenario_accounts(scenario: &Scenario) -> Result<Vec<AccountRef>> {
    let mut entities = InMemoryEntities::new();
    for acc in &scenario.accounts {
        if let Some(code) = &acc.code_union {
            entities.insert_client(SCENARIO_SOURCE, code, code, acc.groupe_client.as_deref());
        }
    }
    scenario
        .accounts
        .iter()
        .map(|acc| match (&acc.code_union, &acc.groupe_client) {
            (Some(code), _) => Ok(entities.account(SCENARIO_SOURCE, code)),
            (None, Some(group)) => Ok(AccountRef::group(group)),
            (None, None) => bail!("scenario account needs code_union or groupe_client"),
        })
        .collect()
}

async fn open_registry(url: &str) -> Result<(SqlitePool, Registry)> {
    persistence::ensure_sqlite_dir(url)?;
    let pool = persistence::init_db(url).await?;
    let registry = persistence::load_registry(&pool).await?;
    Ok((pool, registry))
}

fn print_margin(sim: &MarginSimulator, target: Decimal, impacts: ImpactRates) -> Result<()> {
    let report = sim.report(target, impacts);
    if report.inverse == InverseTurnover::Undefined {
        warn!(
            commission_rate = %report.commission_rate,
            new_rate = %report.new_rate,
            "commission does not exceed the new rate; inverse turnover is undefined"
        );
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run(cfg: &AppConfig, command: Command) -> Result<()> {
    match command {
        Command::Help => println!("{USAGE}"),
        Command::Init => {
            let (pool, mut registry) = open_registry(&cfg.database_url).await?;
            if registry.is_empty() {
                let standard = registry.seed_standard_contract()?;
                persistence::save_registry(&pool, &registry).await?;
                println!("Seeded {} ({})", standard.name, standard.id);
            } else {
                println!("Database already holds {} contract(s)", registry.contracts().count());
            }
        }
        Command::Contracts => {
            let (_, registry) = open_registry(&cfg.database_url).await?;
            for c in registry.list_contracts() {
                println!(
                    "{:>4} | {:<30} | {:<8} | default: {:<5} | active: {:<5} | combined: {}",
                    c.id, c.name, c.scope, c.is_default, c.is_active, c.use_combined_global_rate
                );
            }
        }
        Command::Rules(id) => {
            let (_, registry) = open_registry(&cfg.database_url).await?;
            let rules = registry.contract_rules(id)?;
            println!("{}", serde_json::to_string_pretty(&rules)?);
        }
        Command::Assign {
            target_type,
            target_value,
            contract,
        } => {
            let (pool, mut registry) = open_registry(&cfg.database_url).await?;
            let a = registry.create_assignment(target_type, &target_value, contract)?;
            persistence::upsert_assignment(&pool, &a).await?;
            println!("Assigned {} {} to contract {}", a.target_type, a.target_value, a.contract_id);
        }
        Command::Compute { scenario } => {
            let (_, registry) = open_registry(&cfg.database_url).await?;
            let shared = SharedRegistry::new(registry);
            let scenario = Scenario::load(&scenario)?;
            let accounts = scenario_accounts(&scenario)?;
            // one blocking task per account, all reading the same registry
            let tasks: Vec<_> = scenario
                .accounts
                .into_iter()
                .zip(accounts)
                .map(|(acc, account)| {
                    let shared = shared.clone();
                    tokio::task::spawn_blocking(move || {
                        let scope = acc.scope.unwrap_or(ContractScope::Adherent);
                        shared
                            .read(|r| r.compute_account(scope, &account, &acc.turnover))
                            .with_context(|| format!("computing {account:?}"))
                    })
                })
                .collect();
            let mut results = Vec::with_capacity(tasks.len());
            let mut grand_total = Decimal::ZERO;
            for task in tasks {
                let out = task.await??;
                grand_total += out.report.totals.grand_total;
                results.push(out);
            }
            info!(accounts = results.len(), %grand_total, "scenario computed");
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Command::Union { scenario } => {
            let (_, registry) = open_registry(&cfg.database_url).await?;
            let scenario = Scenario::load(&scenario)?;
            let out = registry.compute_union(&scenario.total_turnover(), &scenario.by_group())?;
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Margin {
            commission,
            old_rate,
            new_rate,
            turnover,
            target,
            impacts,
        } => {
            let sim = MarginSimulator::new(commission, old_rate, new_rate, turnover)?;
            print_margin(&sim, target, impacts)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    if args.version {
        println!(
            "rfa {} (git {} built {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_SHA"),
            env!("BUILD_DATE")
        );
        return Ok(());
    }

    let mut cfg = AppConfig::load(args.config.as_deref())?;
    if let Some(db) = args.db {
        cfg.database_url = db;
    }

    // Logging setup
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!(db = %cfg.database_url, command = ?args.command, "starting CLI");

    run(&cfg, args.command).await
}
