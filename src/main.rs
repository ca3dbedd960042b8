use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use alloy::dyn_abi::{DynSolType, Specifier};
use alloy::primitives::{Address, U256};
use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use contract_bind::config::Config;
use contract_bind::ethereum::{abi, utils};
use contract_bind::{
    AbiRegistry, AbiSource, CallOptions, ContractBinding, FilterCriteria, FilterOptions,
    ProviderManager, TransactOptions, TypedEvent, WatchOptions,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

fn contract_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("address")
            .short('a')
            .long("address")
            .value_name("ADDRESS")
            .required(true)
            .help("Contract address"),
    )
    .arg(
        Arg::new("abi")
            .long("abi")
            .value_name("FILE")
            .help("ABI JSON file or compiler artifact"),
    )
    .arg(
        Arg::new("abi-name")
            .long("abi-name")
            .value_name("NAME")
            .conflicts_with("abi")
            .help("Name of an ABI in the configured ABI directory or cache"),
    )
}

fn method_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("method")
            .short('m')
            .long("method")
            .value_name("METHOD")
            .help("Function name, or full signature for overloads"),
    )
    .arg(
        Arg::new("args")
            .long("args")
            .value_name("JSON")
            .help("Arguments as a JSON array or an object keyed by parameter name"),
    )
}

fn event_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("event")
            .short('e')
            .long("event")
            .value_name("EVENT")
            .required(true)
            .help("Event name, or full signature for overloads"),
    )
    .arg(
        Arg::new("filter")
            .long("filter")
            .value_name("JSON")
            .help("Accepted values per indexed field, e.g. {\"from\": [\"0x..\"]}"),
    )
    .arg(
        Arg::new("from-block")
            .long("from-block")
            .value_name("BLOCK")
            .help("First block to include"),
    )
}

fn cli() -> Command {
    Command::new("contract-bind")
        .version("0.1.0")
        .about("Call, transact with and watch Ethereum contracts through their ABI")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Path to configuration file"),
        )
        .arg(
            Arg::new("network")
                .short('n')
                .long("network")
                .value_name("NETWORK")
                .global(true)
                .help("Network to use (ethereum, sepolia, local or any configured name)"),
        )
        .arg(
            Arg::new("rpc-url")
                .short('r')
                .long("rpc-url")
                .value_name("URL")
                .global(true)
                .help("RPC endpoint URL, overrides the selected network's"),
        )
        .arg(
            Arg::new("allow-writes")
                .long("allow-writes")
                .global(true)
                .help("Allow write operations (transactions)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .help("Generate a sample configuration file and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config-path")
                .long("config-path")
                .help("Print the default configuration file path and exit")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            method_args(contract_args(Command::new("call").about("Call a view or pure function")))
                .mut_arg("method", |arg| arg.required(true))
                .arg(
                    Arg::new("block")
                        .long("block")
                        .value_name("BLOCK")
                        .help("Block to call against; latest when omitted, or 'pending'"),
                )
                .arg(
                    Arg::new("from")
                        .long("from")
                        .value_name("ADDRESS")
                        .help("Caller address"),
                )
                .arg(
                    Arg::new("simulate")
                        .long("simulate")
                        .help("Allow state-changing functions, executed as eth_call")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            method_args(contract_args(
                Command::new("send")
                    .about("Send a transaction; without --method, a plain value transfer"),
            ))
            .arg(
                Arg::new("value")
                    .long("value")
                    .value_name("WEI")
                    .help("Value to send, decimal or 0x hex"),
            )
            .arg(
                Arg::new("gas-limit")
                    .long("gas-limit")
                    .value_name("GAS")
                    .value_parser(clap::value_parser!(u64))
                    .help("Gas limit; estimated when omitted"),
            )
            .arg(
                Arg::new("gas-price")
                    .long("gas-price")
                    .value_name("WEI")
                    .help("Legacy gas price"),
            )
            .arg(
                Arg::new("nonce")
                    .long("nonce")
                    .value_name("NONCE")
                    .value_parser(clap::value_parser!(u64)),
            ),
        )
        .subcommand(
            event_args(contract_args(
                Command::new("logs").about("Query historical events over a block range"),
            ))
            .arg(
                Arg::new("to-block")
                    .long("to-block")
                    .value_name("BLOCK")
                    .help("Last block to include; latest when omitted"),
            )
            .arg(
                Arg::new("page-size")
                    .long("page-size")
                    .value_name("BLOCKS")
                    .value_parser(clap::value_parser!(u64))
                    .help("Blocks per query window"),
            ),
        )
        .subcommand(event_args(contract_args(
            Command::new("watch").about("Stream new events until interrupted"),
        )))
        .subcommand(
            Command::new("networks")
                .about("List configured networks and check their RPC endpoints"),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let matches = cli().get_matches();

    if matches.get_flag("generate-config") {
        println!("{}", Config::generate_sample());
        return Ok(());
    }

    if matches.get_flag("config-path") {
        match Config::default_config_path() {
            Ok(path) => {
                println!("{}", path.display());
                return Ok(());
            }
            Err(e) => {
                error!("Could not determine default config path: {}", e);
                return Err(e);
            }
        }
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .or_else(|| Config::default_config_path().ok().filter(|path| path.exists()));
    let mut config = Config::load_or_default(config_path).await;

    if let Some(network) = matches.get_one::<String>("network") {
        config.default_network = network.clone();
    }

    if let Some(rpc_url) = matches.get_one::<String>("rpc-url") {
        if let Some(network_config) = config.networks.get_mut(&config.default_network) {
            network_config.rpc_url = rpc_url.clone();
        }
    }

    if matches.get_flag("allow-writes") {
        config.security.allow_write_operations = true;
    }

    info!("Network: {}", config.default_network);

    let Some((command, sub)) = matches.subcommand() else {
        cli().print_help()?;
        return Ok(());
    };

    let manager = ProviderManager::new(config.clone())?;
    if command == "networks" {
        return run_networks(&manager).await;
    }

    let mut registry = AbiRegistry::new(abi_source(&config));
    let backend = manager.get_backend(None)?;
    let binding = bind(sub, &mut registry, backend).await?;

    let outcome = match command {
        "call" => run_call(&binding, sub).await,
        "send" => run_send(&binding, sub, &config).await,
        "logs" => run_logs(&binding, sub, &config).await,
        "watch" => run_watch(&binding, sub).await,
        other => Err(anyhow!("Unknown command '{}'", other)),
    };

    if let Err(e) = &outcome {
        if let Some(reason) = e
            .downcast_ref::<contract_bind::Error>()
            .and_then(|err| binding.decode_revert(err).or_else(|| decode_any(&registry, err)))
        {
            error!("Execution reverted: {}", reason);
        }
    }

    outcome
}

fn abi_source(config: &Config) -> AbiSource {
    let mut source = AbiSource {
        abi_dir: config.abi.abi_dir.clone(),
        ..AbiSource::default()
    };
    if let Some(cache_dir) = &config.abi.cache_dir {
        source.cache_dir = cache_dir.clone();
    }
    source
}

fn decode_any(
    registry: &AbiRegistry,
    err: &contract_bind::Error,
) -> Option<contract_bind::RevertReason> {
    registry.decode_revert(err.revert_data()?)
}

async fn bind(
    sub: &ArgMatches,
    registry: &mut AbiRegistry,
    backend: Arc<contract_bind::AlloyBackend>,
) -> Result<ContractBinding> {
    let address = parse_address(sub, "address")?.context("Missing contract address")?;

    let abi = match (sub.get_one::<String>("abi"), sub.get_one::<String>("abi-name")) {
        (Some(path), _) => {
            let abi = abi::load_abi_file(path).await?;
            registry.add_abi(&address.to_string(), abi)
        }
        (None, Some(name)) => registry.get_abi(name).await?,
        (None, None) => return Err(anyhow!("One of --abi or --abi-name is required")),
    };

    Ok(ContractBinding::with_shared_abi(address, abi, backend))
}

fn parse_address(sub: &ArgMatches, name: &str) -> Result<Option<Address>> {
    sub.get_one::<String>(name)
        .map(|value| utils::validate_address(value))
        .transpose()
        .with_context(|| format!("Invalid --{}", name))
}

fn parse_block(sub: &ArgMatches, name: &str) -> Result<Option<u64>> {
    sub.get_one::<String>(name)
        .map(|value| utils::parse_block_number(value))
        .transpose()
        .with_context(|| format!("Invalid --{}", name))
}

fn parse_json(sub: &ArgMatches, name: &str) -> Result<Value> {
    match sub.get_one::<String>(name) {
        Some(raw) => serde_json::from_str(raw).with_context(|| format!("--{} is not valid JSON", name)),
        None => Ok(Value::Null),
    }
}

async fn run_call(binding: &ContractBinding, sub: &ArgMatches) -> Result<()> {
    let method = sub.get_one::<String>("method").context("Missing --method")?;
    let (signature, args) = binding.json_args(method, &parse_json(sub, "args")?)?;

    let mut opts = match sub.get_one::<String>("block").map(String::as_str) {
        Some("pending") => CallOptions {
            pending: true,
            ..Default::default()
        },
        Some("latest") | None => CallOptions::default(),
        Some(block) => CallOptions::at_block(utils::parse_block_number(block)?),
    };
    if let Some(from) = parse_address(sub, "from")? {
        opts = opts.from(from);
    }

    let values = if sub.get_flag("simulate") {
        binding.simulate(&opts, &signature, &args).await?
    } else {
        binding.call(&opts, &signature, &args).await?
    };

    print_json(&json!({
        "function": signature,
        "result": utils::dyn_sol_values_to_json(&values),
    }))
}

async fn run_send(binding: &ContractBinding, sub: &ArgMatches, config: &Config) -> Result<()> {
    if !config.security.allow_write_operations {
        return Err(anyhow!(
            "Write operations are disabled. Pass --allow-writes or set security.allow_write_operations"
        ));
    }

    let value = sub
        .get_one::<String>("value")
        .map(|v| utils::validate_hex_value(v))
        .transpose()
        .context("Invalid --value")?;

    if let (Some(value), Some(limit)) = (value, &config.security.max_transaction_value) {
        let limit = utils::validate_hex_value(limit)
            .context("Invalid security.max_transaction_value")?;
        if value > limit {
            return Err(anyhow!(
                "Value {} exceeds the configured maximum of {} wei",
                value,
                limit
            ));
        }
    }

    let gas_price = sub
        .get_one::<String>("gas-price")
        .map(|v| utils::validate_hex_value(v))
        .transpose()
        .context("Invalid --gas-price")?
        .map(|price| u128::try_from(price).map_err(|_| anyhow!("Gas price out of range")))
        .transpose()?;

    let opts = TransactOptions {
        value,
        nonce: sub.get_one::<u64>("nonce").copied(),
        gas_limit: sub.get_one::<u64>("gas-limit").copied(),
        gas_price,
        ..Default::default()
    };

    let tx = match sub.get_one::<String>("method") {
        Some(method) => {
            let (signature, args) = binding.json_args(method, &parse_json(sub, "args")?)?;
            binding.transact(&opts, &signature, &args).await?
        }
        None => {
            if value.unwrap_or(U256::ZERO).is_zero() {
                warn!("Sending a plain transfer without value");
            }
            binding.transfer(&opts).await?
        }
    };

    let mut output = serde_json::to_value(&tx)?;
    if let Some(url) = config
        .networks
        .get(&config.default_network)
        .and_then(|network| network.tx_url(&tx.hash))
    {
        output["explorer_url"] = json!(url);
    }

    print_json(&output)
}

/// Build filter criteria from `{"field": value | [values]}`
fn criteria(binding: &ContractBinding, sub: &ArgMatches) -> Result<FilterCriteria> {
    let event_name = sub.get_one::<String>("event").context("Missing --event")?;
    let event = binding.events().event(event_name)?;
    let mut criteria = FilterCriteria::new(event_name.clone());

    let rules = match parse_json(sub, "filter")? {
        Value::Null => return Ok(criteria),
        Value::Object(rules) => rules,
        other => return Err(anyhow!("--filter must be a JSON object, got {}", other)),
    };

    for (field, accepted) in rules {
        let param = event
            .inputs
            .iter()
            .find(|param| param.name == field)
            .ok_or_else(|| anyhow!("Event '{}' has no field named '{}'", event.name, field))?;
        let ty = param.resolve()?;

        let accepted = match accepted {
            Value::Array(values)
                if !matches!(ty, DynSolType::Array(_) | DynSolType::FixedArray(..)) =>
            {
                values
            }
            single => vec![single],
        };
        let values = accepted
            .iter()
            .map(|value| utils::json_to_dyn_sol_value(value, &ty))
            .collect::<contract_bind::Result<Vec<_>>>()?;

        criteria = criteria.field(field, values);
    }

    Ok(criteria)
}

fn event_json(event: &TypedEvent) -> Value {
    let fields: BTreeMap<&str, Value> = event
        .fields
        .iter()
        .map(|(name, value)| (name.as_str(), utils::dyn_sol_value_to_json(value)))
        .collect();

    json!({
        "event": event.name,
        "fields": fields,
        "block_number": event.raw.block_number,
        "transaction_hash": event.raw.transaction_hash,
        "log_index": event.raw.log_index,
        "removed": event.raw.removed,
    })
}

async fn run_logs(binding: &ContractBinding, sub: &ArgMatches, config: &Config) -> Result<()> {
    let criteria = criteria(binding, sub)?;
    let opts = FilterOptions {
        start: parse_block(sub, "from-block")?.unwrap_or(0),
        end: parse_block(sub, "to-block")?,
        page_size: sub
            .get_one::<u64>("page-size")
            .copied()
            .or(config.logs.page_size),
    };

    let mut iter = binding.filter_logs(opts, &criteria).await?;
    let mut count = 0usize;
    while let Some(event) = iter.next().await {
        print_json(&event_json(&event))?;
        count += 1;
    }

    if let Some(err) = iter.error() {
        return Err(anyhow!(err.clone()).context(format!("Log query stopped after {} events", count)));
    }

    info!("{} {} events", count, criteria.event());
    Ok(())
}

async fn run_watch(binding: &ContractBinding, sub: &ArgMatches) -> Result<()> {
    let criteria = criteria(binding, sub)?;
    let opts = WatchOptions {
        start: parse_block(sub, "from-block")?,
    };

    let (sink, mut events) = mpsc::channel(64);
    let mut subscription = binding.watch_logs(opts, &criteria, sink).await?;
    info!("Watching {} events, press Ctrl-C to stop", criteria.event());

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = &mut interrupted => {
                subscription.unsubscribe().await;
                break;
            }
            // Queued events come first, then the terminal error of the feed
            next = subscription.recv(&mut events) => match next? {
                Some(event) => print_json(&event_json(&event))?,
                None => break,
            },
        }
    }

    Ok(())
}

async fn run_networks(manager: &ProviderManager) -> Result<()> {
    for name in manager.get_available_networks() {
        let network = manager.get_network_config(Some(&name))?;
        let status = match manager.validate_network_connection(Some(&name)).await {
            Ok(()) => "ok".to_string(),
            Err(e) => {
                warn!("Network {} unreachable: {}", name, e);
                e.to_string()
            }
        };
        print_json(&json!({
            "network": name,
            "chain_id": network.chain_id,
            "explorer_url": network.explorer_url,
            "rpc_url": network.rpc_url,
            "status": status,
        }))?;
    }
    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
