use std::collections::HashMap;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use cosim_bridge::logging::init_tracing;
use cosim_bridge::{Bridge, BridgeConfig, Simulation};

const USAGE: &str = "\
Usage: cosim-bridge [options] [-- <simulator command...>]

Options:
  --params <file>      JSON file of bridge parameters
  --set <key=value>    Override one parameter (repeatable), e.g. --set repeats=15
  --name <name>        Component name used in logs [default: bridge0]
  --max-cycles <n>     Stop the simulation after n cycles
  -h, --help           Show this help

Parameters:
  printFrequency, repeats, inputPipe, outputPipe, protocol (pyrtl|chisel),
  commandNewline, responseLen, exactResponse,
  readiness (assume_present|poll_until_present),
  retry, createPipes, removePipes, seed, readTimeoutMs, peerCommand, peerCwd,
  peerExitTimeoutMs

Environment:
  COSIM_LOG            Log level (debug, info, warn, error) [default: info]
  LOG_FORMAT=json      Emit JSON logs
  RUST_LOG             Full tracing filter, overrides COSIM_LOG";

const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Default, PartialEq)]
struct Cli {
    params_file: Option<PathBuf>,
    overrides: HashMap<String, String>,
    name: Option<String>,
    max_cycles: Option<u64>,
    peer_command: Vec<String>,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    init_tracing();

    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Cli, String> {
    let mut cli = Cli::default();

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--params" => {
                i += 1;
                cli.params_file = Some(PathBuf::from(
                    args.get(i).ok_or("--params requires a value")?,
                ));
            }
            "--set" => {
                i += 1;
                let pair = args.get(i).ok_or("--set requires key=value")?;
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("--set expects key=value, got '{pair}'"))?;
                cli.overrides.insert(key.to_string(), value.to_string());
            }
            "--name" => {
                i += 1;
                cli.name = Some(args.get(i).ok_or("--name requires a value")?.clone());
            }
            "--max-cycles" => {
                i += 1;
                let raw = args.get(i).ok_or("--max-cycles requires a value")?;
                let cycles = raw
                    .parse()
                    .map_err(|_| format!("--max-cycles expects a number, got '{raw}'"))?;
                cli.max_cycles = Some(cycles);
            }
            "--" => {
                cli.peer_command = args[i + 1..].to_vec();
                break;
            }
            "--help" | "-h" => return Err(String::new()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(cli)
}

fn load_config(cli: &Cli) -> anyhow::Result<BridgeConfig> {
    let base = match cli.params_file {
        Some(ref path) => BridgeConfig::from_json_file(path)?,
        None => BridgeConfig::default(),
    };
    let mut config = base.merge_params(&cli.overrides)?;
    if !cli.peer_command.is_empty() {
        config.peer_command = cli.peer_command.clone();
    }
    Ok(config)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let name = cli.name.unwrap_or_else(|| "bridge0".to_string());

    tracing::info!(
        bridge = %name,
        print_frequency = config.print_frequency,
        repeats = config.repeat_limit,
        input = %config.input_pipe.display(),
        output = %config.output_pipe.display(),
        "cosim-bridge {}",
        env!("CARGO_PKG_VERSION")
    );

    let bridge = Bridge::new(name, config)?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| anyhow::anyhow!("failed to start runtime: {e}"))?;
    let result = rt.block_on(async {
        let mut sim = match cli.max_cycles {
            Some(cycles) => Simulation::new().with_max_cycles(cycles),
            None => Simulation::new(),
        };
        sim.add(bridge);
        sim.run().await
    });
    // A pipe open still parked in the kernel must not keep the process alive.
    rt.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    let report = result?;

    tracing::info!(
        cycles = report.cycles,
        cycle_limit_hit = report.cycle_limit_hit,
        "Simulation ended"
    );
    Ok(())
}
