//! Organism CLI — spawn, feed, reproduce and trace organisms on a local ledger
//!
//! Commands:
//!   organism wallet    — show a wallet identity and its spendable funds
//!   organism fund      — mint funds to a wallet on the local ledger
//!   organism spawn     — create a new lineage
//!   organism feed      — top up a live organism
//!   organism reproduce — advance a lineage one generation and claim the reward
//!   organism confirm   — confirm pending transitions
//!   organism trace     — reconstruct one lineage
//!   organism scan      — trace many lineages concurrently
//!   organism decode    — decode an annotation from hex
//!   organism demo      — run a full lifecycle on a scratch ledger

use organism_core::annotation::{self, Payload};
use organism_core::covenant::{Lifecycle, Organism, SpawnParams};
use organism_core::ledger::{LedgerReader, MemoryLedger, Throttled};
use organism_core::lineage::{scan_lineages, LineageTrace, LineageWalker};
use organism_core::transition::{finalize, submit, Identity, KeySigner, Signer, TransitionBuilder, TransitionId};
use organism_core::{Config, OrganismError, TraceStore};
use std::env;
use std::error::Error;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const LEDGER_FILE: &str = "organism-ledger.json";
const CONFIG_FILE: &str = "organism.json";

type CliResult = Result<(), Box<dyn Error>>;

fn print_usage() {
    println!(
        r#"
╔══════════════════════════════════════════════════════════════╗
║        organism v0.1 — self-propagating ledger outputs       ║
╚══════════════════════════════════════════════════════════════╝

Usage: organism <command> [options]

Commands:
  wallet     <secret>                                        Show identity and funds
  fund       <secret> <amount>                               Mint funds on the local ledger
  spawn      <secret> <species> <reward> <fee> <dust> <balance> [payload-hex...]
                                                             Spawn a new lineage
  feed       <secret> <origin> <amount> [payload-hex...]     Feed a live organism
  reproduce  <origin> <claimer> [payload-hex...]             Reproduce and claim the reward
  confirm                                                    Confirm pending transitions
  trace      <origin>                                        Reconstruct one lineage
  scan       [origin...]                                     Trace lineages (default: all cached)
  decode     <hex>                                           Decode an annotation
  demo                                                       Run a full lifecycle demo

Files:
  {LEDGER_FILE}   local ledger
  {CONFIG_FILE}          protocol and scan settings (optional)

Examples:
  organism fund alice 500000
  organism spawn alice 1 1000 3000 546 100000
  organism reproduce <origin> bob
  organism trace <origin>
"#
    );
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    let result = match args[1].as_str() {
        "wallet" => cmd_wallet(&args[2..]).await,
        "fund" => cmd_fund(&args[2..]).await,
        "spawn" => cmd_spawn(&args[2..]).await,
        "feed" => cmd_feed(&args[2..]).await,
        "reproduce" => cmd_reproduce(&args[2..]).await,
        "confirm" => cmd_confirm().await,
        "trace" => cmd_trace(&args[2..]).await,
        "scan" => cmd_scan(&args[2..]).await,
        "decode" => cmd_decode(&args[2..]).await,
        "demo" => cmd_demo().await,
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("\n  Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config() -> Result<Config, Box<dyn Error>> {
    Ok(Config::load_or_default(CONFIG_FILE)?)
}

fn load_ledger(config: &Config) -> Result<MemoryLedger, Box<dyn Error>> {
    let ledger = MemoryLedger::open(LEDGER_FILE, config.protocol.protocol_tag)?;
    println!("  Ledger: {} transitions ({})", ledger.transition_count(), LEDGER_FILE);
    Ok(ledger)
}

fn save_ledger(ledger: &MemoryLedger) -> CliResult {
    ledger.save(LEDGER_FILE)?;
    println!("  Saved to {}", LEDGER_FILE);
    Ok(())
}

fn arg<T>(args: &[String], index: usize, name: &str) -> Result<T, Box<dyn Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = args
        .get(index)
        .ok_or_else(|| format!("missing <{}>", name))?;
    raw.parse::<T>()
        .map_err(|e| format!("invalid <{}> '{}': {}", name, raw, e).into())
}

fn payload_from(args: &[String]) -> Result<Payload, Box<dyn Error>> {
    let segments = args
        .iter()
        .map(hex::decode)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Payload::from_segments(segments)?)
}

/// Walk a lineage to its tip and return the live organism there
fn live_organism(ledger: &MemoryLedger, config: &Config, origin: TransitionId) -> Result<Organism, Box<dyn Error>> {
    let store = TraceStore::open(&config.scan.trace_dir)?;
    let trace = LineageWalker::new(ledger, config.protocol.protocol_tag)
        .with_store(&store)
        .trace(origin)?;
    match trace.lifecycle() {
        Some(Lifecycle::Alive(organism)) => Ok(organism),
        Some(Lifecycle::Dead { generation }) => Err(OrganismError::TerminalLineage { generation }.into()),
        None => Err(OrganismError::UnresolvedReference(origin).into()),
    }
}

fn print_trace(trace: &LineageTrace) {
    println!("\n  {}", trace.summary());
    println!("  {}", "-".repeat(80));
    for entry in trace.entries() {
        let confirmed = entry
            .confirmation
            .as_ref()
            .map(|c| format!("h{}", c.height))
            .unwrap_or_else(|| "pending".into());
        println!(
            "  gen {:>4} | {:<9} | {} | balance {:>10} | reward {:>6} | fee {:>6} | fed {:>6} | {}{}",
            entry.generation,
            format!("{:?}", entry.kind),
            entry.transition_id.short(),
            entry.balance,
            entry.reward,
            entry.fee,
            entry.fed,
            confirmed,
            if entry.alive { "" } else { " | dead" }
        );
    }
}

async fn cmd_wallet(args: &[String]) -> CliResult {
    let secret: String = arg(args, 0, "secret")?;
    let config = load_config()?;
    let ledger = load_ledger(&config)?;
    let signer = KeySigner::from_secret(&secret);
    let utxos = ledger.fetch_unspent_outputs(signer.identity())?;
    let total: u64 = utxos.iter().map(|u| u.value).sum();
    println!("\n  Identity: {}", signer.identity());
    println!("  Spendable: {} in {} outputs", total, utxos.len());
    for utxo in &utxos {
        println!("    {} {}", utxo.outpoint, utxo.value);
    }
    Ok(())
}

async fn cmd_fund(args: &[String]) -> CliResult {
    let secret: String = arg(args, 0, "secret")?;
    let amount: u64 = arg(args, 1, "amount")?;
    let config = load_config()?;
    let ledger = load_ledger(&config)?;
    let signer = KeySigner::from_secret(&secret);
    let utxo = ledger.mint(signer.identity(), amount)?;
    println!("\n  Minted {} to {} at {}", amount, signer.identity(), utxo.outpoint);
    save_ledger(&ledger)
}

async fn cmd_spawn(args: &[String]) -> CliResult {
    let secret: String = arg(args, 0, "secret")?;
    let params = SpawnParams {
        species: arg(args, 1, "species")?,
        reward_per_generation: arg(args, 2, "reward")?,
        fee_per_generation: arg(args, 3, "fee")?,
        dust_floor: arg(args, 4, "dust")?,
        initial_balance: arg(args, 5, "balance")?,
        payload: payload_from(args.get(6..).unwrap_or_default())?,
    };

    let config = load_config()?;
    let ledger = load_ledger(&config)?;
    let signer = KeySigner::from_secret(&secret);
    let builder = TransitionBuilder::new(config.protocol.clone());

    let funding = ledger.fetch_unspent_outputs(signer.identity())?;
    let built = builder.spawn(&params, &funding, signer.identity())?;
    let tx = finalize(built.transition, &signer)?;
    let origin = submit(&ledger, &tx)?;

    println!("\n  Spawned lineage {}", origin);
    println!("  {}", Organism::from_transition(origin, &tx)?.summary());
    save_ledger(&ledger)
}

async fn cmd_feed(args: &[String]) -> CliResult {
    let secret: String = arg(args, 0, "secret")?;
    let origin: TransitionId = arg(args, 1, "origin")?;
    let amount: u64 = arg(args, 2, "amount")?;
    let payload = payload_from(args.get(3..).unwrap_or_default())?;

    let config = load_config()?;
    let ledger = load_ledger(&config)?;
    let signer = KeySigner::from_secret(&secret);
    let builder = TransitionBuilder::new(config.protocol.clone());

    let organism = live_organism(&ledger, &config, origin)?;
    let funding = ledger.fetch_unspent_outputs(signer.identity())?;
    let built = builder.feed(&organism, amount, &funding, signer.identity(), payload)?;
    let tx = finalize(built.transition, &signer)?;
    let id = submit(&ledger, &tx)?;

    println!("\n  Fed {} → {}", organism.outpoint, id.short());
    println!("  Balance {} → {}", organism.value, built.expected.next_balance);
    save_ledger(&ledger)
}

async fn cmd_reproduce(args: &[String]) -> CliResult {
    let origin: TransitionId = arg(args, 0, "origin")?;
    let claimer = Identity::new(arg::<String>(args, 1, "claimer")?);
    let payload = payload_from(args.get(2..).unwrap_or_default())?;

    let config = load_config()?;
    let ledger = load_ledger(&config)?;
    let builder = TransitionBuilder::new(config.protocol.clone());

    let organism = live_organism(&ledger, &config, origin)?;
    let built = builder.reproduce(&organism, &claimer, payload)?;
    let id = submit(&ledger, &built.transition)?;

    println!(
        "\n  Generation {} → {} in {}",
        organism.generation(),
        built.expected.next_state.generation,
        id.short()
    );
    println!("  Reward {} to {}", built.expected.reward, claimer);
    if built.expected.alive {
        println!("  Continuation balance {}", built.expected.next_balance);
    } else {
        println!("  The organism died; lineage is terminal");
    }
    save_ledger(&ledger)
}

async fn cmd_confirm() -> CliResult {
    let config = load_config()?;
    let ledger = load_ledger(&config)?;
    let height = ledger.confirm_pending()?;
    println!("\n  Ledger height {}", height);
    save_ledger(&ledger)
}

async fn cmd_trace(args: &[String]) -> CliResult {
    let origin: TransitionId = arg(args, 0, "origin")?;
    let config = load_config()?;
    let ledger = load_ledger(&config)?;
    let store = TraceStore::open(&config.scan.trace_dir)?;

    let walker = LineageWalker::new(&ledger, config.protocol.protocol_tag).with_store(&store);
    match walker.trace(origin) {
        Ok(trace) => {
            print_trace(&trace);
            trace.check_invariants()?;
            println!("\n  Invariants hold");
            Ok(())
        }
        Err(halted) => {
            print_trace(&halted.partial);
            Err(halted.into())
        }
    }
}

async fn cmd_scan(args: &[String]) -> CliResult {
    let config = load_config()?;
    let origins = if args.is_empty() {
        TraceStore::open(&config.scan.trace_dir)?.list()?
    } else {
        args.iter()
            .map(|a| a.parse::<TransitionId>())
            .collect::<Result<Vec<_>, _>>()?
    };
    if origins.is_empty() {
        println!("\n  No lineages to scan. Pass origins or run 'organism trace' first.");
        return Ok(());
    }

    let ledger = load_ledger(&config)?;
    let ledger = Arc::new(Throttled::new(
        ledger,
        Duration::from_millis(config.scan.request_delay_ms),
    ));
    let reports = scan_lineages(ledger, origins, &config.scan, config.protocol.protocol_tag).await?;

    println!("\n  Lineages ({}):", reports.len());
    println!("  {}", "-".repeat(80));
    for report in &reports {
        match &report.outcome {
            Ok(trace) => println!("  {}", trace.summary()),
            Err(halted) => println!("  {} | {}", report.origin.short(), halted),
        }
    }
    Ok(())
}

async fn cmd_decode(args: &[String]) -> CliResult {
    let raw: String = arg(args, 0, "hex")?;
    let config = load_config()?;
    let bytes = hex::decode(raw.trim())?;
    match annotation::decode(&bytes, &config.protocol.protocol_tag)? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("\n  No annotation with tag {} found", hex::encode(config.protocol.protocol_tag)),
    }
    Ok(())
}

async fn cmd_demo() -> CliResult {
    println!(
        r#"
╔══════════════════════════════════════════════════════════════╗
║              organism — Full Lifecycle Demo                  ║
║        Spawn + Feed + Reproduce + Death + Trace              ║
╚══════════════════════════════════════════════════════════════╝
"#
    );

    let config = Config::default();
    let tag = config.protocol.protocol_tag;
    let ledger = MemoryLedger::new(tag);
    let builder = TransitionBuilder::new(config.protocol.clone());
    let alice = KeySigner::from_secret("demo-alice");
    let carol = KeySigner::from_secret("demo-carol");

    // Step 1: Fund and spawn
    println!("Step 1: Spawning an organism...");
    println!("{}", "-".repeat(60));
    ledger.mint(alice.identity(), 50_000)?;
    let params = SpawnParams {
        species: 1,
        reward_per_generation: 1_000,
        fee_per_generation: 3_000,
        dust_floor: 546,
        initial_balance: 20_000,
        payload: Payload::from_segments([b"demo".to_vec()])?,
    };
    let funding = ledger.fetch_unspent_outputs(alice.identity())?;
    let built = builder.spawn(&params, &funding, alice.identity())?;
    let tx = finalize(built.transition, &alice)?;
    let origin = submit(&ledger, &tx)?;
    let mut organism = Organism::from_transition(origin, &tx)?;
    println!("  {}", organism.summary());
    ledger.confirm_pending()?;

    // Step 2: Reproduce twice
    println!("\nStep 2: Reproducing...");
    println!("{}", "-".repeat(60));
    for claimer in ["bob", "dave"] {
        let built = builder.reproduce(&organism, &Identity::from(claimer), Payload::empty())?;
        let id = submit(&ledger, &built.transition)?;
        organism = Organism::from_transition(id, &built.transition)?;
        println!("  {} claimed {} | {}", claimer, built.expected.reward, organism.summary());
    }

    // Step 3: Feed
    println!("\nStep 3: Carol feeds the organism...");
    println!("{}", "-".repeat(60));
    ledger.mint(carol.identity(), 10_000)?;
    let funding = ledger.fetch_unspent_outputs(carol.identity())?;
    let built = builder.feed(&organism, 4_000, &funding, carol.identity(), Payload::empty())?;
    let tx = finalize(built.transition, &carol)?;
    let id = submit(&ledger, &tx)?;
    organism = Organism::from_transition(id, &tx)?;
    println!("  {}", organism.summary());
    ledger.confirm_pending()?;

    // Step 4: A cheating spend is refused
    println!("\nStep 4: Attempting to skim the continuation...");
    println!("{}", "-".repeat(60));
    let mut cheat = builder.reproduce(&organism, &"mallory".into(), Payload::empty())?.transition;
    cheat.outputs[0].value -= 500;
    cheat.outputs[2].value += 500;
    match submit(&ledger, &cheat) {
        Ok(_) => println!("  Unexpectedly accepted"),
        Err(e) => println!("  Refused: {}", e),
    }

    // Step 5: Reproduce until death
    println!("\nStep 5: Reproducing until the organism dies...");
    println!("{}", "-".repeat(60));
    loop {
        let built = builder.reproduce(&organism, &"erin".into(), Payload::empty())?;
        let id = submit(&ledger, &built.transition)?;
        match built.expected.lifecycle_after(id) {
            Lifecycle::Alive(next) => {
                println!("  gen {} | balance {}", next.generation(), next.value);
                organism = next;
            }
            Lifecycle::Dead { generation } => {
                println!("  Died at generation {}", generation);
                break;
            }
        }
    }
    ledger.confirm_pending()?;

    // Step 6: Reconstruct the lineage
    println!("\nStep 6: Tracing the lineage...");
    println!("{}", "-".repeat(60));
    let trace = LineageWalker::new(&ledger, tag).trace(origin)?;
    print_trace(&trace);
    trace.check_invariants()?;
    println!("\n  Invariants hold");

    println!("\n  Demo complete!");
    Ok(())
}
