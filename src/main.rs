use std::fs;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use coldraid::config::Config;
use coldraid::engine::Counters;
use coldraid::logging::{self, EventLog};
use coldraid::rehash;
use coldraid::state::State;
use coldraid::CoreError;

mod cli;

use cli::{Cli, Command, ScanRange};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_operational_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            let code = err
                .downcast_ref::<CoreError>()
                .map(CoreError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn open_event_log(cli: &Cli) -> anyhow::Result<EventLog> {
    let file = match &cli.log {
        Some(path) => Some(
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?,
        ),
        None => None,
    };
    Ok(EventLog::new(Box::new(std::io::stdout()), file))
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let text = fs::read_to_string(&cli.conf).with_context(|| format!("reading {}", cli.conf.display()))?;
    Config::parse(&cli.conf, &text).map_err(|errs| {
        let joined = errs.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n");
        anyhow::anyhow!("invalid configuration:\n{joined}")
    })
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let mut events = open_event_log(cli)?;

    match &cli.command {
        Command::Diff => {
            let mut state = State::open(config).map_err(anyhow::Error::from)?;
            let before = state.blockmax;
            state.rescan().map_err(anyhow::Error::from)?;
            println!("columns before: {before}, columns after rescan: {}", state.blockmax);
            Ok(())
        }
        Command::Sync { force_empty } => {
            let mut state = State::open(config).map_err(anyhow::Error::from)?;
            if state.config.disks.is_empty() && !force_empty {
                anyhow::bail!("refusing to sync an array with no configured disks (pass --force-empty to override)");
            }
            state.rescan().map_err(anyhow::Error::from)?;
            state.sync_parity().map_err(anyhow::Error::from)?;
            state.save().map_err(anyhow::Error::from)?;
            println!("status:sync_complete:{}", state.blockmax);
            Ok(())
        }
        Command::Check(range) => run_scan(config, range, false, &mut events),
        Command::Fix(range) => run_scan(config, range, true, &mut events),
        Command::Scrub(range) => run_scan(config, range, true, &mut events),
        Command::Status => {
            let state = State::open(config).map_err(anyhow::Error::from)?;
            println!(
                "status:disks={}:parities={}:blockmax={}",
                state.disks.len(),
                state.parities.len(),
                state.blockmax
            );
            Ok(())
        }
        Command::Dup => {
            let state = State::open(config).map_err(anyhow::Error::from)?;
            let mut seen = std::collections::HashMap::new();
            for disk in &state.disks {
                for file in &disk.files {
                    for block in &file.blocks {
                        if block.is_real_hash() {
                            seen.entry(block.hash).or_insert_with(Vec::new).push(file.subpath.clone());
                        }
                    }
                }
            }
            for (_, paths) in seen.into_iter().filter(|(_, v)| v.len() > 1) {
                println!("{}", paths.join(" == "));
            }
            Ok(())
        }
        Command::List => {
            let state = State::open(config).map_err(anyhow::Error::from)?;
            for disk in &state.disks {
                for file in &disk.files {
                    let mtime = chrono::DateTime::from_timestamp(file.mtime_sec, 0)
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "unknown".into());
                    println!("{}:{}:{}:{}", disk.name, file.subpath, file.size, mtime);
                }
            }
            Ok(())
        }
        Command::Pool => {
            println!("status:pool_not_configured");
            Ok(())
        }
        Command::Rehash { kind } => {
            let mut state = State::open(config).map_err(anyhow::Error::from)?;
            let new_kind = (*kind).into();
            let next = rehash::start(&state.hash, &mut state.prev_hash, new_kind, rand_seed(), &mut state.info)
                .map_err(|e| anyhow::anyhow!("{e:?}"))?;
            state.hash = next;
            state.save().map_err(anyhow::Error::from)?;
            println!("status:rehash_started");
            Ok(())
        }
    }
}

fn rand_seed() -> [u8; 16] {
    use rand::RngCore;
    let mut seed = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut seed);
    seed
}

fn run_scan(config: Config, range: &ScanRange, fix: bool, events: &mut EventLog) -> anyhow::Result<()> {
    let mut state = State::open(config).map_err(anyhow::Error::from)?;
    let mut counters = Counters::default();
    let effective_fix = fix && !range.audit_only;

    let import = match &range.import {
        Some(dir) => Some(
            coldraid::import::build_from_dir(dir, state.block_size, &state.hash, state.prev_hash.as_ref())
                .map_err(anyhow::Error::from)?,
        ),
        None => None,
    };

    let end = if range.count == 0 {
        state.blockmax
    } else {
        (range.start + range.count).min(state.blockmax)
    };

    for pos in range.start..end {
        state
            .run_stripe(pos, effective_fix, import.as_ref(), events, &mut counters)
            .map_err(anyhow::Error::from)?;
    }

    state
        .finalize_fix_pass(effective_fix, events, &mut counters)
        .map_err(anyhow::Error::from)?;
    state
        .recreate_special_files(effective_fix, events, &mut counters)
        .map_err(anyhow::Error::from)?;

    println!(
        "status:error={}:recovered={}:unrecoverable={}",
        counters.error, counters.recovered_error, counters.unrecoverable_error
    );

    if !fix {
        return Ok(());
    }
    state.save().map_err(anyhow::Error::from)
}
