use std::time::{Duration, Instant};

use facet::Facet;
use figue as args;
use lockscope::{Engine, EngineConfig, InstrumentedRwLock, RwlockFlags, RwlockInfo};
use tracing::info;

#[derive(Facet, Debug)]
struct Cli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    /// Worker threads hammering the shared locks.
    #[facet(args::named, default)]
    threads: Option<usize>,
    /// Lock acquisitions per worker.
    #[facet(args::named, default)]
    iterations: Option<usize>,
    /// Microseconds to hold each write lock.
    #[facet(args::named, default)]
    hold_us: Option<u64>,
    /// Print the statistics snapshot as JSON instead of a text report.
    #[facet(args::named, default)]
    json: bool,
}

const DEFAULT_THREADS: usize = 4;
const DEFAULT_ITERATIONS: usize = 10_000;
const DEFAULT_HOLD_US: u64 = 5;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let cli = parse_cli()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = EngineConfig::from_env().map_err(|e| format!("bad environment: {e}"))?;
    let engine = Engine::new(config);

    let mut infos = [
        RwlockInfo::new("LOCK_table_cache")
            .documentation("Guards the open table cache."),
        RwlockInfo::new("LOCK_global_config")
            .flags(RwlockFlags::SINGLETON)
            .documentation("Guards the process-wide configuration."),
        RwlockInfo::new("LOCK_row")
            .flags(RwlockFlags::TIMED_OFF),
    ];
    engine.register("demo", &mut infos);
    let [table_key, config_key, row_key] = infos.map(|info| info.key);

    let threads = cli.threads.unwrap_or(DEFAULT_THREADS).max(1);
    let iterations = cli.iterations.unwrap_or(DEFAULT_ITERATIONS);
    let hold = Duration::from_micros(cli.hold_us.unwrap_or(DEFAULT_HOLD_US));

    let table_cache = InstrumentedRwLock::new(&engine, table_key, Vec::<u64>::new());
    let global_config = InstrumentedRwLock::new(&engine, config_key, 0u64);

    info!(threads, iterations, hold_us = hold.as_micros() as u64, "running workload");
    let started = Instant::now();
    std::thread::scope(|s| {
        for worker in 0..threads {
            let engine = &engine;
            let table_cache = &table_cache;
            let global_config = &global_config;
            s.spawn(move || {
                // Short-lived per-row locks churn through the instance table.
                let row = InstrumentedRwLock::new(engine, row_key, worker);
                for i in 0..iterations {
                    if i % 8 == 0 {
                        let mut cache = table_cache.write();
                        cache.push(i as u64);
                        if !hold.is_zero() {
                            std::thread::sleep(hold);
                        }
                    } else if let Some(cache) = table_cache.try_read() {
                        let _ = cache.len();
                    } else {
                        let _ = table_cache.read().len();
                    }

                    if i % 64 == 0 {
                        let config = global_config.upgradable_read();
                        if *config % 2 == 0 {
                            *config.upgrade() += 1;
                        }
                    } else {
                        let _ = *global_config.read();
                    }

                    let _ = *row.read();
                }
            });
        }
    });
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "workload finished"
    );

    if cli.json {
        let snapshot = engine.snapshot();
        let json = facet_json::to_string(&snapshot)
            .map_err(|e| format!("failed to encode snapshot: {e}"))?;
        println!("{json}");
    } else {
        print!("{}", engine.dump_report());
    }

    drop(table_cache);
    drop(global_config);
    engine.shutdown();
    Ok(())
}

fn parse_cli() -> Result<Cli, String> {
    let figue_config = args::builder::<Cli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("lockscope-demo")
                .description("Runs a contended rwlock workload and prints the wait statistics")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();
    let cli = args::Driver::new(figue_config)
        .run()
        .into_result()
        .map_err(|e| e.to_string())?;
    Ok(cli.value)
}
