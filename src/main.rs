use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use strata::config::CoreConfig;
use strata::sql::parse_properties;

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} props <property-string>      parse a connection property string and print it as JSON\n  {program} kv-info [--config <file>]      open the configured key-value store and print its capabilities\n  {program} sweep [--config <file>]        remove expired key-value entries now\n\nEnvironment:\n  STRATA_CONFIG                            configuration file used when --config is absent\n  STRATA_*                                 overrides, see CoreConfig::apply_overrides\n  RUST_LOG                                 log filter (default: info)"
    );
}

fn load_config(args: &[String]) -> anyhow::Result<CoreConfig> {
    let mut path: Option<PathBuf> = std::env::var("STRATA_CONFIG").ok().map(PathBuf::from);
    let mut it = args.iter();
    while let Some(a) = it.next() {
        match a.as_str() {
            "--config" | "-c" => path = Some(PathBuf::from(it.next().context("--config needs a file")?)),
            other => bail!("unknown argument {:?}", other),
        }
    }
    match path {
        Some(p) => CoreConfig::load(&p),
        None => {
            let mut cfg = CoreConfig::default();
            cfg.apply_env()?;
            Ok(cfg)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let mut args: Vec<String> = std::env::args().collect();
    let program = if args.is_empty() { "strata".to_string() } else { args.remove(0) };
    let Some(cmd) = args.first().cloned() else {
        print_usage(&program);
        std::process::exit(2);
    };
    let rest = &args[1..];

    match cmd.as_str() {
        "props" => {
            let Some(raw) = rest.first() else { bail!("props needs a property string") };
            let map = parse_properties(raw)?;
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        "kv-info" => {
            let cfg = load_config(rest)?;
            let kv = cfg.open_kv()?;
            let caps = kv.capabilities();
            let keys = kv.keys("")?.len();
            println!("{}", serde_json::json!({ "name": kv.name(), "backend": cfg.kv.backend, "capabilities": caps, "keys": keys }));
        }
        "sweep" => {
            let cfg = load_config(rest)?;
            // blocking engine calls stay off the async workers
            let removed = tokio::task::spawn_blocking(move || -> anyhow::Result<usize> { Ok(cfg.open_kv()?.purge_expired()?) }).await??;
            info!(target: "strata", "sweep removed {} expired entries", removed);
            println!("{}", removed);
        }
        "-h" | "--help" | "help" => print_usage(&program),
        other => {
            print_usage(&program);
            bail!("unknown command {:?}", other);
        }
    }
    Ok(())
}
