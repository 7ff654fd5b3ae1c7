use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use fs_sandbox::{
    CacheConfig, DeleteOptions, Encoding, ListOptions, ReadOptions, SandboxConfig, SandboxFs,
    SearchOptions, WriteOptions,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{dispatcher, info, warn};
use tracing_subscriber::prelude::*;

const USAGE: &str = "usage: fsctl <command> [args]\n\
commands:\n  \
  list <dir> [--stats]\n  \
  read <file> [--base64|--binary] [--refresh]\n  \
  write <file> <content>\n  \
  delete <path> [--recursive] [--backup]\n  \
  stat <path>\n  \
  search <pattern> [dir] [--regex] [--flat] [--case-sensitive]\n  \
  cd <dir>\n  \
  pwd | log [limit] | stats | clear-cache\n\
Without a command, commands are read from stdin one per line.";

fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let mut sandbox = SandboxFs::new(load_config()?);
    info!(root = %sandbox.root().display(), "sandbox ready");

    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(args.first().map(String::as_str), Some("-h" | "--help")) {
        println!("{USAGE}");
        return Ok(());
    }
    if !args.is_empty() {
        let output = run(&mut sandbox, &args)?;
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line?;
        let words: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if words.is_empty() {
            continue;
        }
        let output = match run(&mut sandbox, &words) {
            Ok(value) => value,
            Err(err) => {
                warn!(command = %line, error = %err, "command failed");
                json!({ "error": err.to_string() })
            }
        };
        writeln!(stdout, "{}", serde_json::to_string(&output)?)?;
    }
    Ok(())
}

fn run(sandbox: &mut SandboxFs, args: &[String]) -> anyhow::Result<Value> {
    let (command, rest) = args.split_first().ok_or_else(|| anyhow!(USAGE))?;
    let flags: Vec<&str> = rest
        .iter()
        .map(String::as_str)
        .filter(|arg| arg.starts_with("--"))
        .collect();
    let positional: Vec<&str> = rest
        .iter()
        .map(String::as_str)
        .filter(|arg| !arg.starts_with("--"))
        .collect();
    let has = |flag: &str| flags.contains(&flag);
    let arg = |idx: usize, name: &str| {
        positional
            .get(idx)
            .copied()
            .ok_or_else(|| anyhow!("missing <{name}>\n{USAGE}"))
    };

    match command.as_str() {
        "list" | "ls" => {
            let dir = positional.first().copied().unwrap_or(".");
            let options = ListOptions {
                with_stats: has("--stats"),
            };
            to_json(sandbox.list(dir, &options)?)
        }
        "read" | "cat" => {
            let encoding = if has("--base64") {
                Encoding::Base64
            } else if has("--binary") {
                Encoding::Binary
            } else {
                Encoding::Utf8
            };
            let options = ReadOptions {
                encoding,
                force_refresh: has("--refresh"),
            };
            to_json(sandbox.read(arg(0, "file")?, &options)?)
        }
        "write" => {
            let content = positional.get(1..).unwrap_or_default().join(" ");
            to_json(sandbox.write(arg(0, "file")?, content, &WriteOptions::default())?)
        }
        "delete" | "rm" => {
            let options = DeleteOptions {
                recursive: has("--recursive"),
                backup: has("--backup"),
            };
            to_json(sandbox.delete(arg(0, "path")?, &options)?)
        }
        "stat" => to_json(sandbox.stat(arg(0, "path")?)?),
        "search" | "find" => {
            let pattern = arg(0, "pattern")?;
            let dir = positional.get(1).copied().unwrap_or(".");
            let mut options = if has("--regex") {
                SearchOptions::regex()
            } else {
                SearchOptions::default()
            };
            options = options
                .with_recursive(!has("--flat"))
                .with_case_sensitive(has("--case-sensitive"));
            to_json(sandbox.search(pattern, dir, &options)?)
        }
        "cd" => {
            let (scoped, change) = sandbox.change_root(arg(0, "dir")?)?;
            *sandbox = scoped;
            to_json(change)
        }
        "pwd" => to_json(sandbox.current_directory()),
        "log" => {
            let limit = match positional.first() {
                Some(raw) => raw.parse().context("limit must be a number")?,
                None => 100,
            };
            to_json(sandbox.operation_log(limit))
        }
        "stats" => to_json(sandbox.cache_stats()),
        "clear-cache" => Ok(json!({ "cleared": sandbox.clear_cache() })),
        other => bail!("unknown command '{other}'\n{USAGE}"),
    }
}

fn to_json(value: impl Serialize) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn init_tracing() -> anyhow::Result<()> {
    if dispatcher::has_been_set() {
        return Ok(());
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

fn load_config() -> anyhow::Result<SandboxConfig> {
    let mut cache = CacheConfig::content_aware();
    if let Some(max_bytes) = env_parse::<usize>("SANDBOX_CACHE_MAX_BYTES")? {
        cache = cache.with_max_bytes(max_bytes);
    }
    if let Some(max_entries) = env_parse::<usize>("SANDBOX_CACHE_MAX_ENTRIES")? {
        cache = cache.with_max_entries(max_entries);
    }
    if let Some(ttl_secs) = env_parse::<u64>("SANDBOX_CACHE_TTL_SECS")? {
        cache = cache.with_ttl(Duration::from_secs(ttl_secs));
    }

    let mut config = SandboxConfig::new(sandbox_root()?)?.with_cache(cache);
    if let Some(max_size) = env_parse::<u64>("SANDBOX_MAX_FILE_SIZE")? {
        config = config.with_max_file_size(max_size);
    }
    if let Some(enabled) = env_parse::<bool>("SANDBOX_CACHE_ENABLED")? {
        config = config.with_cache_enabled(enabled);
    }
    if let Some(capacity) = env_parse::<usize>("SANDBOX_AUDIT_CAPACITY")? {
        config = config.with_audit_capacity(capacity);
    }
    if let Ok(raw) = std::env::var("SANDBOX_SEARCH_SKIP") {
        config = config.with_search_skip_dirs(raw.split(',').map(str::to_string));
    }
    Ok(config)
}

fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow!("invalid {key} value '{raw}': {err}")),
        Err(_) => Ok(None),
    }
}

fn sandbox_root() -> anyhow::Result<PathBuf> {
    let raw = std::env::var("SANDBOX_ROOT").unwrap_or_else(|_| "./data/sandbox".to_string());
    let path = PathBuf::from(&raw);
    if path.is_absolute() {
        Ok(path)
    } else {
        let cwd = std::env::current_dir()?;
        Ok(cwd.join(path))
    }
}
