use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use sweep_runner::status::EpochSummary;
use sweep_runner::submit::job_files;
use sweep_runner::table::parse_column_list;
use sweep_runner::{
    dump_report, epoch_status, extractor_by_name, generate, kill_epoch, load_defaults,
    load_experiment, machine_by_name, parse_epoch, remove_epoch, render, resolve_epoch,
    submit_epoch, summary, sweep_home, ActivityStream, Defaults, EpochStatus, Layout,
    OutputFormat, ParseOptions, Query, SubmitOptions, SweepError, TimeoutPolicy,
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sweep", version, about = "Parameter sweep experiment manager")]
struct Cli {
    /// Debug-level logging unless RUST_LOG is set.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create experiments/{jobs,results,workspaces} under the current base.
    Init {
        #[arg(long)]
        json: bool,
    },
    Generate {
        experiment: PathBuf,
        #[arg(short, long)]
        machine: Option<String>,
        #[arg(long)]
        json: bool,
    },
    Resolve {
        epoch: String,
        #[arg(long)]
        json: bool,
    },
    Status {
        epoch: String,
        #[arg(long)]
        no_timeout: bool,
        /// Wall budget in seconds, replacing the recorded one.
        #[arg(long)]
        wall: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    Summary {
        #[arg(long)]
        no_timeout: bool,
        #[arg(long)]
        json: bool,
    },
    Watch {
        epoch: String,
        /// Poll interval in milliseconds.
        #[arg(long)]
        interval: Option<u64>,
        #[arg(long)]
        no_timeout: bool,
    },
    Parse {
        epoch: String,
        /// Extractor parameters.
        params: Vec<String>,
        #[arg(short, long)]
        parser: Option<String>,
        /// Only lines carrying this tag; untagged lines are tagged `default`.
        #[arg(short, long)]
        tag: Option<String>,
        #[arg(long)]
        agg: bool,
        /// Comma-separated sort keys; prefix a key with ~ for descending.
        #[arg(short, long)]
        sort: Option<String>,
        #[arg(long)]
        select: Option<String>,
        #[arg(short, long)]
        filter: Option<String>,
        #[arg(long)]
        format: Option<String>,
    },
    Submit {
        epoch: String,
        #[arg(short, long)]
        machine: Option<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        stagger: bool,
        #[arg(long)]
        batch: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    Kill {
        epoch: String,
        #[arg(short, long)]
        machine: Option<String>,
        #[arg(long)]
        json: bool,
    },
    Rm {
        epoch: String,
        #[arg(long)]
        json: bool,
    },
    /// Print the first job file of an epoch.
    Sample { epoch: String },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = command_json_mode(&cli.command);
    match run_command(cli.command) {
        Ok(Some(payload)) => emit_json(&payload),
        Ok(None) => {}
        Err(err) => {
            let (code, exit) = match err.downcast_ref::<SweepError>() {
                Some(e) => (e.code(), e.category().exit_code()),
                None => ("command_failed", 1),
            };
            if json_mode {
                emit_json(&json_error(code, err.to_string(), error_details(&err)));
            } else {
                eprintln!("error[{}]: {}", code, err);
            }
            std::process::exit(exit);
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn open_layout() -> Result<Layout> {
    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    let layout = Layout::discover(&cwd);
    debug!(base = %layout.base().display(), "experiment base");
    Ok(layout)
}

fn initialized_layout() -> Result<Layout> {
    let layout = open_layout()?;
    layout.ensure_initialized()?;
    Ok(layout)
}

fn timeout_policy(defaults: &Defaults, command: &str, no_timeout: bool, wall: Option<u64>) -> TimeoutPolicy {
    TimeoutPolicy {
        enabled: !no_timeout && defaults.timeout(command),
        wall_override: wall,
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    let home = sweep_home();
    let defaults = load_defaults(home.as_deref());
    match command {
        Commands::Init { json } => {
            let layout = open_layout()?;
            layout.init()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "init",
                    "root": layout.experiments_root().display().to_string()
                })));
            }
            println!("initialized {}", layout.experiments_root().display());
        }
        Commands::Generate {
            experiment,
            machine,
            json,
        } => {
            let layout = initialized_layout()?;
            let exp = load_experiment(&experiment)?;
            let machine_name = machine.unwrap_or_else(|| defaults.machine("generate"));
            let machine = machine_by_name(&machine_name)?;
            let generated = generate(&layout, &exp, machine.as_ref(), Local::now())?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "generate",
                    "machine": machine_name,
                    "generated": generated
                })));
            }
            println!("{}", generated.epoch);
            eprintln!(
                "{} jobs, {} command instances",
                generated.jobs, generated.commands
            );
        }
        Commands::Resolve { epoch, json } => {
            let layout = initialized_layout()?;
            let resolved = resolve_epoch(&layout, &epoch)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "resolve",
                    "reference": epoch,
                    "epoch": resolved
                })));
            }
            println!("{}", resolved);
        }
        Commands::Status {
            epoch,
            no_timeout,
            wall,
            json,
        } => {
            let layout = initialized_layout()?;
            let epoch = resolve_epoch(&layout, &epoch)?;
            let policy = timeout_policy(&defaults, "status", no_timeout, wall);
            let status = epoch_status(&layout, &epoch, policy, Utc::now())?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "status",
                    "status": status
                })));
            }
            print_status(&status);
        }
        Commands::Summary { no_timeout, json } => {
            let layout = initialized_layout()?;
            let policy = timeout_policy(&defaults, "summary", no_timeout, None);
            let rows = summary(&layout, policy, Utc::now())?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "summary",
                    "epochs": rows
                })));
            }
            print_summary(&rows);
        }
        Commands::Watch {
            epoch,
            interval,
            no_timeout,
        } => {
            let layout = initialized_layout()?;
            let epoch = resolve_epoch(&layout, &epoch)?;
            let policy = timeout_policy(&defaults, "watch", no_timeout, None);
            let interval =
                Duration::from_millis(interval.unwrap_or_else(|| defaults.interval_ms("watch")));
            let mut stream = ActivityStream::new();
            loop {
                let status = epoch_status(&layout, &epoch, policy, Utc::now())?;
                for activity in stream.next_batch(&status) {
                    println!(
                        "{}\t{}\t{}",
                        activity.at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                        activity.state.as_str(),
                        activity.name
                    );
                }
                if status.counts.all_terminal() {
                    eprintln!(
                        "{}: {} done, {} failed of {}",
                        epoch, status.counts.done, status.counts.failed, status.counts.expected
                    );
                    break;
                }
                std::thread::sleep(interval);
            }
        }
        Commands::Parse {
            epoch,
            params,
            parser,
            tag,
            agg,
            sort,
            select,
            filter,
            format,
        } => {
            let layout = initialized_layout()?;
            let epoch = resolve_epoch(&layout, &epoch)?;
            // Reject a bad format before doing any parsing work.
            let format: OutputFormat = format
                .unwrap_or_else(|| defaults.format("parse"))
                .parse()?;
            let parser = parser.unwrap_or_else(|| defaults.parser("parse"));
            let mut extractor = extractor_by_name(&parser, &params, home.as_deref())?;
            let options = ParseOptions {
                tag: tag.as_deref(),
                aggregate: agg || defaults.agg("parse"),
            };
            let report = parse_epoch(&layout, &epoch, extractor.as_mut(), options)?;
            let dumped = dump_report(&layout, &epoch, &report, extractor.as_ref(), &params)?;
            debug!(path = %dumped.display(), "wrote parsed results");
            for failure in &report.failed {
                for reason in &failure.reasons {
                    warn!(file = %failure.file, "{}", reason);
                }
            }
            let query = Query {
                filter,
                order: sort.as_deref().map(parse_column_list).unwrap_or_default(),
                select: select.as_deref().map(parse_column_list).unwrap_or_default(),
            };
            let table = query.apply(&report.table)?;
            print!("{}", render(&table, format)?);
        }
        Commands::Submit {
            epoch,
            machine,
            dry_run,
            force,
            stagger,
            batch,
            json,
        } => {
            let layout = initialized_layout()?;
            let epoch = resolve_epoch(&layout, &epoch)?;
            let machine = machine_by_name(&machine.unwrap_or_else(|| defaults.machine("submit")))?;
            let options = SubmitOptions {
                dry_run,
                force,
                stagger: stagger || defaults.stagger("submit"),
                batch: batch.unwrap_or_else(|| defaults.batch("submit")),
            };
            let outcome = submit_epoch(&layout, &epoch, machine.as_ref(), options)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "submit",
                    "outcome": outcome
                })));
            }
            if dry_run {
                for planned in &outcome.commands {
                    println!("{}", planned.argv.join(" "));
                }
            } else {
                for job in &outcome.submitted {
                    println!("{}\t{}", job.file, job.id);
                }
            }
        }
        Commands::Kill {
            epoch,
            machine,
            json,
        } => {
            let layout = initialized_layout()?;
            let epoch = resolve_epoch(&layout, &epoch)?;
            let machine = machine_by_name(&machine.unwrap_or_else(|| defaults.machine("kill")))?;
            let outcome = kill_epoch(&layout, &epoch, machine.as_ref())?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "kill",
                    "outcome": outcome
                })));
            }
            println!("killed {} of {} jobs", outcome.killed, outcome.requested);
        }
        Commands::Rm { epoch, json } => {
            let layout = initialized_layout()?;
            let epoch = resolve_epoch(&layout, &epoch)?;
            let removed = remove_epoch(&layout, &epoch)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "rm",
                    "removed": removed
                })));
            }
            println!("removed {} ({} files)", removed.epoch, removed.files);
        }
        Commands::Sample { epoch } => {
            let layout = initialized_layout()?;
            let epoch = resolve_epoch(&layout, &epoch)?;
            let first = job_files(&layout, &epoch)?.into_iter().next().ok_or_else(|| {
                SweepError::Validation(format!("epoch {} has no job files", epoch))
            })?;
            let text = fs::read_to_string(&first).map_err(|e| SweepError::io(&first, e))?;
            print!("{}", text);
        }
    }
    Ok(None)
}

fn print_status(status: &EpochStatus) {
    let c = &status.counts;
    println!("epoch: {}", status.epoch);
    match status.wall_seconds {
        Some(wall) => println!("wall: {}s", wall),
        None => println!("wall: none"),
    }
    println!(
        "expected: {}  waiting: {}  started: {}  done: {}  failed: {}",
        c.expected, c.waiting, c.started, c.done, c.failed
    );
    for inst in &status.instances {
        let note = if inst.timed_out { " (timed out)" } else { "" };
        println!("{}\t{}{}", inst.state.as_str(), inst.cmd_id, note);
    }
}

fn print_summary(rows: &[EpochSummary]) {
    println!("epoch\texpected\tdone\tfailed\tstarted\twaiting\tdesc");
    for row in rows {
        let c = &row.counts;
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            row.epoch,
            c.expected,
            c.done,
            c.failed,
            c.started,
            c.waiting,
            row.desc.as_deref().unwrap_or("")
        );
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn error_details(err: &anyhow::Error) -> Value {
    match err.downcast_ref::<SweepError>() {
        Some(SweepError::OutOfRangeReference {
            reference,
            offset,
            available,
        }) => json!({
            "reference": reference,
            "offset": offset,
            "available": available
        }),
        Some(e) => json!({ "category": e.category().as_str() }),
        None => json!({}),
    }
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Init { json }
        | Commands::Generate { json, .. }
        | Commands::Resolve { json, .. }
        | Commands::Status { json, .. }
        | Commands::Summary { json, .. }
        | Commands::Submit { json, .. }
        | Commands::Kill { json, .. }
        | Commands::Rm { json, .. } => *json,
        Commands::Parse { format, .. } => format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("json")),
        Commands::Watch { .. } | Commands::Sample { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_flags_map_to_a_query() {
        let cli = Cli::try_parse_from([
            "sweep", "parse", "HEAD", "a", "b", "-s", "~n,x", "--select", "x, y", "-f", "n > 2",
            "--agg",
        ])
        .expect("parse");
        match cli.command {
            Commands::Parse {
                epoch,
                params,
                sort,
                select,
                filter,
                agg,
                ..
            } => {
                assert_eq!(epoch, "HEAD");
                assert_eq!(params, vec!["a", "b"]);
                assert_eq!(parse_column_list(sort.as_deref().unwrap_or("")), vec!["~n", "x"]);
                assert_eq!(parse_column_list(select.as_deref().unwrap_or("")), vec!["x", "y"]);
                assert_eq!(filter.as_deref(), Some("n > 2"));
                assert!(agg);
            }
            _ => panic!("expected parse"),
        }
    }

    #[test]
    fn json_mode_follows_the_flag() {
        let cli = Cli::try_parse_from(["sweep", "-v", "status", "HEAD~1", "--json"]).expect("status");
        assert!(cli.verbose);
        assert!(command_json_mode(&cli.command));
        let cli = Cli::try_parse_from(["sweep", "parse", "HEAD", "--format", "JSON"]).expect("parse");
        assert!(command_json_mode(&cli.command));
        let cli = Cli::try_parse_from(["sweep", "watch", "HEAD"]).expect("watch");
        assert!(!command_json_mode(&cli.command));
    }

    #[test]
    fn error_envelope_carries_reference_details() {
        let err = anyhow::Error::new(SweepError::OutOfRangeReference {
            reference: "HEAD~9".into(),
            offset: 9,
            available: 2,
        });
        let env = json_error("out_of_range_reference", err.to_string(), error_details(&err));
        assert_eq!(env["ok"], json!(false));
        assert_eq!(env["error"]["details"]["offset"], json!(9));
        assert_eq!(env["error"]["details"]["available"], json!(2));
    }
}
