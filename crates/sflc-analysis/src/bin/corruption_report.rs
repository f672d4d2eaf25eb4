//! corruption-report: evaluate a directory of trial records and print the
//! cross-trial corruption report.
//!
//! Settings come from defaults, then `--config`, then `SFLC_*` environment
//! variables, then the command line; later sources win.

use std::ffi::OsString;
use std::path::PathBuf;

use sflc_analysis::logging::{LogGuard, init_logging, init_terminal_logging};
use sflc_analysis::settings::{ExperimentSettings, SeriesMode};
use sflc_analysis::{CorruptionReport, run_batch};
use sflc_error::SliceError;

fn main() {
    let exit_code = run_cli(std::env::args_os());
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn print_help() {
    let text = "\
corruption-report: hidden-volume slice corruption across trials

USAGE:
    corruption-report [OPTIONS]

OPTIONS:
    --config <path>         JSON settings file (missing keys take defaults)
    --results-dir <dir>     Directory holding results<k>.txt [default: .]
    --trials <n>            Number of trials, read as 1..=n [default: 30]
    --rounds <n>            Rounds per trial [default: most common count]
    --total-slices <n>      Device size in slices [default: 890]
    --per-round             Report independent per-round means
    --cumulative            Report running totals of the means [default]
    --json                  Print the report as JSON instead of Markdown
    --log-dir <dir>         Also write analysis.log.jsonl into <dir>
    --verbose               Lower the log filter to trace
    -h, --help              Print this help

ENVIRONMENT:
    SFLC_TOTAL_SLICES, SFLC_ROUNDS, SFLC_TRIALS override the config file.
    RUST_LOG overrides the log filter.
";
    println!("{text}");
}

#[derive(Debug, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    results_dir: Option<PathBuf>,
    trials: Option<usize>,
    rounds: Option<usize>,
    total_slices: Option<u32>,
    series_mode: Option<SeriesMode>,
    json: bool,
    log_dir: Option<PathBuf>,
    verbose: bool,
}

fn run_cli<I>(os_args: I) -> i32
where
    I: IntoIterator<Item = OsString>,
{
    let raw: Vec<String> = os_args
        .into_iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    let tail = if raw.len() > 1 { &raw[1..] } else { &[] };

    if tail.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return 0;
    }

    let args = match parse_args(tail) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("error: {msg}");
            return 2;
        }
    };

    match run(&args) {
        Ok(output) => {
            print!("{output}");
            0
        }
        Err(err) => {
            eprintln!("error: {err}");
            if let Some(hint) = err.suggestion() {
                eprintln!("hint: {hint}");
            }
            err.exit_code()
        }
    }
}

fn parse_args(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut i = 0;
    while i < argv.len() {
        match argv[i].as_str() {
            "--config" => args.config = Some(PathBuf::from(value(argv, &mut i)?)),
            "--results-dir" => args.results_dir = Some(PathBuf::from(value(argv, &mut i)?)),
            "--trials" => args.trials = Some(number(argv, &mut i)?),
            "--rounds" => args.rounds = Some(number(argv, &mut i)?),
            "--total-slices" => args.total_slices = Some(number(argv, &mut i)?),
            "--per-round" => args.series_mode = Some(SeriesMode::PerRound),
            "--cumulative" => args.series_mode = Some(SeriesMode::Cumulative),
            "--json" => args.json = true,
            "--log-dir" => args.log_dir = Some(PathBuf::from(value(argv, &mut i)?)),
            "--verbose" | "-v" => args.verbose = true,
            other => return Err(format!("unknown option `{other}`")),
        }
        i += 1;
    }
    Ok(args)
}

fn value<'a>(argv: &'a [String], i: &mut usize) -> Result<&'a str, String> {
    let flag = &argv[*i];
    *i += 1;
    argv.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires an argument"))
}

fn number<T: std::str::FromStr>(argv: &[String], i: &mut usize) -> Result<T, String> {
    let flag = argv[*i].clone();
    let raw = value(argv, i)?;
    raw.parse()
        .map_err(|_| format!("invalid integer for {flag}: `{raw}`"))
}

fn resolve_settings(args: &CliArgs) -> Result<ExperimentSettings, SliceError> {
    let mut settings = match &args.config {
        Some(path) => ExperimentSettings::load(path)?,
        None => ExperimentSettings::default(),
    };
    settings.apply_env_overrides()?;

    if let Some(dir) = &args.results_dir {
        settings.results_dir.clone_from(dir);
    }
    if let Some(n) = args.trials {
        settings.n_trials = n;
    }
    if let Some(n) = args.rounds {
        settings.n_rounds = Some(n);
    }
    if let Some(n) = args.total_slices {
        settings.total_slices = n;
    }
    if let Some(mode) = args.series_mode {
        settings.series_mode = mode;
    }
    settings.validate()?;
    Ok(settings)
}

fn run(args: &CliArgs) -> Result<String, SliceError> {
    let _guard: Option<LogGuard> = match &args.log_dir {
        Some(dir) => Some(init_logging(dir, args.verbose)?),
        None => {
            init_terminal_logging(args.verbose)?;
            None
        }
    };

    let settings = resolve_settings(args)?;
    tracing::info!(
        results_dir = %settings.results_dir.display(),
        trials = settings.n_trials,
        total_slices = settings.total_slices,
        "starting analysis"
    );

    let batch = run_batch(&settings)?;
    let report = CorruptionReport::from_batch(&settings, &batch);
    if args.json {
        let mut json = report.to_pretty_json()?;
        json.push('\n');
        Ok(json)
    } else {
        Ok(report.render_markdown())
    }
}
