mod command;
mod convert;
mod frame;
mod info;

use std::io::stderr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use novatel::{Filter, HeaderFormat, MeasurementSource, MessageDatabase, TimeStatus};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert NovAtel logs to another message format.
    ///
    /// Each input is written to its own output. Bytes that are not part of any message are
    /// written to a second file with the same name plus .UNKNOWN. Multiple inputs are
    /// converted in parallel.
    Convert {
        /// Message database JSON file.
        #[arg(short, long, env = "NOVATEL_DB", value_name = "path")]
        db: PathBuf,

        /// Output message format.
        #[arg(short, long, default_value = "ascii")]
        format: convert::Format,

        /// Only include these message ids or id ranges.
        ///
        /// This accepts a CSV of ids as well as ranges of the format <start>-<end> where
        /// start and end are inclusive, e.g., --include-ids 42,43,1400-1500
        #[arg(long, value_name = "csv", value_delimiter = ',', conflicts_with = "exclude_ids")]
        include_ids: Vec<String>,

        /// Drop these message ids or id ranges.
        #[arg(long, value_name = "csv", value_delimiter = ',')]
        exclude_ids: Vec<String>,

        /// Only include messages with these names, e.g., BESTPOS,RANGE
        #[arg(long, value_name = "csv", value_delimiter = ',')]
        include_names: Vec<String>,

        /// Only include messages with these time statuses, e.g., FINESTEERING,FINE
        #[arg(long, value_name = "csv", value_delimiter = ',', value_parser = parse_time_status)]
        time_status: Vec<TimeStatus>,

        /// Drop messages before this GPS time.
        #[arg(short, long, value_parser = parse_gps_time, value_name = "week:seconds")]
        after: Option<(u16, f64)>,

        /// Drop messages after this GPS time.
        #[arg(short, long, value_parser = parse_gps_time, value_name = "week:seconds")]
        before: Option<(u16, f64)>,

        /// Only include messages whose time is a multiple of this period.
        #[arg(long, value_name = "seconds")]
        decimate: Option<f64>,

        /// Pass NMEA sentences through unchanged.
        #[arg(long, action)]
        nmea: bool,

        /// Decode JSON messages in the input. Off by default since `{` is common in other data.
        #[arg(long, action)]
        json_input: bool,

        /// Delete output files if they already exist
        #[arg(long, action)]
        clobber: bool,

        /// Output file path. Only valid with a single input; by default the output is the
        /// input path with the format name appended.
        #[arg(short, long, value_name = "path")]
        output: Option<PathBuf>,

        /// Input log files.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Show which message formats a log contains.
    ///
    /// Only framing is performed, so no message database is needed.
    Frame {
        /// Input log file.
        input: PathBuf,

        /// Write JSON rather than text.
        #[arg(long, action)]
        json: bool,
    },
    /// Show the messages in a log and their time range.
    Info {
        /// Message database JSON file.
        #[arg(short, long, env = "NOVATEL_DB", value_name = "path")]
        db: PathBuf,

        /// Input log file.
        input: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: info::Format,

        /// Decode JSON messages in the input.
        #[arg(long, action)]
        json_input: bool,
    },
    /// Encode a receiver command, e.g., "LOG THISPORT BESTPOSA ONCE", and write it to stdout.
    Command {
        /// Message database JSON file.
        #[arg(short, long, env = "NOVATEL_DB", value_name = "path")]
        db: PathBuf,

        /// Command encoding.
        #[arg(short, long, default_value = "ascii")]
        format: command::Format,

        /// Command text as typed at the receiver console.
        command: String,
    },
}

fn parse_number_ranges(list: &[String]) -> Result<Vec<u16>> {
    let rx = regex::Regex::new(r"^(?:(\d+)|(\d+)-(\d+))$").expect("regex to compile");
    let mut values = Vec::default();
    for (i, s) in list.iter().enumerate() {
        let Some(cap) = rx.captures(s.trim()) else {
            bail!("invalid id or range {s:?}");
        };

        if cap.get(1).is_some() {
            let x = cap[1]
                .parse::<u16>()
                .map_err(|_| anyhow!("invalid id at {i}"))?;
            values.push(x);
        } else {
            let start = cap[2]
                .parse::<u16>()
                .map_err(|_| anyhow!("invalid range start at {i}"))?;
            let end = cap[3]
                .parse::<u16>()
                .map_err(|_| anyhow!("invalid range end at {i}"))?;
            if start >= end {
                bail!("invalid range {s:?}")
            }
            values.extend(start..=end);
        }
    }

    Ok(values)
}

fn parse_gps_time(s: &str) -> Result<(u16, f64), String> {
    let Some((week, seconds)) = s.split_once(':') else {
        return Err("expected <week>:<seconds>".to_string());
    };
    let week = week.parse::<u16>().map_err(|e| format!("invalid week: {e}"))?;
    let seconds = seconds
        .parse::<f64>()
        .map_err(|e| format!("invalid seconds: {e}"))?;
    Ok((week, seconds))
}

fn parse_time_status(s: &str) -> Result<TimeStatus, String> {
    s.parse::<TimeStatus>().map_err(|e| e.to_string())
}

fn load_db(path: &Path) -> Result<Arc<MessageDatabase>> {
    let db = MessageDatabase::from_file(path)
        .with_context(|| format!("loading message database {path:?}"))?;
    debug!(
        messages = db.messages().len(),
        enums = db.enums().len(),
        "loaded {path:?}"
    );
    Ok(Arc::new(db))
}

const SOURCES: [MeasurementSource; 2] = [MeasurementSource::Primary, MeasurementSource::Secondary];

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("NOVATEL_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Convert {
            db,
            format,
            include_ids,
            exclude_ids,
            include_names,
            time_status,
            after,
            before,
            decimate,
            nmea,
            json_input,
            clobber,
            output,
            inputs,
        } => {
            if output.is_some() && inputs.len() > 1 {
                bail!("--output can only be used with a single input");
            }

            let mut filter = Filter::new().with_nmea(*nmea);
            let (ids, invert) = if exclude_ids.is_empty() {
                (parse_number_ranges(include_ids)?, false)
            } else {
                (parse_number_ranges(exclude_ids)?, true)
            };
            for id in ids {
                for source in SOURCES {
                    filter.include_message_id(id, HeaderFormat::All, source);
                }
            }
            filter.invert_message_id_filter(invert);
            for name in include_names {
                for source in SOURCES {
                    filter.include_message_name(name.trim(), HeaderFormat::All, source);
                }
            }
            filter.include_time_statuses(time_status.iter().copied());
            if let Some((week, seconds)) = after {
                filter.set_include_lower_time_bound(*week, *seconds);
            }
            if let Some((week, seconds)) = before {
                filter.set_include_upper_time_bound(*week, *seconds);
            }
            if let Some(period) = decimate {
                if *period <= 0.0 {
                    bail!("--decimate must be positive");
                }
                filter.set_include_decimation(*period);
            }
            debug!("filter: {filter:?}");

            let db = load_db(db)?;
            info!("converting {} input(s) to {}", inputs.len(), format.encode_format());
            convert::convert(
                &db,
                inputs,
                &convert::Options {
                    format: format.clone(),
                    filter,
                    clobber: *clobber,
                    json_input: *json_input,
                    output: output.clone(),
                },
            )
        }
        Commands::Frame { input, json } => frame::frame(input, *json),
        Commands::Info {
            db,
            input,
            format,
            json_input,
        } => info::info(&load_db(db)?, input, format, *json_input),
        Commands::Command { db, format, command } => {
            command::command(&load_db(db)?, command, format)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number_ranges() {
        let list = vec!["42".to_string(), "1460-1462".to_string()];
        assert_eq!(parse_number_ranges(&list).unwrap(), vec![42, 1460, 1461, 1462]);

        assert!(parse_number_ranges(&["5-1".to_string()]).is_err());
        assert!(parse_number_ranges(&["BESTPOS".to_string()]).is_err());
        assert!(parse_number_ranges(&["70000".to_string()]).is_err());
    }

    #[test]
    fn test_parse_gps_time() {
        assert_eq!(parse_gps_time("2163:329760.5"), Ok((2163, 329_760.5)));
        assert!(parse_gps_time("2163").is_err());
        assert!(parse_gps_time("week:1").is_err());
    }
}
