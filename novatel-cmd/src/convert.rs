use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use novatel::{EncodeFormat, FileParser, Filter, MessageDatabase, ParsedMessage, Parser};
use rayon::prelude::*;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub enum Format {
    Ascii,
    AbbrevAscii,
    Binary,
    FlattenedBinary,
    Json,
}

impl Format {
    pub fn encode_format(&self) -> EncodeFormat {
        match self {
            Self::Ascii => EncodeFormat::Ascii,
            Self::AbbrevAscii => EncodeFormat::AbbrevAscii,
            Self::Binary => EncodeFormat::Binary,
            Self::FlattenedBinary => EncodeFormat::FlattenedBinary,
            Self::Json => EncodeFormat::Json,
        }
    }
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            Self::Ascii,
            Self::AbbrevAscii,
            Self::Binary,
            Self::FlattenedBinary,
            Self::Json,
        ]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Ascii => Some(clap::builder::PossibleValue::new("ascii")),
            Self::AbbrevAscii => Some(clap::builder::PossibleValue::new("abbrev-ascii")),
            Self::Binary => Some(clap::builder::PossibleValue::new("binary")),
            Self::FlattenedBinary => Some(clap::builder::PossibleValue::new("flattened-binary")),
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
        }
    }
}

pub struct Options {
    pub format: Format,
    pub filter: Filter,
    pub clobber: bool,
    pub json_input: bool,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub messages: usize,
    pub passthrough: usize,
    pub unknown_bytes: usize,
}

fn default_output(input: &Path, format: &Format) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".");
    name.push(format.encode_format().to_string());
    PathBuf::from(name)
}

fn unknown_output(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".UNKNOWN");
    PathBuf::from(name)
}

fn create(path: &Path, clobber: bool) -> Result<BufWriter<File>> {
    if !clobber && path.exists() {
        bail!("{path:?} exists; use --clobber");
    }
    let file = File::create(path).with_context(|| format!("failed to create output {path:?}"))?;
    Ok(BufWriter::new(file))
}

/// Convert a single input, returning what was written.
pub fn convert_file(
    db: &Arc<MessageDatabase>,
    input: &Path,
    output: &Path,
    opts: &Options,
) -> Result<Summary> {
    let src = BufReader::new(File::open(input).with_context(|| format!("opening {input:?}"))?);
    let mut dest = create(output, opts.clobber)?;
    let unknown_path = unknown_output(output);
    let mut unknown = create(&unknown_path, opts.clobber)?;

    let parser = Parser::new(db.clone())
        .with_encode_format(opts.format.encode_format())
        .with_filter(opts.filter.clone())
        .with_frame_json(opts.json_input);

    let mut summary = Summary::default();
    for msg in FileParser::new(src, parser) {
        let msg = msg.with_context(|| format!("converting {input:?}"))?;
        match &msg {
            ParsedMessage::Encoded { message, .. } => {
                summary.messages += 1;
                dest.write_all(message)?;
            }
            ParsedMessage::Raw { message, .. } => {
                summary.passthrough += 1;
                dest.write_all(message)?;
            }
            ParsedMessage::Unknown(bytes) => {
                summary.unknown_bytes += bytes.len();
                unknown.write_all(bytes)?;
            }
        }
    }
    dest.flush().context("flushing output")?;
    unknown.flush().context("flushing unknown output")?;

    debug!("{input:?}: {summary:?}");
    Ok(summary)
}

pub fn convert(db: &Arc<MessageDatabase>, inputs: &[PathBuf], opts: &Options) -> Result<()> {
    let results: Vec<Result<(PathBuf, Summary)>> = inputs
        .par_iter()
        .map(|input| {
            let output = opts
                .output
                .clone()
                .unwrap_or_else(|| default_output(input, &opts.format));
            convert_file(db, input, &output, opts).map(|summary| (output, summary))
        })
        .collect();

    for (input, result) in inputs.iter().zip(results) {
        let (output, summary) = result?;
        info!(
            messages = summary.messages,
            passthrough = summary.passthrough,
            unknown_bytes = summary.unknown_bytes,
            "{input:?} -> {output:?}"
        );
    }
    Ok(())
}
