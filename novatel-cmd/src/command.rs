use std::io::{stdout, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use novatel::{Commander, EncodeFormat, MessageDatabase};
use tracing::debug;

#[derive(Debug, Clone)]
pub enum Format {
    Ascii,
    Binary,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Ascii, Self::Binary]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Ascii => Some(clap::builder::PossibleValue::new("ascii")),
            Self::Binary => Some(clap::builder::PossibleValue::new("binary")),
        }
    }
}

pub fn encode(db: &Arc<MessageDatabase>, command: &str, format: &Format) -> Result<Vec<u8>> {
    let format = match format {
        Format::Ascii => EncodeFormat::Ascii,
        Format::Binary => EncodeFormat::Binary,
    };
    let encoded = Commander::new(db.clone())
        .encode(command, format)
        .with_context(|| format!("encoding {command:?}"))?;
    debug!(length = encoded.len(), "encoded command");
    Ok(encoded)
}

pub fn command(db: &Arc<MessageDatabase>, command: &str, format: &Format) -> Result<()> {
    let encoded = encode(db, command, format)?;
    let mut out = stdout().lock();
    out.write_all(&encoded).context("writing to stdout")?;
    out.flush().context("flushing stdout")
}
