use std::cmp;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{stdout, BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use handlebars::handlebars_helper;
use hifitime::{Duration, Epoch};
use novatel::{FileParser, MessageDatabase, MetaData, Parser};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

#[derive(Default, Debug, Clone, Serialize)]
struct Summary {
    total_messages: usize,
    first_message_time: Option<Epoch>,
    last_message_time: Option<Epoch>,
    duration: Duration,
}

impl Summary {
    fn add(&mut self, meta: &MetaData) {
        self.total_messages += 1;
        // Messages without a GPS time carry week 0.
        if meta.week == 0 {
            return;
        }
        let epoch = meta.epoch();
        let first = self
            .first_message_time
            .map_or(epoch, |cur| cmp::min(epoch, cur));
        let last = self
            .last_message_time
            .map_or(epoch, |cur| cmp::max(epoch, cur));
        self.first_message_time = Some(first);
        self.last_message_time = Some(last);
        self.duration = last - first;
    }
}

#[derive(Debug, Clone, Serialize)]
struct Info {
    filename: String,
    summary: Summary,
    messages: BTreeMap<String, Summary>,
}

fn summarize<R: Read>(
    db: &Arc<MessageDatabase>,
    src: R,
    filename: String,
    json_input: bool,
) -> Result<Info> {
    let parser = Parser::new(db.clone()).with_frame_json(json_input);
    let mut reader = FileParser::new(src, parser);
    let mut summary = Summary::default();
    let mut messages: BTreeMap<String, Summary> = BTreeMap::default();

    while let Some(msg) = reader.read_intermediate().context("decoding input")? {
        debug!(
            name = %msg.meta.message_name,
            week = msg.meta.week,
            milliseconds = msg.meta.milliseconds,
            "message"
        );
        summary.add(&msg.meta);
        messages
            .entry(msg.meta.message_name.clone())
            .or_default()
            .add(&msg.meta);
    }

    Ok(Info {
        filename,
        summary,
        messages,
    })
}

pub fn info(
    db: &Arc<MessageDatabase>,
    fpath: &Path,
    format: &Format,
    json_input: bool,
) -> Result<()> {
    let src = BufReader::new(File::open(fpath).context("opening input")?);
    let info = summarize(db, src, fpath.to_string_lossy().to_string(), json_input)?;

    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), &info).context("serializing to json")
        }
        Format::Text => {
            let data = render_text(&info).context("serializing info")?;
            stdout()
                .write_all(str::as_bytes(&data))
                .context("writing to stdout")
        }
    }
}

fn render_text(info: &Info) -> Result<String> {
    handlebars_helper!(left_pad: |num: u64, v: Json| {
        let v = match v {
            serde_json::Value::String(s) => s.to_owned(),
            serde_json::Value::Null => String::new(),
            _ => v.to_string()
        };
        let num = usize::try_from(num).unwrap_or_default().max(v.len());
        format!("{v:>num$}")
    });
    let mut hb = handlebars::Handlebars::new();
    hb.register_helper("lpad", Box::new(left_pad));
    hb.register_template_string("info", TEXT_TEMPLATE)
        .context("registering template")?;

    hb.render("info", &info).context("rendering text")
}

const TEXT_TEMPLATE: &str = r"{{ filename }}
===============================================================================================
First:    {{ summary.first_message_time }}
Last:     {{ summary.last_message_time }}
Duration: {{ summary.duration }}
Messages: {{ #each messages }}{{ @key }}{{ #if @last }}{{ else }}, {{ /if }}{{ /each }}
Count:    {{ summary.total_messages }}
-----------------------------------------------------------------------------------------------
Message               First                              Last                             Count
-----------------------------------------------------------------------------------------------
{{ #each messages }}{{ lpad 20 @key }}  {{ lpad 33 first_message_time }}  {{ lpad 33 last_message_time }}  {{ lpad 6 total_messages }}
{{/each }}
";
