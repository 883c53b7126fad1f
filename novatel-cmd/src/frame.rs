use std::collections::BTreeMap;
use std::fs::File;
use std::io::{stdout, BufReader, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use handlebars::handlebars_helper;
use novatel::format::MAX_ASCII_MESSAGE_LENGTH;
use novatel::{FrameStatus, Framer, MetaData};
use serde::Serialize;
use tracing::debug;

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize)]
struct Summary {
    count: usize,
    bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
struct Info {
    filename: String,
    total_bytes: usize,
    unknown: Summary,
    formats: BTreeMap<String, Summary>,
}

fn drain(framer: &mut Framer, buf: &mut Vec<u8>, info: &mut Info) {
    loop {
        let mut meta = MetaData::new();
        match framer.get_frame(buf, &mut meta) {
            FrameStatus::Success => {
                let sum = info.formats.entry(meta.format.to_string()).or_default();
                sum.count += 1;
                sum.bytes += meta.length;
            }
            FrameStatus::Unknown => {
                info.unknown.count += 1;
                info.unknown.bytes += meta.length;
            }
            FrameStatus::BufferFull => {
                debug!(length = meta.length, "growing frame buffer");
                buf.resize(meta.length, 0);
            }
            FrameStatus::Incomplete | FrameStatus::BufferEmpty => return,
        }
    }
}

fn flush_unknown(framer: &mut Framer, buf: &mut [u8], info: &mut Info) {
    let mut total = 0;
    loop {
        let n = framer.flush(buf);
        if n == 0 {
            break;
        }
        total += n;
    }
    if total > 0 {
        info.unknown.count += 1;
        info.unknown.bytes += total;
    }
}

fn summarize<R: Read>(mut src: R, filename: String) -> Result<Info> {
    let mut info = Info {
        filename,
        total_bytes: 0,
        unknown: Summary::default(),
        formats: BTreeMap::default(),
    };

    let mut framer = Framer::new();
    let mut chunk = vec![0u8; MAX_ASCII_MESSAGE_LENGTH];
    let mut buf = vec![0u8; MAX_ASCII_MESSAGE_LENGTH];
    loop {
        let n = src.read(&mut chunk).context("reading input")?;
        if n == 0 {
            break;
        }
        info.total_bytes += n;
        let mut written = 0;
        while written < n {
            let accepted = framer.write(&chunk[written..n]);
            written += accepted;
            drain(&mut framer, &mut buf, &mut info);
            if accepted == 0 {
                debug!("framer stalled, discarding buffered bytes");
                flush_unknown(&mut framer, &mut buf, &mut info);
            }
        }
    }

    // Whatever is left never completed a frame.
    flush_unknown(&mut framer, &mut buf, &mut info);

    Ok(info)
}

pub fn frame(input: &Path, json: bool) -> Result<()> {
    let src = BufReader::new(File::open(input).context("opening input")?);
    let info = summarize(src, input.to_string_lossy().to_string())?;

    if json {
        serde_json::to_writer_pretty(stdout(), &info).context("serializing to json")
    } else {
        let data = render_text(&info).context("serializing info")?;
        stdout()
            .write_all(str::as_bytes(&data))
            .context("writing to stdout")
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
    handlebars_helper!(right_pad: |num: u64, v: Json| {
        let v = match v {
            serde_json::Value::String(s) => s.to_owned(),
            serde_json::Value::Null => String::new(),
            _ => v.to_string()
        };
        let num = usize::try_from(num).unwrap_or_default().max(v.len());
        format!("{v:<num$}")
    });
    let mut hb = handlebars::Handlebars::new();
    hb.register_helper("lpad", Box::new(left_pad));
    hb.register_helper("rpad", Box::new(right_pad));
    hb.register_template_string("frame", TEXT_TEMPLATE)
        .context("registering template")?;

    hb.render("frame", &info).context("rendering text")
}

const TEXT_TEMPLATE: &str = r"{{ filename }}
==================================================
Bytes:    {{ total_bytes }}
Unknown:  {{ unknown.bytes }} bytes in {{ unknown.count }} runs
--------------------------------------------------
Format                     Count             Bytes
--------------------------------------------------
{{ #each formats }}{{ rpad 20 @key }}  {{ lpad 10 count }}  {{ lpad 16 bytes }}
{{/each }}
";
