//! Search the bodies of cached responses, grep style.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use flate2::bufread::GzDecoder;
use mime::Mime;
use regex::{Regex, RegexBuilder};
use walkdir::WalkDir;

use crate::cache::{GZIP_MAGIC, Payload};

mod printer;

pub use printer::{MatchLine, Printer};

pub struct GrepOptions {
    pub pattern: String,
    pub roots: Vec<PathBuf>,
    pub count: bool,
    pub head: bool,
    pub silent: bool,
    /// Enables match highlighting and the header output style.
    pub tty: bool,
}

impl GrepOptions {
    fn printer(&self) -> Printer {
        if self.silent {
            Printer::Silent
        } else if self.count {
            Printer::Count
        } else if self.head || self.tty {
            Printer::Header {
                head: self.head,
                color: self.tty,
                printed: 0,
            }
        } else {
            Printer::Terse { color: false }
        }
    }
}

/// Search every file under the given roots. Returns true when at least one
/// file matched.
pub fn run(options: &GrepOptions, out: &mut dyn Write) -> Result<bool> {
    let regex = RegexBuilder::new(&options.pattern)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("invalid pattern {:?}", options.pattern))?;
    let mut printer = options.printer();
    let mut success = false;

    for path in paths(&options.roots)? {
        let matched = search_file(&path, &regex, &mut printer, out, options.silent)
            .with_context(|| path.display().to_string())?;
        success = success || matched;
    }
    Ok(success)
}

/// Files under `roots`, sorted. An empty list means the current directory,
/// with the leading `./` stripped from results.
fn paths(roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let default_root = roots.is_empty();
    let roots = if default_root {
        vec![PathBuf::from(".")]
    } else {
        roots.to_vec()
    };

    let mut paths = Vec::new();
    for root in &roots {
        for entry in WalkDir::new(root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            let path = if default_root {
                match path.strip_prefix(".") {
                    Ok(rel) => rel.to_path_buf(),
                    Err(_) => path,
                }
            } else {
                path
            };
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn search_file(
    path: &Path,
    regex: &Regex,
    printer: &mut Printer,
    out: &mut dyn Write,
    silent: bool,
) -> Result<bool> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    if !reader.fill_buf()?.starts_with(&GZIP_MAGIC) {
        if !silent {
            writeln!(out, "httpdisk: {} not in gzip format, skipping", path.display())?;
        }
        return Ok(false);
    }

    let mut reader = BufReader::new(GzDecoder::new(reader));
    let payload = Payload::deserialize(&mut reader)?;
    let body = prepare_body(&payload)?;

    let matches: Vec<MatchLine> = body
        .lines()
        .filter_map(|line| {
            let spans: Vec<_> = regex.find_iter(line).map(|m| m.range()).collect();
            if spans.is_empty() {
                None
            } else {
                Some(MatchLine {
                    line: line.to_string(),
                    spans,
                })
            }
        })
        .collect();
    if matches.is_empty() {
        return Ok(false);
    }

    printer.print(out, path, &payload, &matches)?;
    Ok(true)
}

/// Turn the raw body into search-friendly text: honor a declared charset
/// where possible, and pretty-print json so nested values land on their own
/// lines.
fn prepare_body(payload: &Payload) -> Result<String> {
    let content_type = payload
        .header("content-type")
        .map(|value| String::from_utf8_lossy(value).into_owned());

    let charset = content_type
        .as_deref()
        .and_then(|value| value.parse::<Mime>().ok())
        .and_then(|m| {
            m.get_param(mime::CHARSET)
                .and_then(|cs| Encoding::for_label(cs.as_str().as_bytes()))
        });
    let mut body = match charset {
        Some(encoding) => encoding.decode(&payload.body).0.into_owned(),
        None => String::from_utf8_lossy(&payload.body).into_owned(),
    };

    if content_type.as_deref().is_some_and(|value| value.contains("json")) {
        let value: serde_json::Value =
            serde_json::from_str(&body).context("body is not valid json")?;
        body = serde_json::to_string_pretty(&value)?;
    }
    Ok(body)
}
