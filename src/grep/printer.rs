use std::io::Write;
use std::ops::Range;
use std::path::Path;

use anyhow::Result;

use crate::cache::Payload;

const DEFAULT_GREP_COLOR: &str = "37;45";

/// A body line together with the byte spans the pattern matched.
pub struct MatchLine {
    pub line: String,
    pub spans: Vec<Range<usize>>,
}

/// Output strategy for search results.
pub enum Printer {
    /// No output at all, exit status only.
    Silent,
    /// One `path:count` line per matching file.
    Count,
    /// Path header per file, optionally the stored response head, then the
    /// matching lines.
    Header {
        head: bool,
        color: bool,
        printed: usize,
    },
    /// Each matching line prefixed with its path.
    Terse { color: bool },
}

impl Printer {
    pub fn print(
        &mut self,
        out: &mut dyn Write,
        path: &Path,
        payload: &Payload,
        matches: &[MatchLine],
    ) -> Result<()> {
        match self {
            Printer::Silent => {}
            Printer::Count => writeln!(out, "{}:{}", path.display(), matches.len())?,
            Printer::Header {
                head,
                color,
                printed,
            } => {
                *printed += 1;
                if *printed > 1 {
                    writeln!(out)?;
                }
                writeln!(out, "{}", path.display())?;
                if *head {
                    let mut buf = Vec::new();
                    payload.serialize_head(&mut buf)?;
                    for line in String::from_utf8_lossy(&buf).lines() {
                        writeln!(out, "< {line}")?;
                    }
                }
                for m in matches {
                    print_line(out, m, *color)?;
                }
            }
            Printer::Terse { color } => {
                for m in matches {
                    write!(out, "{}:", path.display())?;
                    print_line(out, m, *color)?;
                }
            }
        }
        Ok(())
    }
}

fn print_line(out: &mut dyn Write, m: &MatchLine, color: bool) -> Result<()> {
    if !color {
        writeln!(out, "{}", m.line)?;
        return Ok(());
    }
    let sgr = grep_color();
    let mut at = 0;
    for span in &m.spans {
        write!(
            out,
            "{}\x1b[{}m{}\x1b[0m",
            &m.line[at..span.start],
            sgr,
            &m.line[span.clone()]
        )?;
        at = span.end;
    }
    writeln!(out, "{}", &m.line[at..])?;
    Ok(())
}

fn grep_color() -> String {
    std::env::var("GREP_COLOR").unwrap_or_else(|_| DEFAULT_GREP_COLOR.to_string())
}
