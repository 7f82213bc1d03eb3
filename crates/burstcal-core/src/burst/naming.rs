//! Burst and speckled file-name templates.
//!
//! Templates use positional substitution in the style of
//! `{0:s}_{1:s}_halpha_kisip.raw.batch.{2:02d}.{3:03d}`. Slots may also be
//! named: `{date}`, `{time}`, `{batch}`, `{index}`. Every template must consume
//! all four values exactly once, and the index slot must close the template so
//! the external reconstruction program can address sub-files by prefix.

use std::fmt;

use crate::consts::{DEFAULT_BATCH_WIDTH, DEFAULT_INDEX_WIDTH};
use crate::error::{BurstcalError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Date,
    Time,
    Batch,
    Index,
}

impl Slot {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "0" | "date" => Some(Self::Date),
            "1" | "time" => Some(Self::Time),
            "2" | "batch" => Some(Self::Batch),
            "3" | "index" => Some(Self::Index),
            _ => None,
        }
    }

    fn is_numeric(self) -> bool {
        matches!(self, Self::Batch | Self::Index)
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Literal(String),
    Text(Slot),
    Number { slot: Slot, width: usize },
}

/// A parsed file-name template.
#[derive(Clone, Debug, PartialEq)]
pub struct FileTemplate {
    source: String,
    segments: Vec<Segment>,
    batch_width: usize,
    index_width: usize,
}

impl FileTemplate {
    pub fn parse(source: &str) -> Result<Self> {
        let err = |reason: String| BurstcalError::Template {
            template: source.to_string(),
            reason,
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();
        // Empty field names take slots in order, as `str.format` does.
        let mut next_auto = 0usize;

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(err("unmatched '}'".into())),
                '{' => {
                    let mut body = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => body.push(ch),
                            None => return Err(err("unterminated '{'".into())),
                        }
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(parse_slot(&body, &mut next_auto).map_err(err)?);
                }
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        let mut batch_width = DEFAULT_BATCH_WIDTH;
        let mut index_width = DEFAULT_INDEX_WIDTH;
        for slot in [Slot::Date, Slot::Time, Slot::Batch, Slot::Index] {
            let uses: Vec<&Segment> = segments
                .iter()
                .filter(|s| segment_slot(s) == Some(slot))
                .collect();
            if uses.len() != 1 {
                return Err(err(format!(
                    "slot {slot:?} must appear exactly once, found {}",
                    uses.len()
                )));
            }
            if let Segment::Number { width, .. } = uses[0] {
                match slot {
                    Slot::Batch => batch_width = *width,
                    Slot::Index => index_width = *width,
                    _ => {}
                }
            }
        }

        if segments.last().and_then(segment_slot) != Some(Slot::Index) {
            return Err(err("index slot must end the template".into()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
            batch_width,
            index_width,
        })
    }

    /// Render the full file name for a burst coordinate.
    pub fn render(&self, date: &str, time: &str, batch: usize, index: usize) -> Result<String> {
        self.check_batch(batch)?;
        if !fits_width(index, self.index_width) {
            return Err(BurstcalError::IndexOverflow {
                index,
                width: self.index_width,
            });
        }
        Ok(self.render_segments(&self.segments, date, time, batch, index))
    }

    /// Render everything before the index slot, without its trailing
    /// separator. This is the per-batch prefix the reconstruction program
    /// extends with `.NNN` to find individual sub-files.
    pub fn render_prefix(&self, date: &str, time: &str, batch: usize) -> Result<String> {
        self.check_batch(batch)?;
        let head = &self.segments[..self.segments.len() - 1];
        let mut prefix = self.render_segments(head, date, time, batch, 0);
        if prefix.ends_with('.') {
            prefix.pop();
        }
        Ok(prefix)
    }

    pub fn batch_width(&self) -> usize {
        self.batch_width
    }

    pub fn index_width(&self) -> usize {
        self.index_width
    }

    /// Largest batch number this template can render.
    pub fn max_batch(&self) -> usize {
        max_for_width(self.batch_width)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn check_batch(&self, batch: usize) -> Result<()> {
        if fits_width(batch, self.batch_width) {
            Ok(())
        } else {
            Err(BurstcalError::BatchNumberOverflow {
                batch,
                width: self.batch_width,
            })
        }
    }

    fn render_segments(
        &self,
        segments: &[Segment],
        date: &str,
        time: &str,
        batch: usize,
        index: usize,
    ) -> String {
        let mut out = String::with_capacity(self.source.len() + 8);
        for segment in segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Text(Slot::Date) => out.push_str(date),
                Segment::Text(Slot::Time) => out.push_str(time),
                Segment::Text(_) => {}
                Segment::Number { slot, width } => {
                    let value = if *slot == Slot::Batch { batch } else { index };
                    out.push_str(&format!("{value:0width$}", width = *width));
                }
            }
        }
        out
    }
}

impl fmt::Display for FileTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn segment_slot(segment: &Segment) -> Option<Slot> {
    match segment {
        Segment::Literal(_) => None,
        Segment::Text(slot) | Segment::Number { slot, .. } => Some(*slot),
    }
}

fn parse_slot(body: &str, next_auto: &mut usize) -> std::result::Result<Segment, String> {
    let (name, spec) = match body.split_once(':') {
        Some((name, spec)) => (name.trim(), spec.trim()),
        None => (body.trim(), ""),
    };
    let slot = if name.is_empty() {
        let auto = next_auto.to_string();
        *next_auto += 1;
        Slot::from_name(&auto)
    } else {
        Slot::from_name(name)
    }
    .ok_or_else(|| format!("unknown slot '{{{body}}}'"))?;

    if !slot.is_numeric() {
        return match spec {
            "" | "s" => Ok(Segment::Text(slot)),
            other => Err(format!("unsupported format '{other}' for {slot:?}")),
        };
    }

    let default_width = if slot == Slot::Batch {
        DEFAULT_BATCH_WIDTH
    } else {
        DEFAULT_INDEX_WIDTH
    };
    let digits = spec.strip_suffix('d').unwrap_or(spec);
    if digits.is_empty() {
        return Ok(Segment::Number {
            slot,
            width: default_width,
        });
    }
    let width_str = digits
        .strip_prefix('0')
        .ok_or_else(|| format!("{slot:?} must be zero-padded, got '{spec}'"))?;
    let width: usize = width_str
        .parse()
        .map_err(|_| format!("bad width '{spec}' for {slot:?}"))?;
    if width == 0 || width > 18 {
        return Err(format!("width {width} out of range for {slot:?}"));
    }
    Ok(Segment::Number { slot, width })
}

fn max_for_width(width: usize) -> usize {
    10usize.pow(width as u32) - 1
}

fn fits_width(value: usize, width: usize) -> bool {
    value <= max_for_width(width)
}
