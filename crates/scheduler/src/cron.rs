//! Five-field time expression evaluator (minute hour dom month dow).
//!
//! The grammar per field: `*`, integers, comma lists, hyphen ranges, and
//! `base/step` where base is `*`, a value, or a range. Day-of-week accepts
//! 0-7 with 7 meaning Sunday (= 0). All matching happens on naive local
//! wall-clock times; timezone conversion is the oracle's job.

use std::fmt;

use chrono::{Datelike, NaiveDateTime, Timelike};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::DayOfMonth => "day-of-month",
            Self::Month => "month",
            Self::DayOfWeek => "day-of-week",
        }
    }

    /// Inclusive value range. Day-of-week admits 7 at parse time; single
    /// values are normalized to 0 there.
    pub fn range(&self) -> (u32, u32) {
        match self {
            Self::Minute => (0, 59),
            Self::Hour => (0, 23),
            Self::DayOfMonth => (1, 31),
            Self::Month => (1, 12),
            Self::DayOfWeek => (0, 7),
        }
    }
}

const FIELD_KINDS: [FieldKind; 5] = [
    FieldKind::Minute,
    FieldKind::Hour,
    FieldKind::DayOfMonth,
    FieldKind::Month,
    FieldKind::DayOfWeek,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StepBase {
    Any,
    Value(u32),
    Range(u32, u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Token {
    Any,
    Value(u32),
    Range(u32, u32),
    Step { base: StepBase, step: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Field {
    kind: FieldKind,
    tokens: Vec<Token>,
}

impl Field {
    fn matches(&self, value: u32) -> bool {
        let (min, _) = self.kind.range();
        self.tokens.iter().any(|token| match *token {
            Token::Any => true,
            Token::Value(v) => value == v,
            Token::Range(lo, hi) => in_range(self.kind, lo, hi, value),
            Token::Step { base, step } => match base {
                StepBase::Any => (value - min) % step == 0,
                StepBase::Value(v) => value >= v && (value - v) % step == 0,
                StepBase::Range(lo, hi) => {
                    let effective = effective_value(self.kind, hi, value);
                    lo <= effective && effective <= hi && (effective - lo) % step == 0
                }
            },
        })
    }
}

/// Sunday participates in day-of-week ranges reaching 7 as the value 7.
fn effective_value(kind: FieldKind, hi: u32, value: u32) -> u32 {
    if kind == FieldKind::DayOfWeek && hi == 7 && value == 0 {
        7
    } else {
        value
    }
}

/// Range check; a day-of-week range reaching 7 wraps onto Sunday.
fn in_range(kind: FieldKind, lo: u32, hi: u32, value: u32) -> bool {
    let effective = effective_value(kind, hi, value);
    lo <= effective && effective <= hi
}

/// A parsed five-field expression. `Display` renders the normalized text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CronExpr {
    text: String,
    fields: [Field; 5],
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl CronExpr {
    pub fn parse(text: &str) -> Result<Self, String> {
        let parts: Vec<&str> = text.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(format!(
                "expected 5 fields (minute hour dom month dow), got {}",
                parts.len()
            ));
        }
        let mut fields = Vec::with_capacity(5);
        for (part, kind) in parts.iter().zip(FIELD_KINDS) {
            fields.push(parse_field(part, kind)?);
        }
        let fields: [Field; 5] = match fields.try_into() {
            Ok(fields) => fields,
            Err(_) => return Err("expected 5 fields".to_string()),
        };
        Ok(Self {
            text: parts.join(" "),
            fields,
        })
    }

    /// Does this expression match the given wall-clock minute?
    pub fn matches(&self, dt: NaiveDateTime) -> bool {
        self.fields[0].matches(dt.minute())
            && self.fields[1].matches(dt.hour())
            && self.fields[2].matches(dt.day())
            && self.fields[3].matches(dt.month())
            && self.fields[4].matches(dt.weekday().num_days_from_sunday())
    }
}

fn parse_value(raw: &str, kind: FieldKind) -> Result<u32, String> {
    let (min, max) = kind.range();
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("{}: invalid value '{raw}'", kind.name()));
    }
    let value: u32 = raw
        .parse()
        .map_err(|_| format!("{}: invalid value '{raw}'", kind.name()))?;
    if value < min || value > max {
        return Err(format!(
            "{}: value {value} out of range {min}..={max}",
            kind.name()
        ));
    }
    Ok(value)
}

fn normalize_dow(kind: FieldKind, value: u32) -> u32 {
    if kind == FieldKind::DayOfWeek && value == 7 {
        0
    } else {
        value
    }
}

fn parse_base(raw: &str, kind: FieldKind) -> Result<StepBase, String> {
    if raw == "*" {
        return Ok(StepBase::Any);
    }
    if let Some((left, right)) = raw.split_once('-') {
        let lo = parse_value(left, kind)?;
        let hi = parse_value(right, kind)?;
        if lo > hi {
            return Err(format!("{}: range start {lo} > end {hi}", kind.name()));
        }
        return Ok(StepBase::Range(lo, hi));
    }
    Ok(StepBase::Value(normalize_dow(kind, parse_value(raw, kind)?)))
}

fn parse_field(raw: &str, kind: FieldKind) -> Result<Field, String> {
    let (min, max) = kind.range();
    let mut tokens = Vec::new();
    for part in raw.split(',') {
        if part.is_empty() {
            return Err(format!("{}: empty token in '{raw}'", kind.name()));
        }
        if part == "*" {
            tokens.push(Token::Any);
            continue;
        }
        if let Some((base_raw, step_raw)) = part.split_once('/') {
            let step: u32 = step_raw
                .parse()
                .map_err(|_| format!("{}: invalid step '{part}'", kind.name()))?;
            if step == 0 || step > max - min + 1 {
                return Err(format!(
                    "{}: step {step} out of range 1..={}",
                    kind.name(),
                    max - min + 1
                ));
            }
            tokens.push(Token::Step {
                base: parse_base(base_raw, kind)?,
                step,
            });
            continue;
        }
        if let Some((left, right)) = part.split_once('-') {
            let lo = parse_value(left, kind)?;
            let hi = parse_value(right, kind)?;
            if lo > hi {
                return Err(format!("{}: range start {lo} > end {hi}", kind.name()));
            }
            tokens.push(Token::Range(lo, hi));
            continue;
        }
        tokens.push(Token::Value(normalize_dow(kind, parse_value(part, kind)?)));
    }
    Ok(Field { kind, tokens })
}
