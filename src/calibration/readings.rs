use serde_json::Value;

use crate::calibration::error::{Series, ValidationError};

/// One validated `[x, y]` sample pair, kept exactly as supplied.
pub type ReadingPair = (f64, f64);

/// Both reading series after validation, in input order.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedReadings {
    pub orifice: Vec<ReadingPair>,
    pub pitot: Vec<ReadingPair>,
}

/// Simultaneous raw orifice and Pitot signals for one reading.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    pub orifice_raw: f64,
    pub pitot_raw: f64,
}

impl Reading {
    pub fn new(orifice_raw: f64, pitot_raw: f64) -> Self {
        Self {
            orifice_raw,
            pitot_raw,
        }
    }
}

/// Non-empty, ordered batch of readings.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadingSet {
    readings: Vec<Reading>,
}

impl ReadingSet {
    pub fn new(readings: Vec<Reading>) -> Result<Self, ValidationError> {
        if readings.is_empty() {
            return Err(ValidationError::EmptySeries(Series::Orifice));
        }
        for (i, reading) in readings.iter().enumerate() {
            for (series, value) in [
                (Series::Orifice, reading.orifice_raw),
                (Series::Pitot, reading.pitot_raw),
            ] {
                if !value.is_finite() {
                    return Err(ValidationError::MalformedReading {
                        series,
                        index: i + 1,
                        reason: format!("{value} is not a finite number"),
                    });
                }
            }
        }
        Ok(Self { readings })
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    pub fn as_slice(&self) -> &[Reading] {
        &self.readings
    }
}

impl ValidatedReadings {
    pub fn len(&self) -> usize {
        self.orifice.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orifice.is_empty()
    }

    /// Collapses each pair to its mean; the two components are replicate
    /// samples of the same differential signal.
    pub fn to_reading_set(&self) -> Result<ReadingSet, ValidationError> {
        let readings = self
            .orifice
            .iter()
            .zip(&self.pitot)
            .map(|(o, p)| Reading::new(pair_mean(*o), pair_mean(*p)))
            .collect();
        ReadingSet::new(readings)
    }
}

fn pair_mean((x, y): ReadingPair) -> f64 {
    0.5 * x + 0.5 * y
}

/// Checks both raw series and converts them to float pairs.
///
/// Emptiness and length are checked before any element is parsed, so a
/// mismatched batch is rejected without touching its contents.
pub fn validate_readings(
    orifice: &[Value],
    pitot: &[Value],
) -> Result<ValidatedReadings, ValidationError> {
    if orifice.is_empty() {
        return Err(ValidationError::EmptySeries(Series::Orifice));
    }
    if pitot.is_empty() {
        return Err(ValidationError::EmptySeries(Series::Pitot));
    }
    if orifice.len() != pitot.len() {
        return Err(ValidationError::LengthMismatch {
            orifice: orifice.len(),
            pitot: pitot.len(),
        });
    }
    Ok(ValidatedReadings {
        orifice: parse_series(Series::Orifice, orifice)?,
        pitot: parse_series(Series::Pitot, pitot)?,
    })
}

fn parse_series(series: Series, raw: &[Value]) -> Result<Vec<ReadingPair>, ValidationError> {
    raw.iter()
        .enumerate()
        .map(|(i, value)| {
            parse_pair(value).map_err(|reason| ValidationError::MalformedReading {
                series,
                index: i + 1,
                reason,
            })
        })
        .collect()
}

fn parse_pair(value: &Value) -> Result<ReadingPair, String> {
    let items = value
        .as_array()
        .ok_or_else(|| format!("expected a [x, y] pair, got {value}"))?;
    if items.len() != 2 {
        return Err(format!("expected 2 values, got {}", items.len()));
    }
    Ok((parse_number(&items[0])?, parse_number(&items[1])?))
}

fn parse_number(value: &Value) -> Result<f64, String> {
    let number = match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("{n} is not representable as f64"))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("`{s}` is not a number"))?,
        other => return Err(format!("{other} is not a number")),
    };
    if !number.is_finite() {
        return Err(format!("{number} is not a finite number"));
    }
    Ok(number)
}
