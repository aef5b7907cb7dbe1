use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::catalog::PatternKind;

/// Counters and timing for one [`Decoder::decode`](crate::Decoder::decode)
/// call. Sizes are in bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub original_size: usize,
    pub final_size: usize,
    pub arrays_found: usize,
    pub functions_found: usize,
    pub variables_found: usize,
    pub base64_decoded: usize,
    pub hex_decoded: usize,
    pub chr_decoded: usize,
    pub rot13_decoded: usize,
    pub math_expressions: usize,
    /// Passes that actually ran, never more than the configured budget.
    pub passes: usize,
    pub processing_time_ms: f64,
    /// Percentage the buffer shrank by; negative when it grew.
    pub compression_ratio: f64,
}

impl Statistics {
    pub fn new(original_size: usize) -> Self {
        Self {
            original_size,
            ..Self::default()
        }
    }

    /// Adds `count` decoded units to the counter for `kind`.
    pub(crate) fn record(&mut self, kind: PatternKind, count: usize) {
        match kind {
            PatternKind::Base64 => self.base64_decoded += count,
            PatternKind::HexEscape => self.hex_decoded += count,
            PatternKind::CharCode => self.chr_decoded += count,
            PatternKind::Rot13 => self.rot13_decoded += count,
            PatternKind::Eval | PatternKind::Gzinflate => {}
        }
    }

    pub(crate) fn finish(&mut self, final_size: usize, elapsed: Duration) {
        self.final_size = final_size;
        self.processing_time_ms = round2(elapsed.as_secs_f64() * 1000.0);
        self.compression_ratio = if self.original_size == 0 {
            0.0
        } else {
            round2((1.0 - final_size as f64 / self.original_size as f64) * 100.0)
        };
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Ordered, append-only record of what the engine did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Trace(Vec<String>);

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        log::debug!("{line}");
        self.0.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.0.iter().any(|line| line.contains(needle))
    }
}

/// One line per entry, each terminated by a newline.
impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.0 {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish() {
        let mut stats = Statistics::new(200);
        stats.finish(150, Duration::from_micros(1234));
        assert_eq!(stats.final_size, 150);
        assert_eq!(stats.compression_ratio, 25.0);
        assert_eq!(stats.processing_time_ms, 1.23);

        let mut stats = Statistics::new(3);
        stats.finish(4, Duration::ZERO);
        assert_eq!(stats.compression_ratio, -33.33);

        let mut stats = Statistics::new(0);
        stats.finish(0, Duration::ZERO);
        assert_eq!(stats.compression_ratio, 0.0);
    }

    #[test]
    fn test_record() {
        let mut stats = Statistics::new(0);
        stats.record(PatternKind::HexEscape, 3);
        stats.record(PatternKind::HexEscape, 1);
        stats.record(PatternKind::Eval, 5);
        assert_eq!(stats.hex_decoded, 4);
        assert_eq!(stats, Statistics { hex_decoded: 4, ..Statistics::default() });
    }

    #[test]
    fn test_trace() {
        let mut trace = Trace::new();
        trace.push("first");
        trace.push(String::from("second"));
        assert_eq!(trace.len(), 2);
        assert!(trace.contains("sec"));
        assert_eq!(trace.to_string(), "first\nsecond\n");
    }
}
