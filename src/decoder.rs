use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use crate::catalog::{self, PatternKind};
use crate::config::DecoderConfig;
use crate::detect::Detections;
use crate::environment::Environment;
use crate::stats::{Statistics, Trace};
use crate::{evaluator, literal, normalize, resolve, variables};

/// Multi-pass detect-and-rewrite engine over one source buffer.
///
/// Each pass re-runs detection and then applies, in this order: base64,
/// hex-escape, `chr()` and rot13 decoding, array resolution, function
/// resolution, variable substitution, expression evaluation and
/// normalization. Passes repeat until the buffer stops changing or the pass
/// budget runs out.
///
/// Decoding never fails. A construct that cannot be decoded is left exactly as
/// it was, and the rest of the pass carries on.
///
/// # Examples
///
/// ```rust
/// use deobfuscator_rs::{Decoder, Environment};
///
/// let env = Environment::default();
/// let mut decoder = Decoder::new("$x = base64_decode('aGVsbG8=');", &env);
///
/// assert_eq!(decoder.decode(), "$x = 'hello';");
/// assert_eq!(decoder.statistics().base64_decoded, 1);
/// ```
#[derive(Debug)]
pub struct Decoder<'env> {
    source: String,
    environment: &'env Environment,
    config: DecoderConfig,
    detections: Detections,
    statistics: Statistics,
    trace: Trace,
}

impl<'env> Decoder<'env> {
    pub fn new(source: impl Into<String>, environment: &'env Environment) -> Self {
        Self::with_config(source, environment, DecoderConfig::default())
    }

    pub fn with_config(
        source: impl Into<String>,
        environment: &'env Environment,
        config: DecoderConfig,
    ) -> Self {
        let source = source.into();
        let mut trace = Trace::new();
        trace.push("Initializing decoder...");
        Self {
            statistics: Statistics::new(source.len()),
            source,
            environment,
            config,
            detections: Detections::default(),
            trace,
        }
    }

    /// Runs the pass loop and returns the decoded buffer.
    ///
    /// Statistics are reset at the start of every call; the trace keeps
    /// growing.
    pub fn decode(&mut self) -> String {
        let started = Instant::now();
        self.statistics = Statistics::new(self.source.len());
        self.trace.push("Starting decoding...");

        let mut previous: Option<String> = None;
        let mut stabilized = false;
        for pass in 1..=self.config.max_passes {
            if previous.as_deref() == Some(self.source.as_str()) {
                self.trace
                    .push(format!("Content stabilized on pass #{pass}"));
                stabilized = true;
                break;
            }
            self.trace.push(format!("Pass #{pass}..."));
            previous = Some(self.source.clone());
            self.run_pass();
            self.statistics.passes = pass;
        }

        if !stabilized && previous.as_deref() != Some(self.source.as_str()) {
            self.trace.push(format!(
                "Pass budget of {} exhausted before content stabilized",
                self.config.max_passes
            ));
        }

        self.statistics.finish(self.source.len(), started.elapsed());
        self.trace.push(format!(
            "Decoding finished in {} ms",
            self.statistics.processing_time_ms
        ));
        self.source.clone()
    }

    fn run_pass(&mut self) {
        self.detect();

        for kind in PatternKind::DECODABLE {
            let (output, decoded) = literal::apply(kind.pattern(), &self.source);
            self.statistics.record(kind, decoded);
            self.source = output;
        }

        self.source = resolve::resolve_arrays(
            &self.source,
            &self.detections.arrays,
            self.environment.globals(),
            &mut self.trace,
        );
        self.source = resolve::resolve_functions(
            &self.source,
            &self.detections.functions,
            self.environment.callables(),
            &mut self.trace,
        );
        self.source = variables::substitute(&self.source, &self.detections.variables);

        self.trace.push("Processing mathematical expressions...");
        let (output, calls) = evaluator::evaluate_calls(&self.source);
        let (output, arithmetic) = evaluator::evaluate_arithmetic(&output);
        self.statistics.math_expressions += calls + arithmetic;

        self.source = normalize::normalize(&output);
    }

    fn detect(&mut self) {
        let detections = Detections::scan(&self.source);

        self.statistics.arrays_found = detections.arrays.len();
        self.trace
            .push(format!("Detected arrays: {}", detections.arrays.len()));

        self.trace.push("Searching for global functions...");
        self.statistics.functions_found = detections.functions.len();
        if !detections.functions.is_empty() {
            self.trace.push(format!(
                "Found functions: {}",
                detections.functions.join(", ")
            ));
        }

        self.statistics.variables_found = detections.variables.len();
        self.trace
            .push(format!("Detected variables: {}", detections.variables.len()));

        for (kind, count) in catalog::census(&self.source) {
            self.trace.push(format!("Found {kind} strings: {count}"));
        }

        self.detections = detections;
    }

    /// The current buffer; after [`decode`](Self::decode) the decoded text.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Arrays seen in the last pass with every index referenced.
    pub fn arrays(&self) -> &BTreeMap<String, BTreeSet<usize>> {
        &self.detections.arrays
    }

    /// Functions seen in the last pass, in order of first appearance.
    pub fn functions(&self) -> &[String] {
        &self.detections.functions
    }

    /// Literal variable bindings in force during the last pass.
    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.detections.variables
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }
}
