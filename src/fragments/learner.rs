//! Learning new fragments from an external learner.
//!
//! The learner receives a sketch with numbered holes (`{0}`, `{1}`, ...), the
//! catalog of placeholder variables and the fragments already known, and
//! answers with `hole;template` rows. Answers are advisory: any failure
//! yields an empty response and a warning, never an error for the session.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::FuzzError;
use crate::feature::HoleKind;
use crate::fragments::VariableKind;
use crate::generator::Randomly;
use crate::state::{EngineState, lock};

const SYSTEM_PROMPT: &str = "You are an expert on SQL dialects. Fill each numbered hole of the \
sketch with syntax the named database system accepts at that position. Answer with one \
'hole;fill' row per line and nothing else. Use only the listed variables as placeholders.";

/// Everything the learner needs to fill one sketch.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LearnRequest {
    pub dialect: String,
    /// Hole category being learned.
    pub feature: String,
    /// Type topic, when learning per-type fragments.
    pub topic: Option<String>,
    pub sketch: String,
    pub variables: String,
    pub examples: String,
    pub system_prompt: String,
}

impl LearnRequest {
    pub fn new(dialect: &str, feature: &str, sketch: String, examples: String) -> Self {
        Self {
            dialect: dialect.to_string(),
            feature: feature.to_string(),
            topic: None,
            sketch,
            variables: VariableKind::catalog(),
            examples,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_topic(mut self, topic: &str) -> Self {
        self.topic = Some(topic.to_string());
        self
    }

    /// User prompt text for text-completion learners.
    pub fn prompt(&self) -> String {
        format!(
            "DBMS: {}\n\nSketch:\n{}\nAvailable variables and their descriptions:\n{}\nExamples:\n{}\n",
            self.dialect, self.sketch, self.variables, self.examples
        )
    }
}

/// Source of fill templates for sketches.
pub trait FragmentLearner: Send + Sync {
    /// Raw CSV answer for one request.
    fn learn(&self, request: &LearnRequest) -> Result<String, FuzzError>;
}

/// Learner that never answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLearner;

impl FragmentLearner for NoLearner {
    fn learn(&self, _request: &LearnRequest) -> Result<String, FuzzError> {
        Ok(String::new())
    }
}

/// Canned answers keyed by topic, or by feature when there is no topic.
#[derive(Debug, Clone, Default)]
pub struct StaticLearner {
    responses: HashMap<String, String>,
}

impl StaticLearner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, key: &str, csv: &str) -> Self {
        self.responses.insert(key.to_string(), csv.to_string());
        self
    }
}

impl FragmentLearner for StaticLearner {
    fn learn(&self, request: &LearnRequest) -> Result<String, FuzzError> {
        let key = request.topic.as_deref().unwrap_or(&request.feature);
        Ok(self.responses.get(key).cloned().unwrap_or_default())
    }
}

/// Runs a shell command per request: JSON on stdin, CSV on stdout.
#[derive(Debug, Clone)]
pub struct CommandLearner {
    command: String,
    timeout: Duration,
}

impl CommandLearner {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

/// Kill and reap a child that will not be waited on normally.
fn abandon(child: &mut Child, error: FuzzError) -> FuzzError {
    let _ = child.kill();
    let _ = child.wait();
    error
}

impl FragmentLearner for CommandLearner {
    fn learn(&self, request: &LearnRequest) -> Result<String, FuzzError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| FuzzError::InternalError(format!("encode learn request: {e}")))?;

        let deadline = Instant::now() + self.timeout;
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        // A child that never reads its stdin must not block past the deadline.
        let writer = child
            .stdin
            .take()
            .map(|mut stdin| std::thread::spawn(move || stdin.write_all(&payload)));
        let Some(mut stdout) = child.stdout.take() else {
            return Err(abandon(
                &mut child,
                FuzzError::InternalError("learner stdout not captured".into()),
            ));
        };
        let reader = std::thread::spawn(move || {
            let mut out = String::new();
            stdout.read_to_string(&mut out).map(|_| out)
        });

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => return Err(abandon(&mut child, e.into())),
            }
            if Instant::now() >= deadline {
                return Err(abandon(
                    &mut child,
                    FuzzError::InternalError(format!(
                        "learner timed out after {}s",
                        self.timeout.as_secs()
                    )),
                ));
            }
            std::thread::sleep(Duration::from_millis(50));
        };

        if let Some(Ok(Err(e))) = writer.map(|w| w.join()) {
            tracing::debug!(error = %e, "learner did not read the whole request");
        }
        let output = reader
            .join()
            .map_err(|_| FuzzError::InternalError("learner reader panicked".into()))??;
        if !status.success() {
            return Err(FuzzError::InternalError(format!(
                "learner exited with {status}"
            )));
        }
        Ok(output)
    }
}

/// Ask the learner, turning failures into an empty answer.
pub fn learn_or_empty(learner: &dyn FragmentLearner, request: &LearnRequest) -> String {
    match learner.learn(request) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(feature = %request.feature, error = %e, "learner failed");
            String::new()
        }
    }
}

/// Split an answer into `(separator-prefix, fill)` rows, dropping code
/// fences and lines without the separator.
pub fn parse_rows(response: &str, separator: char) -> Vec<(String, String)> {
    response
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .filter_map(|line| {
            let (key, value) = line.split_once(separator)?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// `hole;fill` rows with a numeric hole.
pub fn parse_hole_rows(response: &str) -> Vec<(usize, String)> {
    parse_rows(response, ';')
        .into_iter()
        .filter_map(|(hole, fill)| {
            let hole = hole.trim_start_matches('{').trim_end_matches('}');
            hole.parse().ok().map(|h| (h, fill))
        })
        .collect()
}

// ── Sketches ───────────────────────────────────────────────────────────────

pub fn function_sketch() -> String {
    (0..4)
        .map(|i| {
            let args = vec!["NULL"; i].join(", ");
            format!("SELECT {{{i}}}({args}); -- Hint: Function with {i} arguments\n")
        })
        .collect()
}

pub fn operator_sketch() -> String {
    "CREATE TABLE TEST_TABLE (a INT, b INT);\n\
     SELECT * FROM TEST_TABLE WHERE a {0} b; -- Hint: operator return a boolean value\n"
        .to_string()
}

/// Answered with `TYPE,literal` rows rather than hole rows.
pub fn type_sketch() -> String {
    "CREATE TABLE test (c0 {0});\nINSERT INTO test VALUES ({1}); -- Hint: answer with 'type,literal' rows\n"
        .to_string()
}

pub fn topic_sketch(topic: &str) -> String {
    format!(
        "CREATE TABLE t0 (c0 {topic});\n\
         INSERT INTO t0 VALUES ({{0}}); -- Hint: a literal of type {topic}\n\
         SELECT {{1}}() FROM t0; -- Hint: a function without arguments returning {topic}\n\
         SELECT {{2}}(c0) FROM t0; -- Hint: a function taking one {topic} argument\n\
         SELECT {{3}}(c0, c0) FROM t0; -- Hint: a function taking two {topic} arguments\n\
         SELECT * FROM t0 WHERE c0 {{4}} c0; -- Hint: an operator on {topic} returning a boolean\n\
         SELECT c0 {{5}} c0 FROM t0; -- Hint: an operator on {topic} returning {topic}\n"
    )
}

/// Fill hole `index` with `value` and blank every other `{n}` hole.
pub fn fill_sketch(sketch: &str, index: usize, value: &str) -> String {
    let mut out = String::with_capacity(sketch.len());
    let mut rest = sketch;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}').and_then(|close| {
            after[..close].parse::<usize>().ok().map(|n| (n, close))
        }) {
            Some((n, close)) => {
                if n == index {
                    out.push_str(value);
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

// ── Learning manager ───────────────────────────────────────────────────────

/// Tracks which type topics have been learned and routes learner answers
/// into the stores.
#[derive(Debug, Default)]
pub struct LearningManager {
    topics: Mutex<BTreeMap<String, bool>>,
    sketches: Mutex<HashMap<HoleKind, String>>,
}

impl LearningManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every type-store key as a topic.
    pub fn refresh_topics(&self, engine: &EngineState) {
        let mut topics = lock(&self.topics);
        for key in engine.stores.get(HoleKind::Type).keys() {
            topics.entry(key).or_insert(false);
        }
    }

    pub fn topics(&self) -> Vec<(String, bool)> {
        lock(&self.topics)
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Pick an unlearned topic on the first database or with rather-low
    /// probability, marking it learned.
    pub fn pick_topic(&self, rng: &mut Randomly, first_database: bool) -> Option<String> {
        if !first_database && !rng.rather_low() {
            return None;
        }
        let mut topics = lock(&self.topics);
        let unlearned: Vec<String> = topics
            .iter()
            .filter(|(_, learned)| !**learned)
            .map(|(name, _)| name.clone())
            .collect();
        let topic = rng.pick(&unlearned)?.clone();
        topics.insert(topic.clone(), true);
        Some(topic)
    }

    pub fn sketch(&self, hole: HoleKind) -> Option<String> {
        lock(&self.sketches).get(&hole).cloned()
    }

    fn request(&self, engine: &EngineState, hole: HoleKind, sketch: String) -> LearnRequest {
        LearnRequest::new(
            &engine.config.dialect_name,
            hole.as_str(),
            sketch,
            engine.stores.get(hole).examples(),
        )
    }

    /// Learn the type store from the type sketch.
    pub fn learn_types(&self, engine: &EngineState) -> usize {
        let request = self.request(engine, HoleKind::Type, type_sketch());
        let answer = learn_or_empty(engine.learner.as_ref(), &request);
        let store = engine.stores.get(HoleKind::Type);
        let mut accepted = 0;
        for (name, literal) in parse_rows(&answer, ',') {
            match store.parse_key(&name) {
                Ok(key) => accepted += store.ingest(&key, [literal]).len(),
                Err(e) => tracing::warn!(error = %e, "skipping learned type"),
            }
        }
        engine.sync_catalog();
        self.refresh_topics(engine);
        tracing::info!(accepted, "learned type fragments");
        accepted
    }

    pub fn learn_functions(&self, engine: &EngineState) -> usize {
        let request = self.request(engine, HoleKind::Function, function_sketch());
        let answer = learn_or_empty(engine.learner.as_ref(), &request);
        let store = engine.stores.get(HoleKind::Function);
        let accepted: usize = parse_hole_rows(&answer)
            .into_iter()
            .map(|(arity, name)| store.ingest(&arity.to_string(), [name]).len())
            .sum();
        engine.sync_catalog();
        accepted
    }

    pub fn learn_operators(&self, engine: &EngineState) -> usize {
        let request = self.request(engine, HoleKind::Operator, operator_sketch());
        let answer = learn_or_empty(engine.learner.as_ref(), &request);
        let store = engine.stores.get(HoleKind::Operator);
        let accepted: usize = parse_hole_rows(&answer)
            .into_iter()
            .map(|(_, op)| store.ingest("BOOLEAN", [op]).len())
            .sum();
        engine.sync_catalog();
        accepted
    }

    /// Learn a generator sketch (table, index or statement shape).
    ///
    /// Returns the newly accepted `(key, template)` pairs so the caller can
    /// validate them against the target.
    pub fn learn_sketch(
        &self,
        engine: &EngineState,
        hole: HoleKind,
        sketch: &str,
    ) -> Vec<(String, String)> {
        lock(&self.sketches).insert(hole, sketch.to_string());
        let request = self.request(engine, hole, sketch.to_string());
        let answer = learn_or_empty(engine.learner.as_ref(), &request);
        let store = engine.stores.get(hole);
        let mut accepted = Vec::new();
        for (index, fill) in parse_hole_rows(&answer) {
            let key = index.to_string();
            let fill = if hole == HoleKind::Statement {
                store
                    .parse_line(&format!("{key};{fill}"))
                    .ok()
                    .flatten()
                    .map(|(_, t)| t)
                    .unwrap_or(fill)
            } else {
                fill
            };
            for source in store.ingest(&key, [fill]) {
                accepted.push((key.clone(), source));
            }
        }
        tracing::info!(hole = %hole, accepted = accepted.len(), "learned sketch fragments");
        accepted
    }

    /// Learn literal, function and operator fragments for one type.
    pub fn learn_topic(&self, engine: &EngineState, topic: &str) -> usize {
        let request = self
            .request(engine, HoleKind::Type, topic_sketch(topic))
            .with_topic(topic);
        let answer = learn_or_empty(engine.learner.as_ref(), &request);

        let mut accepted = 0;
        for (hole, fill) in parse_hole_rows(&answer) {
            let (store, key) = match hole {
                0 => (HoleKind::Type, topic.to_string()),
                1 => (HoleKind::Function, "0".to_string()),
                2 => (HoleKind::Function, "1".to_string()),
                3 => (HoleKind::Function, "2".to_string()),
                4 => (HoleKind::Operator, "BOOLEAN".to_string()),
                5 => (HoleKind::Operator, topic.to_string()),
                other => {
                    tracing::debug!(hole = other, "ignoring unknown topic hole");
                    continue;
                }
            };
            let store = engine.stores.get(store);
            let Ok(key) = store.parse_key(&key) else {
                continue;
            };
            accepted += store.ingest(&key, [fill]).len();
        }

        engine.sync_catalog();
        tracing::info!(topic, accepted, "learned topic");
        accepted
    }
}
