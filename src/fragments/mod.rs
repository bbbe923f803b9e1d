//! Adaptive grammar: learned templates that fill dialect-specific holes.
//!
//! A [`FragmentStore`] maps a hole key (a hole index, or a type name for the
//! type and operator stores) to candidate [`Template`]s. Templates contain
//! `<VAR>` markers that are replaced by values from a [`VariableSource`] when
//! the hole is rendered. Feedback prunes templates whose fragment choice has
//! been disabled.
//!
//! # File format
//!
//! One file per store under the dialect directory (see
//! [`HoleKind::file_name`]), one `key;template` row per line. Blank lines and
//! lines starting with `#` are ignored.

pub mod learner;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::catalog::Catalog;
use crate::error::FuzzError;
use crate::feature::{FragmentKey, HoleKind, SyntaxFeature};
use crate::feedback::FeedbackStats;
use crate::schema::DataType;
use crate::state::lock;

// ── Variables ──────────────────────────────────────────────────────────────

/// Placeholder kinds a template may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    RandomInt,
    RandomString,
    RandomColumn,
    RandomTable,
    RandomExpression,
    RandomPositiveInt,
    RandomDate,
    RandomTimestamp,
    /// Renders nothing.
    Null,
}

impl VariableKind {
    pub const ALL: [VariableKind; 9] = [
        VariableKind::RandomInt,
        VariableKind::RandomString,
        VariableKind::RandomColumn,
        VariableKind::RandomTable,
        VariableKind::RandomExpression,
        VariableKind::RandomPositiveInt,
        VariableKind::RandomDate,
        VariableKind::RandomTimestamp,
        VariableKind::Null,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VariableKind::RandomInt => "RANDOM_INT",
            VariableKind::RandomString => "RANDOM_STRING",
            VariableKind::RandomColumn => "RANDOM_COLUMN",
            VariableKind::RandomTable => "RANDOM_TABLE",
            VariableKind::RandomExpression => "RANDOM_EXPRESSION",
            VariableKind::RandomPositiveInt => "RANDOM_POSITIVE_INT",
            VariableKind::RandomDate => "RANDOM_DATE",
            VariableKind::RandomTimestamp => "RANDOM_TIMESTAMP",
            VariableKind::Null => "NULL",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, FuzzError> {
        let upper = s.trim().to_uppercase();
        VariableKind::ALL
            .into_iter()
            .find(|v| v.as_str() == upper)
            .ok_or_else(|| FuzzError::MalformedTemplate(format!("unknown variable <{s}>")))
    }

    pub fn description(&self) -> &'static str {
        match self {
            VariableKind::RandomInt => "a random integer",
            VariableKind::RandomString => "a random string without quotes",
            VariableKind::RandomColumn => "the name of an existing column of the current table",
            VariableKind::RandomTable => "the name of an existing table",
            VariableKind::RandomExpression => "a random expression over the current table",
            VariableKind::RandomPositiveInt => "a random positive integer",
            VariableKind::RandomDate => "a random date formatted as YYYY-MM-DD",
            VariableKind::RandomTimestamp => {
                "a random timestamp formatted as YYYY-MM-DD HH:MM:SS"
            }
            VariableKind::Null => "nothing; the hole is left empty",
        }
    }

    /// Variable catalog handed to the learner.
    pub fn catalog() -> String {
        let mut out = String::new();
        for v in VariableKind::ALL {
            out.push_str(&format!("<{}>: {}\n", v.as_str(), v.description()));
        }
        out.push_str("Note: Please DO NOT include other variables or identifiers.");
        out
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.as_str())
    }
}

/// Session-side provider of placeholder values.
pub trait VariableSource {
    fn render_variable(&mut self, kind: VariableKind) -> String;

    /// Uniform index in `0..len`; `len` is never zero.
    fn pick_index(&mut self, len: usize) -> usize;

    fn record_fragment(&mut self, key: FragmentKey);

    /// Holes render as `{key}` instead of a template.
    fn sketch_mode(&self) -> bool {
        false
    }

    /// Replace `TEST_TABLE`/`TEST_COLUMNi` with the objects being built.
    fn replace_test_objects(&self, text: String) -> String {
        text
    }
}

// ── Templates ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Var(VariableKind),
}

/// A parsed fill template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse `<NAME>` markers. Angle brackets around anything that is not an
    /// identifier (`<>`, `a < b`) are literal text.
    pub fn parse(source: &str) -> Result<Self, FuzzError> {
        let source = source.trim().to_string();
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut rest = source.as_str();

        while let Some(open) = rest.find('<') {
            text.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let marker = after
                .find('>')
                .map(|close| &after[..close])
                .filter(|name| {
                    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphabetic() || c == '_')
                });
            match marker {
                Some(name) => {
                    let kind = VariableKind::from_str(name).map_err(|_| {
                        FuzzError::MalformedTemplate(format!(
                            "unknown variable <{name}> in '{source}'"
                        ))
                    })?;
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Var(kind));
                    rest = &after[name.len() + 1..];
                }
                None => {
                    text.push('<');
                    rest = after;
                }
            }
        }
        text.push_str(rest);
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Ok(Self { source, segments })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn variables(&self) -> impl Iterator<Item = VariableKind> + '_ {
        self.segments.iter().filter_map(|s| match s {
            Segment::Var(v) => Some(*v),
            Segment::Text(_) => None,
        })
    }

    pub fn render(&self, vars: &mut dyn VariableSource) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(t) => out.push_str(t),
                Segment::Var(VariableKind::Null) => {}
                Segment::Var(kind) => out.push_str(&vars.render_variable(*kind)),
            }
        }
        vars.replace_test_objects(out)
    }
}

// ── Store ──────────────────────────────────────────────────────────────────

/// Templates for one hole category.
#[derive(Debug)]
pub struct FragmentStore {
    hole: HoleKind,
    entries: Mutex<BTreeMap<String, Vec<Template>>>,
}

impl FragmentStore {
    pub fn new(hole: HoleKind) -> Self {
        Self {
            hole,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn hole(&self) -> HoleKind {
        self.hole
    }

    /// Normalize a hole key for this store.
    pub fn parse_key(&self, key: &str) -> Result<String, FuzzError> {
        let key = key.trim();
        match self.hole {
            HoleKind::Table | HoleKind::Index | HoleKind::Statement | HoleKind::Function => key
                .parse::<i64>()
                .map(|n| n.to_string())
                .map_err(|_| {
                    FuzzError::MalformedConfigRow(format!(
                        "{} store expects a numeric key, got '{key}'",
                        self.hole
                    ))
                }),
            HoleKind::Type | HoleKind::Operator => {
                if key.is_empty() {
                    Err(FuzzError::MalformedConfigRow(format!(
                        "{} store expects a type name",
                        self.hole
                    )))
                } else {
                    Ok(DataType::from_name(key).to_string().to_uppercase())
                }
            }
        }
    }

    /// Store-specific acceptance check on a template source.
    fn validate(&self, template: &Template) -> Result<(), FuzzError> {
        if self.hole == HoleKind::Statement {
            let upper = template.source().to_uppercase();
            if let Some(word) = ["CREATE", "DROP", "ALTER"]
                .into_iter()
                .find(|w| upper.contains(w))
            {
                return Err(FuzzError::MalformedTemplate(format!(
                    "statement fragment must not contain {word}: '{}'",
                    template.source()
                )));
            }
        }
        if matches!(self.hole, HoleKind::Function | HoleKind::Operator)
            && template.variables().next().is_some()
        {
            return Err(FuzzError::MalformedTemplate(format!(
                "{} fragment must be a plain name: '{}'",
                self.hole,
                template.source()
            )));
        }
        Ok(())
    }

    /// Merge templates under `key`, dropping duplicates and malformed ones.
    ///
    /// Returns the sources that were newly accepted.
    pub fn ingest<I, S>(&self, key: &str, templates: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut accepted = Vec::new();
        let mut parsed = Vec::new();
        for raw in templates {
            let raw = raw.as_ref();
            let raw = if self.hole == HoleKind::Function {
                raw.trim().trim_matches('\'').trim_matches('"').to_uppercase()
            } else {
                raw.to_string()
            };
            match Template::parse(&raw).and_then(|t| self.validate(&t).map(|_| t)) {
                Ok(t) => parsed.push(t),
                Err(e) => {
                    tracing::warn!(hole = %self.hole, key, error = %e, "rejected fragment");
                }
            }
        }

        let mut entries = lock(&self.entries);
        let list = entries.entry(key.to_string()).or_default();
        for template in parsed {
            if list.iter().any(|t| t.source() == template.source()) {
                continue;
            }
            accepted.push(template.source().to_string());
            list.push(template);
        }
        accepted
    }

    /// Render a random surviving template for `key`.
    pub fn choose(&self, key: &str, vars: &mut dyn VariableSource) -> String {
        self.choose_with(key, vars, true)
    }

    /// As [`FragmentStore::choose`], optionally without recording the choice.
    pub fn choose_with(&self, key: &str, vars: &mut dyn VariableSource, record: bool) -> String {
        if vars.sketch_mode() {
            return format!("{{{key}}}");
        }
        let template = {
            let entries = lock(&self.entries);
            match entries.get(key) {
                Some(list) if !list.is_empty() => list[vars.pick_index(list.len())].clone(),
                _ => return String::new(),
            }
        };
        if record {
            vars.record_fragment(FragmentKey::new(self.hole, key, template.source()));
        }
        template.render(vars)
    }

    /// Drop every template whose fragment choice is disabled.
    pub fn prune_by_feedback(&self, stats: &FeedbackStats) -> usize {
        let mut removed = 0;
        let mut entries = lock(&self.entries);
        for (key, list) in entries.iter_mut() {
            let before = list.len();
            list.retain(|t| {
                stats.option(&SyntaxFeature::Fragment(FragmentKey::new(
                    self.hole,
                    key.clone(),
                    t.source(),
                )))
            });
            removed += before - list.len();
        }
        if removed > 0 {
            tracing::debug!(hole = %self.hole, removed, "pruned fragments");
        }
        removed
    }

    pub fn remove(&self, key: &str, source: &str) {
        if let Some(list) = lock(&self.entries).get_mut(key) {
            list.retain(|t| t.source() != source);
        }
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.entries).keys().cloned().collect()
    }

    /// Sources of the templates under `key`.
    pub fn sources(&self, key: &str) -> Vec<String> {
        lock(&self.entries)
            .get(key)
            .map(|list| list.iter().map(|t| t.source().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn has_templates(&self, key: &str) -> bool {
        lock(&self.entries)
            .get(key)
            .is_some_and(|list| !list.is_empty())
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `key,template` lines of every entry.
    pub fn examples(&self) -> String {
        let entries = lock(&self.entries);
        let mut out = String::new();
        for (key, list) in entries.iter() {
            for t in list {
                out.push_str(&format!("{key},{}\n", t.source()));
            }
        }
        out
    }

    /// Parse one `key;template` row. `Ok(None)` for blank and comment lines.
    pub fn parse_line(&self, line: &str) -> Result<Option<(String, String)>, FuzzError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            return Ok(None);
        }
        let (key, template) = line.split_once(';').ok_or_else(|| {
            FuzzError::MalformedConfigRow(format!("expected 'key;template', got '{line}'"))
        })?;
        let key = self.parse_key(key)?;
        let mut template = template.trim().to_string();
        if self.hole == HoleKind::Statement {
            template = rewrite_test_objects(&template);
        }
        Ok(Some((key, template)))
    }

    /// Load a fragment file, skipping rows disabled in `stats`.
    ///
    /// Malformed rows are logged and skipped. Returns the number of
    /// accepted templates.
    pub fn load_file(&self, path: &Path, stats: &FeedbackStats) -> Result<usize, FuzzError> {
        let text = fs::read_to_string(path)?;
        let mut loaded = 0;
        for (lineno, line) in text.lines().enumerate() {
            match self.parse_line(line) {
                Ok(Some((key, template))) => {
                    let feature =
                        SyntaxFeature::Fragment(FragmentKey::new(self.hole, &key, template.trim()));
                    if !stats.option(&feature) {
                        continue;
                    }
                    loaded += self.ingest(&key, [template]).len();
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        line = lineno + 1,
                        error = %e,
                        "skipping fragment row"
                    );
                }
            }
        }
        Ok(loaded)
    }

    /// Write `<session>-<HOLE>-config.txt` with one `key,template` line each.
    pub fn dump(&self, dir: &Path, session: &str) -> Result<PathBuf, FuzzError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{session}-{}-config.txt", self.hole));
        let mut file = fs::File::create(&path)?;
        file.write_all(self.examples().as_bytes())?;
        Ok(path)
    }
}

/// `TEST_TABLE` → `<RANDOM_TABLE>`, `TEST_COLUMN<n>` → `<RANDOM_COLUMN>`.
fn rewrite_test_objects(template: &str) -> String {
    let columns = regex_lite::Regex::new(r"TEST_COLUMN\d*")
        .map(|re| re.replace_all(template, "<RANDOM_COLUMN>").into_owned())
        .unwrap_or_else(|_| template.to_string());
    columns.replace("TEST_TABLE", "<RANDOM_TABLE>")
}

// ── All stores ─────────────────────────────────────────────────────────────

/// One store per hole category.
#[derive(Debug)]
pub struct FragmentStores {
    stores: [FragmentStore; 6],
}

impl Default for FragmentStores {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentStores {
    pub fn new() -> Self {
        Self {
            stores: HoleKind::ALL.map(FragmentStore::new),
        }
    }

    pub fn get(&self, hole: HoleKind) -> &FragmentStore {
        let index = HoleKind::ALL
            .iter()
            .position(|h| *h == hole)
            .unwrap_or_default();
        &self.stores[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &FragmentStore> {
        self.stores.iter()
    }

    /// Load every store file present in `dir`.
    pub fn load_dir(&self, dir: &Path, stats: &FeedbackStats) -> usize {
        let mut total = 0;
        for store in &self.stores {
            let path = dir.join(store.hole().file_name());
            if !path.exists() {
                continue;
            }
            match store.load_file(&path, stats) {
                Ok(n) => total += n,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot read fragment file");
                }
            }
        }
        total
    }

    pub fn prune_by_feedback(&self, stats: &FeedbackStats) -> usize {
        self.stores.iter().map(|s| s.prune_by_feedback(stats)).sum()
    }

    /// Push function, operator and type entries into the catalog and
    /// recompute type availability.
    pub fn sync_catalog(&self, catalog: &mut Catalog) {
        let functions = self.get(HoleKind::Function);
        for key in functions.keys() {
            let Ok(arity) = key.parse::<i32>() else {
                continue;
            };
            for name in functions.sources(&key) {
                catalog.add_function(&name, arity);
            }
        }

        let operators = self.get(HoleKind::Operator);
        for key in operators.keys() {
            let returns = DataType::from_name(&key);
            for op in operators.sources(&key) {
                catalog.add_operator(&op, returns.clone());
            }
        }

        let types = self.get(HoleKind::Type);
        for key in types.keys() {
            catalog.types.register(&key);
            catalog.types.set_available(&key, types.has_templates(&key));
        }
    }

    pub fn dump_all(&self, dir: &Path, session: &str) -> Result<(), FuzzError> {
        for store in &self.stores {
            store.dump(dir, session)?;
        }
        Ok(())
    }
}
