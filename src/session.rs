//! One fuzzing session and the driver loop around it.
//!
//! A session owns one database on the target. It builds a random schema,
//! runs the scheduled statements, runs oracle checks until one reports a
//! novel mismatch or the query budget is spent, and folds what it observed
//! into the shared statistics on teardown.
//!
//! # Lifecycle
//!
//! ```text
//! prepare_learning → build_database → run_oracles(n) → teardown(status)
//! ```
//!
//! [`run`] drives sessions on `num_threads` worker threads that pull
//! database numbers from a shared counter, all over one [`EngineState`].

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::FuzzConfig;
use crate::connection::{Connector, SqlConnection};
use crate::error::{FuzzError, Outcome, RetryPolicy, RetryState, Skip};
use crate::feature::HoleKind;
use crate::feedback::FeedbackController;
use crate::fragments::Template;
use crate::fragments::learner::{FragmentLearner, fill_sketch};
use crate::generator::statement::{Action, SKETCH_TABLE, Statement};
use crate::generator::{GenOptions, Generator, Randomly};
use crate::oracle::{self, BugReport, OracleContext, OracleKind};
use crate::report;
use crate::schema::{Column, DataType, Schema, Table};
use crate::state::{EngineState, lock};

/// Scratch table used when validating learned fragments.
const VALIDATION_TABLE: &str = "TEST_FEATURE";
/// Hole categories learned from generator sketches.
const SKETCH_HOLES: [HoleKind; 3] = [HoleKind::Table, HoleKind::Index, HoleKind::Statement];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Passed,
    Failed,
}

/// Tally of one session's oracle checks.
#[derive(Debug, Default)]
pub struct CheckSummary {
    pub passed: u32,
    pub inconclusive: u32,
    pub duplicates: u32,
    pub skipped: u32,
    pub bug: Option<Box<BugReport>>,
}

pub struct Session {
    id: String,
    engine: Arc<EngineState>,
    feedback: FeedbackController,
    rng: Randomly,
    schema: Schema,
    /// Statements that succeeded, in order.
    log: Vec<String>,
    conn: Box<dyn SqlConnection>,
    first_database: bool,
    preferred_type: Option<DataType>,
    built: bool,
}

impl Session {
    pub fn new(
        engine: Arc<EngineState>,
        id: impl Into<String>,
        conn: Box<dyn SqlConnection>,
        seed: Option<u64>,
    ) -> Self {
        let id = id.into();
        let feedback = FeedbackController::new(Arc::clone(&engine.feedback), id.clone());
        let first_database = feedback.execution_count() == 0;
        Self {
            id,
            engine,
            feedback,
            rng: seed.map(Randomly::new).unwrap_or_else(Randomly::from_entropy),
            schema: Schema::default(),
            log: Vec::new(),
            conn,
            first_database,
            preferred_type: None,
            built: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Statements that succeeded so far.
    pub fn statements(&self) -> &[String] {
        &self.log
    }

    pub fn feedback(&self) -> &FeedbackController {
        &self.feedback
    }

    fn options(&self, record_type_fragments: bool) -> GenOptions {
        GenOptions {
            sketch: false,
            record_type_fragments,
            preferred_type: self.preferred_type.clone(),
        }
    }

    fn table_name(&self, index: usize) -> String {
        if self.engine.config.create_database_per_session {
            format!("t{index}")
        } else {
            format!("{}{}t{index}", self.id, self.engine.config.table_delimiter)
        }
    }

    // ── Execution ──────────────────────────────────────────────────────────

    /// Execute a generated statement and finalize its record.
    ///
    /// Returns whether it succeeded. The schema delta is applied only on
    /// success. Errors outside the expected set are returned.
    pub fn execute(&mut self, statement: Statement) -> Result<bool, FuzzError> {
        let Statement { sql, node, delta } = statement;
        match self.conn.execute(&sql) {
            Ok(()) => {
                self.feedback.finalize(true, false, Some(&sql));
                if let Some(delta) = delta {
                    delta.apply(&mut self.schema);
                }
                tracing::trace!(session = %self.id, sql = %sql, "executed");
                self.log.push(sql);
                Ok(true)
            }
            Err(e) if e.is_connection() => {
                self.feedback.discard();
                Err(e.into_fuzz_error(&sql))
            }
            Err(e) => {
                self.feedback.finalize(false, false, None);
                if self.engine.expected.is_expected(&e) {
                    tracing::debug!(session = %self.id, statement = %node, error = %e, "statement failed");
                    Ok(false)
                } else {
                    Err(e.into_fuzz_error(&sql))
                }
            }
        }
    }

    /// Run a statement that is not generated and not part of the feedback.
    fn execute_plain(&mut self, sql: &str) -> Result<bool, FuzzError> {
        match self.conn.execute(sql) {
            Ok(()) => Ok(true),
            Err(e) if e.is_connection() => Err(e.into_fuzz_error(sql)),
            Err(e) => {
                tracing::debug!(session = %self.id, sql, error = %e, "maintenance statement failed");
                Ok(false)
            }
        }
    }

    // ── Learning ───────────────────────────────────────────────────────────

    /// Learn a type topic and, on the first database, the sketch holes.
    pub fn prepare_learning(&mut self) -> Result<(), FuzzError> {
        let engine = Arc::clone(&self.engine);
        if !engine.config.enable_learning {
            return Ok(());
        }
        if let Some(topic) = engine.learning.pick_topic(&mut self.rng, self.first_database) {
            engine.learning.learn_topic(&engine, &topic);
            lock(&engine.catalog).types.set_available(&topic, true);
            self.preferred_type = Some(DataType::from_name(&topic));
        }
        if !self.first_database {
            return Ok(());
        }

        for hole in SKETCH_HOLES {
            let sketch = {
                let mut generator = Generator::new(
                    &mut self.rng,
                    &mut self.feedback,
                    engine.as_ref(),
                    &self.schema,
                    GenOptions::default(),
                );
                generator.sketch(hole)
            };
            self.feedback.discard();
            let Some(sketch) = sketch else { continue };
            let learned = engine.learning.learn_sketch(&engine, hole, &sketch);
            if engine.config.enable_direct_validation && !learned.is_empty() {
                self.validate_learned(hole, &sketch, &learned)?;
            }
        }
        engine.sync_catalog();
        Ok(())
    }

    /// Execute each learned fragment inside its sketch on a scratch table and
    /// drop the ones the target rejects.
    fn validate_learned(
        &mut self,
        hole: HoleKind,
        sketch: &str,
        learned: &[(String, String)],
    ) -> Result<usize, FuzzError> {
        let engine = Arc::clone(&self.engine);
        let scratch = validation_schema();
        let mut rejected = 0;
        for (key, source) in learned {
            let Ok(index) = key.parse::<usize>() else {
                continue;
            };
            let rendered = match Template::parse(source) {
                Ok(template) => {
                    let mut generator = Generator::new(
                        &mut self.rng,
                        &mut self.feedback,
                        engine.as_ref(),
                        &scratch,
                        GenOptions::default(),
                    );
                    generator.focus_table(VALIDATION_TABLE);
                    template.render(&mut generator)
                }
                Err(_) => continue,
            };
            self.feedback.discard();

            self.execute_plain(&format!("DROP TABLE IF EXISTS {VALIDATION_TABLE}"))?;
            let mut accepted = true;
            for sql in validation_script(hole, sketch, index, &rendered) {
                if !self.execute_plain(&sql)? {
                    accepted = false;
                    break;
                }
            }
            if !accepted {
                engine.stores.get(hole).remove(key, source);
                rejected += 1;
            }
        }
        self.execute_plain(&format!("DROP TABLE IF EXISTS {VALIDATION_TABLE}"))?;
        tracing::info!(session = %self.id, hole = %hole, rejected, "validated learned fragments");
        Ok(rejected)
    }

    // ── Database ───────────────────────────────────────────────────────────

    /// Create the tables, run the scheduled statements and check the views.
    pub fn build_database(&mut self) -> Result<(), FuzzError> {
        let engine = Arc::clone(&self.engine);
        let config = &engine.config;

        let tables = 1 + self.rng.below(config.max_tables as usize);
        for i in 0..tables {
            let name = self.table_name(i);
            self.create_table(&name)?;
        }
        if self.schema.base_tables().is_empty() {
            return Err(FuzzError::SetupFailed(format!(
                "no table could be created within {} attempts",
                config.table_retry_budget
            )));
        }

        let mut actions = Vec::new();
        for action in Action::ALL {
            if action == Action::GeneralCommand || !self.feedback.node_option(action.node()) {
                continue;
            }
            let count = action.count(&mut self.rng, config);
            actions.extend(std::iter::repeat_n(action, count as usize));
        }
        self.rng.shuffle(&mut actions);
        for action in actions {
            self.run_action(action)?;
        }

        self.validate_views()?;
        self.guard_join_size()?;

        if self.feedback.node_option(Action::GeneralCommand.node()) {
            let count = Action::GeneralCommand.count(&mut self.rng, config);
            for _ in 0..count {
                self.run_action(Action::GeneralCommand)?;
            }
        }

        self.built = true;
        tracing::info!(
            session = %self.id,
            tables = self.schema.base_tables().len(),
            views = self.schema.views().len(),
            statements = self.log.len(),
            "database built"
        );
        Ok(())
    }

    fn run_action(&mut self, action: Action) -> Result<bool, FuzzError> {
        let options = self.options(true);
        let generated = Generator::new(
            &mut self.rng,
            &mut self.feedback,
            self.engine.as_ref(),
            &self.schema,
            options,
        )
        .generate_action(action);
        match generated {
            Outcome::Done(statement) => self.execute(statement),
            Outcome::Skipped(skip) => {
                tracing::trace!(session = %self.id, reason = skip.as_str(), "action skipped");
                self.feedback.discard();
                Ok(false)
            }
        }
    }

    /// Create `name`, retrying within the table budget. A table that cannot
    /// be selected from is dropped again.
    fn create_table(&mut self, name: &str) -> Result<(), FuzzError> {
        let policy = RetryPolicy::attempts_only(self.engine.config.table_retry_budget);
        let mut retry = RetryState::new();
        loop {
            let options = self.options(true);
            let statement = Generator::new(
                &mut self.rng,
                &mut self.feedback,
                self.engine.as_ref(),
                &self.schema,
                options,
            )
            .generate_create_table(name);

            if self.execute(statement)? {
                match self.conn.query(&format!("SELECT * FROM {name}")) {
                    Ok(_) => return Ok(()),
                    Err(e) if e.is_connection() => return Err(e.into_fuzz_error(name)),
                    Err(e) => {
                        tracing::debug!(session = %self.id, table = name, error = %e, "table not selectable");
                        self.execute_plain(&format!("DROP TABLE {name}"))?;
                        self.schema.remove(name);
                        self.log.retain(|sql| !sql.contains(&format!("TABLE {name}(")));
                    }
                }
            }
            if !retry.record_failure(&policy) {
                tracing::warn!(session = %self.id, table = name, attempts = retry.attempts, "giving up on table");
                return Ok(());
            }
        }
    }

    /// Drop views the target cannot select from.
    fn validate_views(&mut self) -> Result<(), FuzzError> {
        let views: Vec<String> = self.schema.views().iter().map(|v| v.name.clone()).collect();
        for view in views {
            match self.conn.query(&format!("SELECT * FROM {view}")) {
                Ok(_) => {}
                Err(e) if e.is_connection() => return Err(e.into_fuzz_error(&view)),
                Err(e) => {
                    tracing::debug!(session = %self.id, view = %view, error = %e, "dropping invalid view");
                    self.drop_view(&view)?;
                }
            }
        }
        Ok(())
    }

    fn drop_view(&mut self, view: &str) -> Result<(), FuzzError> {
        for sql in [format!("DROP VIEW {view}"), format!("DROP MATERIALIZED VIEW {view}")] {
            if self.execute_plain(&sql)? {
                self.log.push(sql);
                break;
            }
        }
        self.schema.remove(view);
        Ok(())
    }

    /// Drop every view once the cross join of all tables gets too large.
    fn guard_join_size(&mut self) -> Result<(), FuzzError> {
        if self.schema.views().is_empty() {
            return Ok(());
        }
        let names: Vec<String> = self.schema.tables.iter().map(|t| t.name.clone()).collect();
        let sql = format!("SELECT COUNT(*) FROM {}", names.join(", "));
        let rows = match self.conn.query(&sql) {
            Ok(rows) => rows,
            Err(e) if e.is_connection() => return Err(e.into_fuzz_error(&sql)),
            Err(e) => {
                tracing::debug!(session = %self.id, error = %e, "join size unknown");
                return Ok(());
            }
        };
        let count = rows
            .first()
            .and_then(|row| row.first())
            .and_then(|v| v.as_deref())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        if count > self.engine.config.join_row_limit {
            tracing::info!(session = %self.id, count, "join too large, dropping views");
            let views: Vec<String> = self.schema.views().iter().map(|v| v.name.clone()).collect();
            for view in views {
                self.drop_view(&view)?;
            }
        }
        Ok(())
    }

    // ── Oracles ────────────────────────────────────────────────────────────

    /// Run up to `n` checks, alternating the oracles. Stops at the first
    /// novel mismatch.
    pub fn run_oracles(&mut self, n: u32) -> Result<CheckSummary, FuzzError> {
        let engine = Arc::clone(&self.engine);
        let config = &engine.config;
        let mut summary = CheckSummary::default();

        for i in 0..n {
            let kind = OracleKind::ALL[i as usize % OracleKind::ALL.len()];
            let options = self.options(false);
            let mut generator = Generator::new(
                &mut self.rng,
                &mut self.feedback,
                engine.as_ref(),
                &self.schema,
                options,
            );
            let mut ctx = OracleContext {
                conn: self.conn.as_mut(),
                auto_index: config.auto_index_selects,
                setup: &self.log,
            };
            match oracle::check(kind, &mut generator, &mut ctx) {
                Ok(Outcome::Done(())) => summary.passed += 1,
                Ok(Outcome::Skipped(Skip::Inconclusive)) => summary.inconclusive += 1,
                Ok(Outcome::Skipped(_)) => summary.skipped += 1,
                Err(FuzzError::OracleViolation(report)) => {
                    if config.enable_error_handling && config.use_deduplicator {
                        match self.feedback.check_duplicate() {
                            Outcome::Done(()) => {}
                            Outcome::Skipped(_) => {
                                tracing::info!(session = %self.id, oracle = %kind, "duplicate mismatch skipped");
                                summary.duplicates += 1;
                                continue;
                            }
                        }
                    }
                    tracing::error!(
                        session = %self.id,
                        oracle = %kind,
                        fingerprint = report.fingerprint,
                        message = %report.message,
                        "logic bug candidate"
                    );
                    let dir = config.log_dir.join("reproducers");
                    match report.reproducer.save(&dir) {
                        Ok(path) => tracing::info!(path = %path.display(), "reproducer written"),
                        Err(e) => tracing::warn!(error = %e, "cannot write reproducer"),
                    }
                    summary.bug = Some(report);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(
            session = %self.id,
            passed = summary.passed,
            inconclusive = summary.inconclusive,
            duplicates = summary.duplicates,
            "oracle checks done"
        );
        Ok(summary)
    }

    // ── Teardown ───────────────────────────────────────────────────────────

    /// Fold statistics, update flags and write the reports.
    pub fn teardown(&mut self, status: SessionStatus) {
        let engine = Arc::clone(&self.engine);
        let config = &engine.config;

        if config.enable_learning
            && let Err(e) = engine.stores.dump_all(&config.log_dir.join("fragments"), &self.id)
        {
            tracing::warn!(session = %self.id, error = %e, "cannot dump fragments");
        }

        if config.enable_feedback {
            self.feedback.compute_averages();
            engine.update_options();
            engine.prune_fragments();
            if config.enable_learning {
                self.relearn_exhausted(&engine);
            }
        }

        if status == SessionStatus::Failed {
            self.feedback.save_terminal_record();
            if let Some(record) = self.feedback.last_record()
                && let Err(e) = report::write_feature_dump(&config.log_dir, &self.id, record)
            {
                tracing::warn!(session = %self.id, error = %e, "cannot write feature dump");
            }
        }

        if let Err(e) = engine.export_statistics() {
            tracing::warn!(session = %self.id, error = %e, "cannot export statistics");
        }
        if self.built {
            self.feedback.increment_depth();
        }
        self.feedback.mark_execution();
    }

    /// Learn sketch holes again once pruning emptied their store.
    fn relearn_exhausted(&self, engine: &EngineState) {
        for hole in SKETCH_HOLES {
            if !engine.stores.get(hole).is_empty() {
                continue;
            }
            if let Some(sketch) = engine.learning.sketch(hole) {
                tracing::info!(session = %self.id, hole = %hole, "relearning exhausted store");
                engine.learning.learn_sketch(engine, hole, &sketch);
            }
        }
    }
}

fn validation_schema() -> Schema {
    Schema {
        tables: vec![Table::new(
            VALIDATION_TABLE,
            vec![
                Column::new("TEST_COLUMN0", DataType::Int),
                Column::new("TEST_COLUMN1", DataType::Varchar(None)),
            ],
        )],
    }
}

/// Statements that exercise `fill` at hole `index` of `sketch`.
pub fn validation_script(hole: HoleKind, sketch: &str, index: usize, fill: &str) -> Vec<String> {
    match hole {
        HoleKind::Statement => vec![
            format!("CREATE TABLE {VALIDATION_TABLE} (TEST_COLUMN0 INT, TEST_COLUMN1 VARCHAR)"),
            format!("INSERT INTO {VALIDATION_TABLE} VALUES (1, 'a')"),
            fill.to_string(),
        ],
        _ => split_statements(&fill_sketch(sketch, index, fill).replace(SKETCH_TABLE, VALIDATION_TABLE)),
    }
}

/// Split a script on `;`, dropping `--` comments and blank statements.
pub fn split_statements(script: &str) -> Vec<String> {
    script
        .split(';')
        .map(|chunk| {
            chunk
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|sql| !sql.is_empty())
        .collect()
}

// ── Driver ─────────────────────────────────────────────────────────────────

/// Totals of one [`run`].
#[derive(Debug, Default)]
pub struct RunSummary {
    pub sessions: u32,
    pub errors: u32,
    pub bugs: Vec<BugReport>,
}

fn connect_with_retry(connector: &dyn Connector, database: &str) -> Result<Box<dyn SqlConnection>, FuzzError> {
    let policy = RetryPolicy::default();
    let mut attempt = 0;
    loop {
        match connector.connect(database) {
            Ok(conn) => return Ok(conn),
            Err(e) if e.is_retryable() && policy.should_retry(attempt + 1) => {
                let delay = policy.backoff_ms(attempt);
                tracing::warn!(database, attempt, delay_ms = delay, error = %e, "connect failed, retrying");
                std::thread::sleep(Duration::from_millis(delay));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run one full session on `conn`.
///
/// Returns the session's bug report, if any. Teardown runs in every case.
pub fn run_session(
    engine: &Arc<EngineState>,
    database: &str,
    conn: Box<dyn SqlConnection>,
    seed: Option<u64>,
) -> Result<Option<Box<BugReport>>, FuzzError> {
    let mut session = Session::new(Arc::clone(engine), database, conn, seed);
    if let Err(e) = session.prepare_learning() {
        tracing::warn!(session = database, error = %e, "learning failed");
    }
    let result = session
        .build_database()
        .and_then(|()| session.run_oracles(engine.config.num_queries));
    let status = match &result {
        Ok(summary) if summary.bug.is_some() => SessionStatus::Failed,
        Err(FuzzError::UnexpectedSql { .. }) => SessionStatus::Failed,
        _ => SessionStatus::Passed,
    };
    session.teardown(status);
    result.map(|summary| summary.bug)
}

/// Fuzz `num_databases` databases on `num_threads` threads.
pub fn run(
    config: FuzzConfig,
    connector: Arc<dyn Connector>,
    learner: Arc<dyn FragmentLearner>,
) -> Result<RunSummary, FuzzError> {
    let engine = Arc::new(EngineState::new(config, learner)?);
    engine.initialize()?;

    let next = Arc::new(AtomicU32::new(0));
    let summary = Arc::new(Mutex::new(RunSummary::default()));
    let threads = engine.config.num_threads;
    tracing::info!(
        dialect = %engine.config.dialect_name,
        databases = engine.config.num_databases,
        threads,
        "starting run"
    );

    let handles: Vec<_> = (0..threads)
        .map(|worker| {
            let engine = Arc::clone(&engine);
            let connector = Arc::clone(&connector);
            let next = Arc::clone(&next);
            let summary = Arc::clone(&summary);
            std::thread::Builder::new()
                .name(format!("fuzz-worker-{worker}"))
                .spawn(move || worker_loop(&engine, connector.as_ref(), &next, &summary))
        })
        .collect::<std::io::Result<_>>()?;

    for handle in handles {
        if handle.join().is_err() {
            tracing::error!("worker thread panicked");
            lock(&summary).errors += 1;
        }
    }

    let summary = std::mem::take(&mut *lock(&summary));
    tracing::info!(
        sessions = summary.sessions,
        errors = summary.errors,
        bugs = summary.bugs.len(),
        "run finished"
    );
    Ok(summary)
}

fn worker_loop(
    engine: &Arc<EngineState>,
    connector: &dyn Connector,
    next: &AtomicU32,
    summary: &Mutex<RunSummary>,
) {
    loop {
        let index = next.fetch_add(1, Ordering::Relaxed);
        if index >= engine.config.num_databases {
            return;
        }
        let database = format!("database{index}");
        let seed = engine.config.seed.map(|s| s.wrapping_add(u64::from(index)));

        let outcome = connect_with_retry(connector, &database)
            .and_then(|conn| run_session(engine, &database, conn, seed));
        let mut summary = lock(summary);
        summary.sessions += 1;
        match outcome {
            Ok(Some(bug)) => summary.bugs.push(*bug),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(session = %database, kind = %e.kind(), error = %e, "session aborted");
                summary.errors += 1;
            }
        }
    }
}

/// Execute every statement of a `;`-separated script.
///
/// Returns whether all of them succeeded.
pub fn reproduce_from_file(path: &Path, conn: &mut dyn SqlConnection) -> Result<bool, FuzzError> {
    let script = std::fs::read_to_string(path)?;
    let mut all_ok = true;
    for sql in split_statements(&script) {
        match conn.execute(&sql) {
            Ok(()) => tracing::info!(sql = %sql, "ok"),
            Err(e) if e.is_connection() => return Err(e.into_fuzz_error(&sql)),
            Err(e) => {
                tracing::warn!(sql = %sql, error = %e, "statement failed");
                all_ok = false;
            }
        }
    }
    Ok(all_ok)
}
