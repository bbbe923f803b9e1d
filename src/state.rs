//! Process-wide fuzzing state.
//!
//! Every session thread shares one [`EngineState`]: the feedback statistics,
//! the fragment stores, the dialect catalog and the learner. Each piece owns
//! its own lock so sessions only serialize on what they touch. Locks are
//! never nested across `stats` and `catalog`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::catalog::Catalog;
use crate::config::FuzzConfig;
use crate::connection::ExpectedErrors;
use crate::error::FuzzError;
use crate::feature::HoleKind;
use crate::feedback::SharedFeedback;
use crate::fragments::FragmentStores;
use crate::fragments::learner::{FragmentLearner, LearningManager};
use crate::report;

/// File in the dialect directory listing features disabled up front.
pub const DISABLED_OPTIONS_FILE: &str = "disabled-options.csv";
/// Statistics export written under the log directory.
pub const STATISTICS_FILE: &str = "statistics.csv";

/// Lock a mutex, recovering the data if a session thread panicked while
/// holding it.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared context passed to every session.
pub struct EngineState {
    pub config: FuzzConfig,
    pub feedback: Arc<SharedFeedback>,
    pub stores: FragmentStores,
    pub catalog: Mutex<Catalog>,
    pub learning: LearningManager,
    pub learner: Arc<dyn FragmentLearner>,
    /// Errors that do not count as findings for generated statements.
    pub expected: ExpectedErrors,
}

impl std::fmt::Debug for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineState")
            .field("dialect", &self.config.dialect_name)
            .field("fragments", &self.stores.iter().map(|s| s.len()).sum::<usize>())
            .finish_non_exhaustive()
    }
}

impl EngineState {
    /// Build an empty state. Call [`initialize`](Self::initialize) to load
    /// the dialect configuration.
    pub fn new(config: FuzzConfig, learner: Arc<dyn FragmentLearner>) -> Result<Self, FuzzError> {
        config.validate()?;
        let expected = ExpectedErrors::from_patterns(&config.expected_errors)?;
        Ok(Self {
            feedback: Arc::new(SharedFeedback::new(&config)),
            stores: FragmentStores::new(),
            catalog: Mutex::new(Catalog::new()),
            learning: LearningManager::new(),
            learner,
            expected,
            config,
        })
    }

    /// Load disabled options and fragment files, then learn the basic
    /// stores if learning is on and nothing was loaded.
    pub fn initialize(&self) -> Result<(), FuzzError> {
        let dialect_dir = self.config.dialect_dir();

        let disabled = dialect_dir.join(DISABLED_OPTIONS_FILE);
        if disabled.exists() {
            let file = std::fs::File::open(&disabled)?;
            let applied =
                report::load_disabled_options(std::io::BufReader::new(file), &mut lock(&self.feedback.stats))?;
            tracing::info!(path = %disabled.display(), applied, "loaded disabled options");
        }

        let mut loaded = 0;
        {
            let stats = lock(&self.feedback.stats);
            if let Some(dir) = self.config.compatible_dir() {
                loaded += self.stores.load_dir(&dir, &stats);
            }
            loaded += self.stores.load_dir(&dialect_dir, &stats);
        }
        self.sync_catalog();
        self.revalidate_functions();
        self.learning.refresh_topics(self);
        tracing::info!(
            dialect = %self.config.dialect_name,
            dir = %dialect_dir.display(),
            loaded,
            "fragment stores initialized"
        );

        if self.config.enable_learning && self.stores.get(HoleKind::Type).is_empty() {
            self.learning.learn_types(self);
            self.learning.learn_functions(self);
            self.learning.learn_operators(self);
            self.revalidate_functions();
        }
        Ok(())
    }

    /// Push learned functions, operators and types into the catalog.
    pub fn sync_catalog(&self) {
        self.stores.sync_catalog(&mut lock(&self.catalog));
    }

    /// Function signatures and supported type names, read under the catalog
    /// lock alone.
    fn signatures(&self) -> (Vec<(String, usize)>, Vec<String>) {
        let catalog = lock(&self.catalog);
        (
            catalog.function_signatures(),
            catalog.supported_type_names(self.config.enable_extra_features),
        )
    }

    fn revalidate_functions(&self) {
        let (functions, types) = self.signatures();
        lock(&self.feedback.stats).revalidate_functions(&functions, &types);
    }

    /// Recompute every enablement flag from the folded statistics.
    pub fn update_options(&self) {
        if !self.config.enable_feedback {
            return;
        }
        let (functions, types) = self.signatures();
        lock(&self.feedback.stats).update_options(&functions, &types);
    }

    /// Drop templates whose fragment feature was disabled, then refresh type
    /// availability.
    pub fn prune_fragments(&self) -> usize {
        let pruned = {
            let stats = lock(&self.feedback.stats);
            self.stores.prune_by_feedback(&stats)
        };
        if pruned > 0 {
            tracing::debug!(pruned, "pruned fragment templates");
            self.sync_catalog();
        }
        pruned
    }

    /// Write the statistics CSV under the log directory.
    pub fn export_statistics(&self) -> Result<PathBuf, FuzzError> {
        std::fs::create_dir_all(&self.config.log_dir)?;
        let path = self.config.log_dir.join(STATISTICS_FILE);
        report::write_statistics(&path, &lock(&self.feedback.stats))?;
        Ok(path)
    }
}
