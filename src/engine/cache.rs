//! Compiled rule snapshots.
//!
//! Compilation runs once per configuration change, not per request. The cache
//! keys snapshots by `(account, stage)` and remembers the configuration
//! timestamp each one was built from:
//!
//! ```text
//! get_or_compile(account, config, stage)
//!   ├─ cached timestamp == config timestamp ─▶ Arc<Rule> (shared snapshot)
//!   └─ otherwise ─▶ StageCompiler::compile ─▶ replace entry ─▶ Arc<Rule>
//! ```
//!
//! Replacing an entry never touches requests still holding the previous
//! `Arc`. A configuration without a timestamp cannot be versioned and is
//! compiled on every call.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::RwLock;
use tracing::debug;

use super::compiler::StageCompiler;
use super::rule::Rule;
use crate::Stage;
use crate::config::AccountConfig;
use crate::error::ConfigError;

struct CachedRule<T, C> {
    timestamp: NaiveDateTime,
    rule: Arc<Rule<T, C>>,
}

pub struct RuleCache<T, C> {
    entries: RwLock<HashMap<(String, Stage), CachedRule<T, C>>>,
}

impl<T, C> RuleCache<T, C> {
    pub fn new() -> Self {
        RuleCache { entries: RwLock::new(HashMap::new()) }
    }

    pub fn get_or_compile(
        &self,
        account: &str,
        config: &AccountConfig,
        stage: Stage,
        compiler: &StageCompiler<'_, T, C>,
    ) -> Result<Arc<Rule<T, C>>, ConfigError> {
        let Some(timestamp) = config.parsed_timestamp()? else {
            debug!(account, %stage, "configuration has no timestamp, compiling uncached");
            return Ok(Arc::new(compiler.compile(config, stage)?));
        };

        let key = (account.to_string(), stage);
        if let Some(cached) = self.entries.read().get(&key) {
            if cached.timestamp == timestamp {
                return Ok(Arc::clone(&cached.rule));
            }
        }

        debug!(account, %stage, %timestamp, "compiling stage rule");
        let rule = Arc::new(compiler.compile(config, stage)?);
        self.entries.write().insert(key, CachedRule { timestamp, rule: Arc::clone(&rule) });
        Ok(rule)
    }

    /// Drop every snapshot of `account`.
    pub fn invalidate(&self, account: &str) {
        self.entries.write().retain(|(cached_account, _), _| cached_account != account);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<T, C> Default for RuleCache<T, C> {
    fn default() -> Self {
        Self::new()
    }
}
