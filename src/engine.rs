use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::TwoWaySqlResult;
use crate::expr::{DefaultExpressionParser, ExpressionParser};
use crate::loader::TemplateLoader;
use crate::parser::{SqlParser, normalize_sql};
use crate::template::SqlTemplate;

/// The entry point: loads, parses, and optionally caches templates.
///
/// # Examples
///
/// ```
/// use twosql::{MapTemplateContext, SqlTemplateEngine};
///
/// let engine = SqlTemplateEngine::new();
/// let template = engine
///     .template_by_text("SELECT * FROM emp WHERE job = /*job*/'CLERK'")
///     .unwrap();
///
/// let mut context = MapTemplateContext::new();
/// context.add_variable("job", "MANAGER");
///
/// let result = template.process(&context).unwrap();
/// assert_eq!(result.sql(), "SELECT * FROM emp WHERE job = ?");
/// ```
pub struct SqlTemplateEngine {
    suffix_name: Option<String>,
    template_loader: TemplateLoader,
    expression_parser: Arc<dyn ExpressionParser>,
    cache: Mutex<HashMap<String, Arc<SqlTemplate>>>,
    cached: bool,
}

impl Default for SqlTemplateEngine {
    fn default() -> Self {
        Self {
            suffix_name: None,
            template_loader: TemplateLoader::new(),
            expression_parser: Arc::new(DefaultExpressionParser),
            cache: Mutex::new(HashMap::new()),
            cached: false,
        }
    }
}

impl SqlTemplateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a file-name suffix tried before the plain file, e.g. `oracle`
    /// to prefer `emp-oracle.sql` over `emp.sql`.
    #[must_use]
    pub fn with_suffix_name(mut self, suffix_name: impl Into<String>) -> Self {
        self.suffix_name = Some(suffix_name.into());
        self
    }

    /// Enables caching of parsed templates.
    #[must_use]
    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    /// Replaces the bundled expression language.
    #[must_use]
    pub fn with_expression_parser(mut self, parser: impl ExpressionParser + 'static) -> Self {
        self.expression_parser = Arc::new(parser);
        self
    }

    /// Loads and parses the template file at `location`.
    pub fn template(&self, location: &str) -> TwoWaySqlResult<Arc<SqlTemplate>> {
        if !self.cached {
            let text = self.load(location)?;
            return self.parse(&text);
        }

        // Get-or-compute under the lock, so each key is compiled at most
        // once even under concurrent lookups.
        let mut cache = self.lock_cache();
        if let Some(template) = cache.get(location) {
            tracing::debug!(location, "template cache hit");
            return Ok(Arc::clone(template));
        }
        let text = self.load(location)?;
        let template = self.parse(&text)?;
        cache.insert(location.to_string(), Arc::clone(&template));
        Ok(template)
    }

    /// Parses an in-memory template. When caching is enabled the cache key
    /// is a hash of the text itself.
    pub fn template_by_text(&self, sql: &str) -> TwoWaySqlResult<Arc<SqlTemplate>> {
        if !self.cached {
            return self.parse(sql);
        }

        let key = blake3::hash(sql.as_bytes()).to_hex().to_string();
        let mut cache = self.lock_cache();
        if let Some(template) = cache.get(&key) {
            tracing::debug!("template cache hit");
            return Ok(Arc::clone(template));
        }
        let template = self.parse(sql)?;
        cache.insert(key, Arc::clone(&template));
        Ok(template)
    }

    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    fn load(&self, location: &str) -> TwoWaySqlResult<String> {
        self.template_loader
            .load(location, self.suffix_name.as_deref())
    }

    fn parse(&self, sql: &str) -> TwoWaySqlResult<Arc<SqlTemplate>> {
        let normalized = normalize_sql(sql);
        tracing::debug!(len = normalized.len(), "parsing template");
        let root = SqlParser::new(normalized, self.expression_parser.as_ref()).parse()?;
        Ok(Arc::new(SqlTemplate::new(normalized.to_string(), root)))
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<SqlTemplate>>> {
        // A poisoned cache only means another thread panicked mid-insert;
        // the map itself is still usable.
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SqlTemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlTemplateEngine")
            .field("suffix_name", &self.suffix_name)
            .field("cached", &self.cached)
            .finish_non_exhaustive()
    }
}
