//! The connector contract the scheduler drives, plus the post-processing
//! pipeline wrapped around every connector.

use async_trait::async_trait;

use crate::error::Result;
use crate::filter::FilterSet;
use crate::modification::Modification;
use crate::result::{IntegrationResult, ProjectContext};
use crate::urls::ModificationUrlBuilder;

/// One external version-control tool, seen through the operations an
/// integration cycle needs.
///
/// Methods take `&mut self`: the scheduler never runs two operations on the
/// same connector at once, and connectors keep per-cycle state.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Short backend identifier used in logs and errors (`"cvs"`, `"svn"`, ...).
    fn backend_name(&self) -> &'static str;

    /// Changes committed between `from.start_time` and `to.start_time`.
    async fn detect_changes(
        &mut self,
        from: &IntegrationResult,
        to: &IntegrationResult,
    ) -> Result<Vec<Modification>>;

    /// Bring the working copy to the state the build should run against.
    async fn materialize_working_copy(&mut self, result: &IntegrationResult) -> Result<()>;

    /// Apply (or roll back) the build label. Implementations check
    /// `result.succeeded()` themselves.
    async fn label(&mut self, result: &IntegrationResult) -> Result<()>;

    async fn initialize(&mut self, _project: &ProjectContext) -> Result<()> {
        Ok(())
    }

    async fn purge(&mut self, _project: &ProjectContext) -> Result<()> {
        Ok(())
    }
}

/// Wraps a connector with modification filters and a URL builder.
///
/// `detect_changes` output passes through the filters first, then the URL
/// builder; the other operations are delegated unchanged.
pub struct SourceControlPipeline {
    inner: Box<dyn SourceControl>,
    filters: FilterSet,
    url_builder: Option<Box<dyn ModificationUrlBuilder>>,
}

impl SourceControlPipeline {
    pub fn new(inner: Box<dyn SourceControl>) -> Self {
        Self {
            inner,
            filters: FilterSet::new(),
            url_builder: None,
        }
    }

    pub fn with_filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_url_builder(mut self, builder: Box<dyn ModificationUrlBuilder>) -> Self {
        self.url_builder = Some(builder);
        self
    }
}

#[async_trait]
impl SourceControl for SourceControlPipeline {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    async fn detect_changes(
        &mut self,
        from: &IntegrationResult,
        to: &IntegrationResult,
    ) -> Result<Vec<Modification>> {
        let modifications = self.inner.detect_changes(from, to).await?;
        let mut modifications = self.filters.apply(modifications);
        if let Some(builder) = &self.url_builder {
            builder.setup_modifications(&mut modifications);
        }
        Ok(modifications)
    }

    async fn materialize_working_copy(&mut self, result: &IntegrationResult) -> Result<()> {
        self.inner.materialize_working_copy(result).await
    }

    async fn label(&mut self, result: &IntegrationResult) -> Result<()> {
        self.inner.label(result).await
    }

    async fn initialize(&mut self, project: &ProjectContext) -> Result<()> {
        self.inner.initialize(project).await
    }

    async fn purge(&mut self, project: &ProjectContext) -> Result<()> {
        self.inner.purge(project).await
    }
}
