//! Copy detection pipeline.
//!
//! One run acquires the query, prepares segmentations and descriptors for the
//! query and every reference database, then searches and localizes copies per
//! reference database. Stages run strictly one after another and the first
//! failure ends the run. Artifacts already on disk are reused, never rolled
//! back.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{debug, Instrument};
use url::Url;
use uuid::Uuid;
use vcd_models::{DescriptorOptions, DetectedCopy, MediaDatabase, PipelineOptions};
use vcd_process::{args, StatusSink, Tool};

use crate::acquire::download_query;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::ingest::materialize_query;
use crate::logging::RunLogger;
use crate::progress::ProgressTracker;
use crate::registry::DatabaseRegistry;
use crate::results::{rank_detections, read_detections};
use crate::runner::{RunControl, StageRunner};

/// Search name passed to the searcher; it names the neighbor list files.
const SEARCH_NAME: &str = "search";

/// Where the query comes from.
#[derive(Debug, Clone)]
pub enum QuerySource {
    /// An existing query database, used as is.
    Database(Arc<MediaDatabase>),
    /// A local image or video file.
    File(PathBuf),
    /// A direct media URL or a page embedding media.
    Url(Url),
}

impl fmt::Display for QuerySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuerySource::Database(db) => write!(f, "database {}", db.name()),
            QuerySource::File(path) => write!(f, "file {}", path.display()),
            QuerySource::Url(url) => write!(f, "url {}", url),
        }
    }
}

/// Everything one run needs. Options are fixed for the whole run.
#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub query: QuerySource,
    pub references: Vec<Arc<MediaDatabase>>,
    pub options: PipelineOptions,
}

impl DetectionRequest {
    /// Request with the global preset.
    pub fn new(query: QuerySource, references: Vec<Arc<MediaDatabase>>) -> Self {
        Self {
            query,
            references,
            options: PipelineOptions::global_preset(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.references.is_empty() {
            return Err(EngineError::invalid_request(
                "at least one reference database is required",
            ));
        }
        let mut seen = HashSet::new();
        for db in &self.references {
            if !seen.insert(db.uid()) {
                return Err(EngineError::invalid_request(format!(
                    "reference database {} selected twice",
                    db.name()
                )));
            }
        }
        if let QuerySource::File(path) = &self.query {
            if path.as_os_str().is_empty() {
                return Err(EngineError::invalid_request("empty query file path"));
            }
        }
        Ok(())
    }
}

/// Drives detection runs. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct CopyDetectionPipeline {
    config: Arc<EngineConfig>,
    registry: Arc<DatabaseRegistry>,
}

impl CopyDetectionPipeline {
    pub fn new(config: EngineConfig, registry: Arc<DatabaseRegistry>) -> Self {
        Self {
            config: Arc::new(config),
            registry,
        }
    }

    /// Pipeline with its own registry over the configured directories.
    pub fn from_config(config: EngineConfig) -> Self {
        let registry = Arc::new(DatabaseRegistry::from_config(&config));
        Self::new(config, registry)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DatabaseRegistry> {
        &self.registry
    }

    /// Stage runner for work outside a detection run, e.g. database creation.
    pub fn stage_runner(&self, sink: Arc<dyn StatusSink>, control: Arc<RunControl>) -> StageRunner {
        StageRunner::new(
            self.config.toolbox(),
            self.config.supervisor_options(),
            sink,
            control,
        )
    }

    /// Start a run on a background task.
    pub fn spawn(&self, request: DetectionRequest, sink: Arc<dyn StatusSink>) -> PipelineHandle {
        let run_id = Uuid::new_v4().to_string();
        let control = Arc::new(RunControl::new());
        let logger = RunLogger::new(&run_id, request.references.len());
        let span = logger.span();

        let pipeline = self.clone();
        let run_control = control.clone();
        let task = tokio::spawn(async move {
            let run_sink = sink.clone();
            let inner = tokio::spawn(
                async move { pipeline.execute(request, run_sink, run_control, logger).await }
                    .instrument(span),
            );
            let result = match inner.await {
                Ok(result) => result,
                Err(e) => Err(EngineError::internal(format!("pipeline task failed: {}", e))),
            };
            report_terminal(sink.as_ref(), &result);
            result
        });

        PipelineHandle {
            run_id,
            control,
            task,
        }
    }

    /// Run on the current task.
    pub async fn run(
        &self,
        request: DetectionRequest,
        sink: Arc<dyn StatusSink>,
    ) -> EngineResult<Vec<DetectedCopy>> {
        let run_id = Uuid::new_v4().to_string();
        let logger = RunLogger::new(&run_id, request.references.len());
        let span = logger.span();
        let result = self
            .execute(request, sink.clone(), Arc::new(RunControl::new()), logger)
            .instrument(span)
            .await;
        report_terminal(sink.as_ref(), &result);
        result
    }

    async fn execute(
        &self,
        request: DetectionRequest,
        sink: Arc<dyn StatusSink>,
        control: Arc<RunControl>,
        logger: RunLogger,
    ) -> EngineResult<Vec<DetectedCopy>> {
        let started = Instant::now();
        logger.started(&request.query.to_string());

        let result = self.detect(&request, sink, control, &logger).await;
        logger.finished(&result, started.elapsed());
        result
    }

    async fn detect(
        &self,
        request: &DetectionRequest,
        sink: Arc<dyn StatusSink>,
        control: Arc<RunControl>,
        logger: &RunLogger,
    ) -> EngineResult<Vec<DetectedCopy>> {
        request.validate()?;
        let options = &request.options;
        let runner = self.stage_runner(sink.clone(), control);
        let mut progress = ProgressTracker::new(sink, request.references.len());

        progress.step("Creating Query Database");
        let query = self.materialize_query(&request.query, &runner).await?;
        logger.query_ready(&query);

        prepare_descriptors("query", &query, &options.query_descriptor, &runner, &mut progress)
            .await?;
        for reference in &request.references {
            prepare_descriptors(
                "reference",
                reference,
                &options.reference_descriptor,
                &runner,
                &mut progress,
            )
            .await?;
        }

        let mut detections = Vec::new();
        for reference in &request.references {
            runner.check_cancelled()?;

            progress.step(&format!("Similarity Search {}", reference.name()));
            let profile = self
                .create_search_profile(&query, reference, options, &runner)
                .await?;
            let neighbors =
                similarity_search(&profile, reference, options, &runner, &mut progress).await?;

            progress.step(&format!("Copy Localization {}", reference.name()));
            let detections_file = localize(&profile, &neighbors, options, &runner).await?;

            let found = read_detections(&detections_file, &query, reference).await?;
            logger.reference_done(reference, found.len());
            detections.extend(found);
        }

        rank_detections(&mut detections);
        progress.finish();
        Ok(detections)
    }

    /// Resolve the query source to a database, downloading and ingesting as needed.
    pub async fn materialize_query(
        &self,
        source: &QuerySource,
        runner: &StageRunner,
    ) -> EngineResult<Arc<MediaDatabase>> {
        match source {
            QuerySource::Database(db) => Ok(db.clone()),
            QuerySource::File(path) => materialize_query(path, &self.registry, runner).await,
            QuerySource::Url(url) => {
                let file = download_query(url, &self.config.downloads_dir, runner).await?;
                materialize_query(&file, &self.registry, runner).await
            }
        }
    }

    /// Build a fresh search profile, replacing a stale one.
    async fn create_search_profile(
        &self,
        query: &Arc<MediaDatabase>,
        reference: &Arc<MediaDatabase>,
        options: &PipelineOptions,
        runner: &StageRunner,
    ) -> EngineResult<PathBuf> {
        tokio::fs::create_dir_all(&self.config.searches_dir).await?;
        let profile = self
            .config
            .searches_dir
            .join(format!("{}-{}", reference.name(), query.name()));
        remove_stale(&profile).await?;

        runner
            .tool(
                Tool::Searcher,
                args![
                    "-new",
                    "-profile",
                    &profile,
                    "-query",
                    query,
                    "-descQ",
                    &options.query_descriptor.descriptor_alias,
                    "-reference",
                    reference,
                    "-descR",
                    &options.reference_descriptor.descriptor_alias,
                    "-distance",
                    &options.search.distance
                ],
            )
            .await?;
        Ok(profile)
    }
}

/// Handle to a run started with [`CopyDetectionPipeline::spawn`].
pub struct PipelineHandle {
    run_id: String,
    control: Arc<RunControl>,
    task: JoinHandle<EngineResult<Vec<DetectedCopy>>>,
}

impl PipelineHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Stop the current stage and skip the rest. Safe to call from any thread.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Shared cancellation state, e.g. for a signal handler.
    pub fn control(&self) -> Arc<RunControl> {
        self.control.clone()
    }

    pub fn has_ended(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the ranked detections.
    pub async fn wait(self) -> EngineResult<Vec<DetectedCopy>> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(EngineError::internal(format!("pipeline task failed: {}", e))),
        }
    }
}

/// Segmentation then descriptor extraction, each skipped when its alias exists.
async fn prepare_descriptors(
    label: &str,
    db: &Arc<MediaDatabase>,
    descriptor: &DescriptorOptions,
    runner: &StageRunner,
    progress: &mut ProgressTracker,
) -> EngineResult<()> {
    let count = db.len();
    let videos = if count == 1 { "video" } else { "videos" };

    progress.step(&format!("Segmenting {} {} {}", count, label, videos));
    if db.has_segmentation(&descriptor.segmentation_alias) {
        debug!(db = %db.name(), alias = %descriptor.segmentation_alias, "Segmentation exists");
    } else {
        runner
            .tool(
                Tool::DatabaseBuilder,
                args![
                    "-segment",
                    "-db",
                    db,
                    "-seg",
                    &descriptor.segmentation,
                    "-alias",
                    &descriptor.segmentation_alias
                ],
            )
            .await?;
    }

    progress.step(&format!(
        "Computing descriptors for {} {} {}",
        count, label, videos
    ));
    if db.has_descriptors(&descriptor.descriptor_alias) {
        debug!(db = %db.name(), alias = %descriptor.descriptor_alias, "Descriptors exist");
    } else {
        runner
            .tool(
                Tool::DatabaseBuilder,
                args![
                    "-extract",
                    "-db",
                    db,
                    "-seg",
                    &descriptor.segmentation_alias,
                    "-desc",
                    &descriptor.descriptor,
                    "-alias",
                    &descriptor.descriptor_alias
                ],
            )
            .await?;
    }
    Ok(())
}

/// Nearest-neighbor search, plus the merge stage for local vectors.
///
/// Returns the neighbor list to localize from.
async fn similarity_search(
    profile: &Path,
    reference: &MediaDatabase,
    options: &PipelineOptions,
    runner: &StageRunner,
    progress: &mut ProgressTracker,
) -> EngineResult<PathBuf> {
    let search = &options.search;
    let neighbors = profile.join(format!("ss,{}.txt", SEARCH_NAME));

    let index_file = search.index_file.as_ref().map(|name| {
        reference
            .descriptor_dir(&options.reference_descriptor.descriptor_alias)
            .join(name)
    });

    runner
        .tool(
            Tool::Searcher,
            args![
                "-ss",
                "-profile",
                profile,
                "-searchName",
                SEARCH_NAME,
                search.needs_merge().then_some("-searchByLocalVectors"),
                "-index",
                &search.index_build,
                index_file
                    .as_ref()
                    .map(|f| args!["-load_index_path", f, "-save_index_path", f]),
                "-knn",
                search.knn,
                search
                    .index_search
                    .as_ref()
                    .map(|s| args!["-searchOptions", s])
            ],
        )
        .await?;

    if search.needs_merge() {
        progress.step(&format!("Merging Local Vectors {}", reference.name()));
        let vectors = profile.join(format!("ssVector,{}.txt", SEARCH_NAME));
        require_file(&vectors, "local neighbor list").await?;
        runner
            .tool(
                Tool::Merger,
                args![
                    "-ss",
                    &vectors,
                    "-out",
                    &neighbors,
                    "-maxVectorsIn",
                    search.knn,
                    "-maxNNOut",
                    search.knn_after_merge.unwrap_or(search.knn)
                ],
            )
            .await?;
    } else {
        progress.skip();
    }

    require_file(&neighbors, "neighbor list").await?;
    Ok(neighbors)
}

/// Copy localization over a neighbor list; returns the detections file.
async fn localize(
    profile: &Path,
    neighbors: &Path,
    options: &PipelineOptions,
    runner: &StageRunner,
) -> EngineResult<PathBuf> {
    let detections = profile.join(format!("detections_ss,{}.txt", SEARCH_NAME));
    let localization = &options.localization;

    runner
        .tool(
            Tool::Localizer,
            args![
                "-detect",
                "-ss",
                neighbors,
                "-out",
                &detections,
                "-maxDetections",
                localization.max_detections,
                "-minLength",
                format!("{:?}s", localization.min_length_secs),
                "-missCost",
                localization.miss_cost,
                "-rankWeight",
                localization.rank_weight
            ],
        )
        .await?;

    require_file(&detections, "detections file").await?;
    Ok(detections)
}

fn report_terminal(sink: &dyn StatusSink, result: &EngineResult<Vec<DetectedCopy>>) {
    match result {
        Ok(_) => sink.on_terminal(true, None),
        Err(e) => sink.on_terminal(false, Some(&format!("{}: {}", e.kind(), e))),
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn require_file(path: &Path, what: &str) -> EngineResult<()> {
    if exists(path).await {
        Ok(())
    } else {
        Err(EngineError::not_found(format!("{} {}", what, path.display())))
    }
}

async fn remove_stale(path: &Path) -> EngineResult<()> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await?,
        Ok(_) => tokio::fs::remove_file(path).await?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(path: &str) -> Arc<MediaDatabase> {
        Arc::new(MediaDatabase::from_objects(PathBuf::from(path), Vec::new()).unwrap())
    }

    #[test]
    fn test_request_needs_references() {
        let request = DetectionRequest::new(QuerySource::File(PathBuf::from("q.mp4")), Vec::new());
        let err = request.validate().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Argument);
    }

    #[test]
    fn test_request_rejects_duplicate_references() {
        let request = DetectionRequest::new(
            QuerySource::Database(db("/q/abc")),
            vec![db("/dbs/News"), db("/dbs/news")],
        );
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_request_defaults_to_global_preset() {
        let request =
            DetectionRequest::new(QuerySource::File(PathBuf::from("q.mp4")), vec![db("/dbs/a")]);
        assert!(request.validate().is_ok());
        assert_eq!(request.options, PipelineOptions::global_preset());
    }

    #[test]
    fn test_query_source_display() {
        assert_eq!(QuerySource::Database(db("/q/abc")).to_string(), "database abc");
        assert_eq!(QuerySource::File(PathBuf::from("/in/q.mp4")).to_string(), "file /in/q.mp4");
        let url = Url::parse("http://media.example/clip.mp4").unwrap();
        assert_eq!(QuerySource::Url(url).to_string(), "url http://media.example/clip.mp4");
    }
}
