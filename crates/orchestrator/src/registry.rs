//! Task registry with three tiers: an authoritative in-memory map, one JSON
//! snapshot per task on disk, and the durable SQLite history.
//!
//! Reads fall through the tiers in that order. Writes go to every tier;
//! a failing secondary tier is logged and never fails the write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bdd_core::{Task, TaskRecord};
use db::ExecutionRepository;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};

/// A persistence tier behind the in-memory map.
#[async_trait]
pub trait TaskStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn save(&self, record: &TaskRecord) -> Result<()>;

    async fn load(&self, task_id: &str) -> Result<Option<TaskRecord>>;
}

/// `{results_dir}/{task_id}.json`, written atomically.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot path for `task_id`, or `None` when the id would resolve
    /// outside the results directory.
    pub fn path(&self, task_id: &str) -> Option<PathBuf> {
        is_plain_id(task_id).then(|| self.dir.join(format!("{}.json", task_id)))
    }
}

fn is_plain_id(task_id: &str) -> bool {
    !task_id.is_empty()
        && !task_id.contains(['/', '\\'])
        && !task_id.contains("..")
        && !Path::new(task_id).is_absolute()
}

#[async_trait]
impl TaskStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn save(&self, record: &TaskRecord) -> Result<()> {
        let path = self.path(&record.task_id).ok_or_else(|| {
            OrchestratorError::ExecutionFailed(format!(
                "Refusing to write snapshot for task id {:?}",
                record.task_id
            ))
        })?;
        fs::create_dir_all(&self.dir).await?;

        let temp_path = self.dir.join(format!(".{}.tmp", record.task_id));
        let content = serde_json::to_vec_pretty(record)?;

        fs::write(&temp_path, content).await.map_err(|e| {
            OrchestratorError::ExecutionFailed(format!(
                "Failed to write temp record {:?}: {}",
                temp_path, e
            ))
        })?;
        fs::rename(&temp_path, &path).await.map_err(|e| {
            OrchestratorError::ExecutionFailed(format!(
                "Failed to rename record {:?} -> {:?}: {}",
                temp_path, path, e
            ))
        })?;

        debug!(task_id = %record.task_id, path = ?path, "Task snapshot written");
        Ok(())
    }

    async fn load(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let Some(path) = self.path(task_id) else {
            return Ok(None);
        };
        let record: TaskRecord = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if record.task_id != task_id {
            warn!(task_id = %task_id, found = %record.task_id, path = ?path, "Snapshot belongs to another task");
            return Ok(None);
        }
        Ok(Some(record))
    }
}

pub struct DurableStore {
    repository: ExecutionRepository,
}

impl DurableStore {
    pub fn new(repository: ExecutionRepository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl TaskStore for DurableStore {
    fn name(&self) -> &'static str {
        "durable"
    }

    async fn save(&self, record: &TaskRecord) -> Result<()> {
        self.repository.upsert(record).await?;
        Ok(())
    }

    async fn load(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        Ok(self.repository.find_by_id(task_id).await?)
    }
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub results_dir: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
        }
    }
}

impl RegistryConfig {
    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }
}

pub struct TaskRegistry {
    memory: RwLock<HashMap<String, Task>>,
    stores: Vec<Arc<dyn TaskStore>>,
    history: Option<ExecutionRepository>,
}

impl TaskRegistry {
    /// Memory and file tiers; add the durable tier with
    /// [`TaskRegistry::with_durable`].
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            stores: vec![Arc::new(FileStore::new(config.results_dir))],
            history: None,
        }
    }

    /// Memory tier only.
    pub fn in_memory() -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            stores: Vec::new(),
            history: None,
        }
    }

    pub fn with_durable(mut self, repository: ExecutionRepository) -> Self {
        self.stores
            .push(Arc::new(DurableStore::new(repository.clone())));
        self.history = Some(repository);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.stores.push(store);
        self
    }

    pub fn tiers(&self) -> Vec<&'static str> {
        std::iter::once("memory")
            .chain(self.stores.iter().map(|s| s.name()))
            .collect()
    }

    pub async fn put(&self, task: Task) {
        self.write(task).await;
    }

    /// Same write path as [`TaskRegistry::put`]; refreshes `updated_at`.
    pub async fn update(&self, mut task: Task) {
        task.updated_at = chrono::Utc::now();
        self.write(task).await;
    }

    async fn write(&self, task: Task) {
        let record = TaskRecord::from(&task);
        self.memory.write().await.insert(task.id.clone(), task);

        for store in &self.stores {
            if let Err(e) = store.save(&record).await {
                warn!(
                    task_id = %record.task_id,
                    tier = store.name(),
                    error = %e,
                    "Task registry tier write failed"
                );
            }
        }
    }

    /// First hit across memory, file and durable tiers.
    pub async fn get(&self, task_id: &str) -> Result<Task> {
        if let Some(task) = self.memory.read().await.get(task_id) {
            return Ok(task.clone());
        }

        for store in &self.stores {
            match store.load(task_id).await {
                Ok(Some(record)) => {
                    debug!(task_id = %task_id, tier = store.name(), "Task loaded from tier");
                    return Ok(Task::from(record));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(task_id = %task_id, tier = store.name(), error = %e, "Task registry tier read failed");
                }
            }
        }

        Err(OrchestratorError::TaskNotFound(task_id.to_string()))
    }

    /// Persisted shape of a task, wherever it is found.
    pub async fn record(&self, task_id: &str) -> Result<TaskRecord> {
        self.get(task_id).await.map(|task| TaskRecord::from(&task))
    }

    /// Tasks left `pending` or `running` in the durable tier, oldest first.
    /// Empty without a durable tier.
    pub async fn unfinished(&self) -> Result<Vec<Task>> {
        match &self.history {
            Some(repository) => Ok(repository
                .find_unfinished()
                .await?
                .into_iter()
                .map(Task::from)
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    /// Execution history, newest first. Read from the durable tier when
    /// configured, otherwise from memory.
    pub async fn list(&self, limit: u32) -> Result<Vec<TaskRecord>> {
        if let Some(repository) = &self.history {
            return Ok(repository.find_all(limit).await?);
        }

        let memory = self.memory.read().await;
        let mut records: Vec<TaskRecord> = memory.values().map(TaskRecord::from).collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit as usize);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdd_core::{Feature, RunConfig, Scenario, Specification, TaskStatus};
    use tempfile::TempDir;

    fn task(feature: &str) -> Task {
        Task::new(
            Specification::new(Feature::new(feature), vec![Scenario::new("s1", "First")]),
            RunConfig::default(),
        )
    }

    async fn durable(dir: &TempDir) -> ExecutionRepository {
        let url = format!("sqlite:{}", dir.path().join("executions.db").display());
        let pool = db::create_pool(&url).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        ExecutionRepository::new(pool)
    }

    struct FailingStore;

    #[async_trait]
    impl TaskStore for FailingStore {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn save(&self, _record: &TaskRecord) -> Result<()> {
            Err(OrchestratorError::ExecutionFailed("disk full".to_string()))
        }

        async fn load(&self, _task_id: &str) -> Result<Option<TaskRecord>> {
            Err(OrchestratorError::ExecutionFailed("disk gone".to_string()))
        }
    }

    #[tokio::test]
    async fn test_put_writes_every_tier() {
        let dir = tempfile::tempdir().unwrap();
        let repository = durable(&dir).await;
        let registry = TaskRegistry::new(RegistryConfig::default().with_results_dir(dir.path()))
            .with_durable(repository.clone());
        let task = task("Checkout");

        registry.put(task.clone()).await;

        assert_eq!(registry.get(&task.id).await.unwrap(), task);
        assert!(dir.path().join(format!("{}.json", task.id)).exists());
        assert!(repository.find_by_id(&task.id).await.unwrap().is_some());
        assert_eq!(registry.tiers(), vec!["memory", "file", "durable"]);
    }

    #[tokio::test]
    async fn test_get_falls_back_to_file_tier() {
        let dir = tempfile::tempdir().unwrap();
        let task = task("Search");
        {
            let writer = TaskRegistry::new(RegistryConfig::default().with_results_dir(dir.path()));
            writer.put(task.clone()).await;
        }

        let reader = TaskRegistry::new(RegistryConfig::default().with_results_dir(dir.path()));
        let found = reader.get(&task.id).await.unwrap();
        assert_eq!(found.id, task.id);
        assert_eq!(found.specification, task.specification);
    }

    #[tokio::test]
    async fn test_get_falls_back_to_durable_tier() {
        let dir = tempfile::tempdir().unwrap();
        let repository = durable(&dir).await;
        let task = task("Login");
        repository.upsert(&TaskRecord::from(&task)).await.unwrap();

        let registry = TaskRegistry::new(RegistryConfig::default().with_results_dir(dir.path().join("snapshots")))
            .with_durable(repository);
        let found = registry.get(&task.id).await.unwrap();
        assert_eq!(found.feature_name(), "Login");
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let repository = durable(&dir).await;
        let registry = TaskRegistry::new(RegistryConfig::default().with_results_dir(dir.path()))
            .with_durable(repository);

        let err = registry.get("does-not-exist").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::TaskNotFound(id) if id == "does-not-exist"));
    }

    #[tokio::test]
    async fn test_failing_tier_does_not_fail_writes() {
        let registry = TaskRegistry::in_memory().with_store(Arc::new(FailingStore));
        let mut task = task("Cart");

        registry.put(task.clone()).await;
        task.status = TaskStatus::Running;
        registry.update(task.clone()).await;

        let found = registry.get(&task.id).await.unwrap();
        assert_eq!(found.status, TaskStatus::Running);
        assert!(matches!(
            registry.get("missing").await,
            Err(OrchestratorError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_tier_stays_inside_results_dir() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("secret");
        std::fs::create_dir_all(&outside).unwrap();
        let mut planted = TaskRecord::from(&task("Planted"));
        planted.task_id = "planted".to_string();
        std::fs::write(
            outside.join("planted.json"),
            serde_json::to_vec(&planted).unwrap(),
        )
        .unwrap();

        let registry =
            TaskRegistry::new(RegistryConfig::default().with_results_dir(dir.path().join("results")));
        let absolute = outside.join("planted").display().to_string();

        for id in ["../secret/planted", absolute.as_str(), "..\\secret\\planted", ""] {
            assert!(
                matches!(registry.get(id).await, Err(OrchestratorError::TaskNotFound(_))),
                "{id:?} resolved outside the results directory"
            );
        }
        assert!(FileStore::new(dir.path()).path("../x").is_none());
    }

    #[tokio::test]
    async fn test_file_tier_ignores_snapshot_of_another_task() {
        let dir = tempfile::tempdir().unwrap();
        let other = TaskRecord::from(&task("Other"));
        std::fs::write(
            dir.path().join("renamed.json"),
            serde_json::to_vec(&other).unwrap(),
        )
        .unwrap();

        let registry = TaskRegistry::new(RegistryConfig::default().with_results_dir(dir.path()));
        assert!(matches!(
            registry.get("renamed").await,
            Err(OrchestratorError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unfinished_reads_durable_tier() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TaskRegistry::in_memory().with_durable(durable(&dir).await);
        let pending = task("pending");
        let mut finished = task("finished");
        finished.status = TaskStatus::Failed;
        registry.put(pending.clone()).await;
        registry.put(finished).await;

        let unfinished = registry.unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, pending.id);
        assert!(TaskRegistry::in_memory().unfinished().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_from_memory_newest_first() {
        let registry = TaskRegistry::in_memory();
        let mut older = task("older");
        older.created_at = chrono::Utc::now() - chrono::Duration::minutes(5);
        registry.put(older).await;
        registry.put(task("newer")).await;

        let records = registry.list(10).await.unwrap();
        let names: Vec<_> = records.iter().map(|r| r.feature_name.as_str()).collect();
        assert_eq!(names, vec!["newer", "older"]);
        assert_eq!(registry.list(1).await.unwrap().len(), 1);
    }
}
