//! Run repositories for dbbench
//!
//! This crate provides implementations of the `RunRepository` trait for:
//!
//! - Process memory (CLI sessions and tests)

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::collections::HashMap;

use async_trait::async_trait;
use dbbench_core::{
    LogEntry, MetricSample, RepositoryError, Run, RunFilter, RunId, RunRepository, RunState,
};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Store {
    runs: HashMap<RunId, Run>,
    samples: HashMap<RunId, Vec<MetricSample>>,
    logs: HashMap<RunId, Vec<LogEntry>>,
}

/// Repository keeping runs, samples and logs in memory
///
/// Contents are lost when the value is dropped.
#[derive(Debug, Default)]
pub struct MemoryRunRepository {
    store: RwLock<Store>,
}

impl MemoryRunRepository {
    /// Empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored runs
    pub async fn len(&self) -> usize {
        self.store.read().await.runs.len()
    }

    /// Whether no run is stored
    pub async fn is_empty(&self) -> bool {
        self.store.read().await.runs.is_empty()
    }
}

#[async_trait]
impl RunRepository for MemoryRunRepository {
    async fn save(&self, run: &Run) -> Result<(), RepositoryError> {
        self.store
            .write()
            .await
            .runs
            .insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &RunId) -> Result<Option<Run>, RepositoryError> {
        Ok(self.store.read().await.runs.get(id).cloned())
    }

    async fn find_all(&self, filter: &RunFilter) -> Result<Vec<Run>, RepositoryError> {
        let store = self.store.read().await;
        let mut runs: Vec<Run> = store
            .runs
            .values()
            .filter(|run| filter.matches(run))
            .cloned()
            .collect();
        runs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        Ok(runs
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn update_state(&self, id: &RunId, state: RunState) -> Result<Run, RepositoryError> {
        let mut store = self.store.write().await;
        let run = store
            .runs
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))?;
        run.transition_to(state, chrono::Utc::now())?;
        Ok(run.clone())
    }

    async fn save_metric_sample(
        &self,
        id: &RunId,
        sample: &MetricSample,
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        if !store.runs.contains_key(id) {
            return Err(RepositoryError::NotFound(id.clone()));
        }
        store.samples.entry(id.clone()).or_default().push(sample.clone());
        Ok(())
    }

    async fn save_log_entry(&self, id: &RunId, entry: &LogEntry) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        if !store.runs.contains_key(id) {
            return Err(RepositoryError::NotFound(id.clone()));
        }
        store.logs.entry(id.clone()).or_default().push(entry.clone());
        Ok(())
    }

    async fn delete(&self, id: &RunId) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        if store.runs.remove(id).is_none() {
            return Err(RepositoryError::NotFound(id.clone()));
        }
        store.samples.remove(id);
        store.logs.remove(id);
        tracing::debug!(run_id = %id, "Deleted run");
        Ok(())
    }

    async fn metric_samples(&self, id: &RunId) -> Result<Vec<MetricSample>, RepositoryError> {
        let store = self.store.read().await;
        if !store.runs.contains_key(id) {
            return Err(RepositoryError::NotFound(id.clone()));
        }
        Ok(store.samples.get(id).cloned().unwrap_or_default())
    }

    async fn log_entries(&self, id: &RunId) -> Result<Vec<LogEntry>, RepositoryError> {
        let store = self.store.read().await;
        if !store.runs.contains_key(id) {
            return Err(RepositoryError::NotFound(id.clone()));
        }
        Ok(store.logs.get(id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbbench_core::BenchmarkTask;

    fn run(task: &str, tags: &[&str]) -> Run {
        let mut task = BenchmarkTask::new(task, "primary", "oltp");
        task.tags = tags.iter().map(|t| t.to_string()).collect();
        Run::new(&task)
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let repo = MemoryRunRepository::new();
        let r = run("t1", &[]);
        repo.save(&r).await.unwrap();

        assert_eq!(repo.find_by_id(&r.id).await.unwrap(), Some(r.clone()));
        assert_eq!(repo.find_by_id(&RunId::from("nope")).await.unwrap(), None);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_state_enforces_table() {
        let repo = MemoryRunRepository::new();
        let r = run("t1", &[]);
        repo.save(&r).await.unwrap();

        let updated = repo.update_state(&r.id, RunState::Preparing).await.unwrap();
        assert_eq!(updated.state, RunState::Preparing);

        let err = repo.update_state(&r.id, RunState::Running).await.unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidTransition(_)));
        let stored = repo.find_by_id(&r.id).await.unwrap().unwrap();
        assert_eq!(stored.state, RunState::Preparing);

        let err = repo
            .update_state(&RunId::from("nope"), RunState::Preparing)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_find_all_filters_and_pages_newest_first() {
        let repo = MemoryRunRepository::new();
        let base = chrono::Utc::now();
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut r = run(if i % 2 == 0 { "even" } else { "odd" }, &["nightly"]);
            r.created_at = base + chrono::Duration::seconds(i);
            ids.push(r.id.clone());
            repo.save(&r).await.unwrap();
        }

        let all = repo.find_all(&RunFilter::default()).await.unwrap();
        let got: Vec<RunId> = all.iter().map(|r| r.id.clone()).collect();
        let mut newest_first = ids.clone();
        newest_first.reverse();
        assert_eq!(got, newest_first);

        let evens = repo
            .find_all(&RunFilter {
                task_id: Some("even".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(evens.len(), 3);

        let page = repo
            .find_all(&RunFilter {
                offset: 1,
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        let got: Vec<RunId> = page.iter().map(|r| r.id.clone()).collect();
        assert_eq!(got, vec![ids[3].clone(), ids[2].clone()]);

        let tagged = repo
            .find_all(&RunFilter {
                tag: Some("weekly".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(tagged.is_empty());
    }

    #[tokio::test]
    async fn test_samples_and_logs_keep_arrival_order() {
        let repo = MemoryRunRepository::new();
        let r = run("t1", &[]);
        repo.save(&r).await.unwrap();

        for second in 1..=3 {
            repo.save_metric_sample(&r.id, &MetricSample::new(second))
                .await
                .unwrap();
        }
        repo.save_log_entry(&r.id, &LogEntry::info("first")).await.unwrap();
        repo.save_log_entry(&r.id, &LogEntry::error("second")).await.unwrap();

        let seconds: Vec<u64> = repo
            .metric_samples(&r.id)
            .await
            .unwrap()
            .iter()
            .map(|s| s.second)
            .collect();
        assert_eq!(seconds, vec![1, 2, 3]);

        let logs: Vec<String> = repo
            .log_entries(&r.id)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.content)
            .collect();
        assert_eq!(logs, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_appends_to_unknown_run_fail() {
        let repo = MemoryRunRepository::new();
        let id = RunId::from("ghost");
        assert!(matches!(
            repo.save_metric_sample(&id, &MetricSample::new(1)).await,
            Err(RepositoryError::NotFound(_))
        ));
        assert!(matches!(
            repo.save_log_entry(&id, &LogEntry::info("x")).await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let repo = MemoryRunRepository::new();
        let r = run("t1", &[]);
        repo.save(&r).await.unwrap();
        repo.save_log_entry(&r.id, &LogEntry::info("x")).await.unwrap();

        repo.delete(&r.id).await.unwrap();
        assert!(repo.is_empty().await);
        assert!(repo.log_entries(&r.id).await.is_err());
        assert!(matches!(
            repo.delete(&r.id).await,
            Err(RepositoryError::NotFound(_))
        ));
    }
}
