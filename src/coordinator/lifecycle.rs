// Job lifecycle manager
// Mirrors backend task state: submit, poll until terminal, fold into history.
// The backend is the source of truth for status; locally known metadata
// (library, requested outputs) is layered on top.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{Coordinator, CoordinatorState, NotificationLevel};
use crate::backend::{ComponentPresence, TaskRequest, TaskStatus, TaskSummary};
use crate::constants::{NO_LIBRARY_SELECTED_MESSAGE, TASK_LOST_MESSAGE, TASK_STALE_MESSAGE, TASK_UNREACHABLE_MESSAGE};
use crate::db::StateKey;
use crate::error::{CourierError, Result};
use crate::jobs::scheduler::PollFuture;
use crate::jobs::{
    insert_history, normalize_lcsc_id, parse_backend_time, HistoryView, JobHistoryEntry, JobMeta,
    JobOutputs, JobRecord,
};
use crate::library::paths::{self, non_empty};
use crate::library::{AssetFlags, LibraryRecord};

const JOB_KEYS: [StateKey; 2] = [StateKey::JobHistory, StateKey::JobMeta];

/// `submitJob` payload. Unset fields fall back to the target library, then
/// to settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobSubmission {
    pub lcsc_id: String,
    pub library_path: Option<String>,
    pub library_name: Option<String>,
    pub outputs: Option<JobOutputs>,
    pub overwrite: Option<bool>,
    pub overwrite_model: Option<bool>,
    pub project_relative: Option<bool>,
    pub project_relative_path: Option<String>,
    pub model_path: Option<String>,
}

/// `getJobStatus` answer.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JobLookup {
    InFlight(JobRecord),
    Finished(HistoryView),
}

/// Whether a component is already converted or on its way.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub lcsc_id: String,
    pub completed: bool,
    pub in_progress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_library: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets: Option<AssetFlags>,
}

impl ComponentStatus {
    fn apply_presence(&mut self, presence: &ComponentPresence) {
        self.in_library = Some(presence.exists);
        self.assets = Some(AssetFlags {
            symbol: presence.symbol,
            footprint: presence.footprint,
            model: presence.model,
        });
        if presence.exists {
            self.completed = true;
        }
    }
}

/// Last observed status/progress of a polled job.
#[derive(Debug, Clone)]
pub(crate) struct PollWatch {
    status: TaskStatus,
    progress: u8,
    changed_at: Instant,
}

impl PollWatch {
    fn new(status: TaskStatus, progress: u8) -> Self {
        Self { status, progress, changed_at: Instant::now() }
    }

    /// True when status or progress moved since the last observation.
    fn observe(&mut self, status: TaskStatus, progress: u8) -> bool {
        if status == self.status && progress == self.progress {
            return false;
        }
        self.status = status;
        self.progress = progress;
        self.changed_at = Instant::now();
        true
    }

    fn idle_for(&self) -> Duration {
        self.changed_at.elapsed()
    }
}

/// Resolve target library, name and flags into the backend request.
fn build_task_request(
    state: &CoordinatorState,
    lcsc_id: &str,
    submission: &JobSubmission,
) -> Result<(TaskRequest, JobMeta)> {
    let settings = &state.settings;

    let (library_path, tracked): (String, Option<&LibraryRecord>) =
        match non_empty(submission.library_path.as_deref()) {
            Some(raw) => {
                let prefix = paths::canonical_prefix(raw);
                let tracked = state.inventory.find_by_path(&prefix);
                (prefix, tracked)
            }
            None => match state.inventory.selected() {
                Some(selected) => (selected.path.clone(), Some(selected)),
                None => return Err(CourierError::validation(NO_LIBRARY_SELECTED_MESSAGE)),
            },
        };
    if library_path.is_empty() {
        return Err(CourierError::validation(NO_LIBRARY_SELECTED_MESSAGE));
    }

    let library_name = match non_empty(submission.library_name.as_deref()) {
        Some(name) => paths::sanitize_library_name(Some(name), &library_path),
        None => tracked
            .map(|l| l.name.clone())
            .unwrap_or_else(|| paths::sanitize_library_name(None, &library_path)),
    };

    let outputs = submission.outputs.unwrap_or(settings.default_outputs);
    if !outputs.any() {
        return Err(CourierError::validation(
            "Select at least one output: symbol, footprint or model",
        ));
    }

    let project_relative = submission
        .project_relative
        .or(tracked.map(|l| l.project_relative))
        .unwrap_or(settings.project_relative);
    let project_relative_path = if project_relative {
        let raw = submission
            .project_relative_path
            .clone()
            .or_else(|| tracked.filter(|l| l.project_relative).map(|l| l.project_relative_path.clone()))
            .unwrap_or_else(|| settings.project_relative_path.clone());
        Some(paths::normalize_project_relative_path(&raw)).filter(|p| !p.is_empty())
    } else {
        None
    };
    let model_path = non_empty(submission.model_path.as_deref())
        .map(paths::normalize_path)
        .or_else(|| tracked.and_then(|l| l.model_path.clone()));

    let request = TaskRequest {
        lcsc_id: lcsc_id.to_string(),
        output_path: library_path.clone(),
        overwrite: submission.overwrite.unwrap_or(settings.overwrite),
        symbol: outputs.symbol,
        footprint: outputs.footprint,
        model: outputs.model,
        overwrite_model: submission.overwrite_model.unwrap_or(settings.overwrite_model),
        project_relative,
        project_relative_path,
        model_path,
    };
    let meta = JobMeta {
        lcsc_id: lcsc_id.to_string(),
        library_name,
        library_path,
        outputs,
        submitted_at: Utc::now(),
    };
    Ok((request, meta))
}

fn local_component_status(state: &CoordinatorState, lcsc_id: &str, library: Option<&str>) -> ComponentStatus {
    let mut status = ComponentStatus {
        lcsc_id: lcsc_id.to_string(),
        ..Default::default()
    };

    if let Some(job) = state.jobs.values().find(|j| j.lcsc_id == lcsc_id) {
        status.in_progress = true;
        status.job_id = Some(job.id.clone());
        status.status = Some(job.status);
    }

    let finished = state.history.iter().find(|e| {
        e.lcsc_id == lcsc_id
            && e.status == TaskStatus::Completed
            && library.map_or(true, |path| paths::same_library(path, &e.library_path))
    });
    if let Some(entry) = finished {
        status.completed = true;
        if status.job_id.is_none() {
            status.job_id = Some(entry.id.clone());
            status.status = Some(entry.status);
        }
    }

    status
}

impl Coordinator {
    fn poll_delay(&self, status: TaskStatus) -> Duration {
        match status {
            TaskStatus::Queued => self.config.poll_delay_queued,
            _ => self.config.poll_delay_running,
        }
    }

    fn poll_future(self: &Arc<Self>, job_id: &str, delay: Duration, failures: u32) -> PollFuture {
        let this = Arc::clone(self);
        let job_id = job_id.to_string();
        Box::pin(async move { this.poll(job_id, delay, failures).await })
    }

    pub(crate) fn schedule_poll(self: &Arc<Self>, job_id: &str, delay: Duration) {
        let poll = self.poll_future(job_id, delay, 0);
        if !self.scheduler.schedule(job_id, delay, poll) {
            log::debug!("Poll for {} already scheduled", job_id);
        }
    }

    fn reschedule_poll(self: &Arc<Self>, job_id: &str, delay: Duration, failures: u32) {
        let poll = self.poll_future(job_id, delay, failures);
        if !self.scheduler.reschedule(job_id, delay, poll) {
            log::debug!("Polling for {} was cancelled", job_id);
        }
    }

    // ==================== Submission ====================

    /// `submitJob`
    pub async fn submit_job(self: &Arc<Self>, submission: JobSubmission) -> Result<JobRecord> {
        let lcsc_id = normalize_lcsc_id(&submission.lcsc_id)?;
        let (request, mut meta) = build_task_request(&self.lock(), &lcsc_id, &submission)?;

        let task = self
            .backend()
            .submit_task(&request)
            .await
            .map_err(|e| self.note_backend_error(e))?;
        if task.id.is_empty() {
            return Err(CourierError::Other("Backend accepted the job without a task id".to_string()));
        }

        let record = JobRecord::from_task(&task, Some(&meta));
        log::info!(
            "Submitted {} to '{}' ({}) as task {}",
            record.lcsc_id,
            record.library_name,
            record.library_path,
            record.id
        );

        {
            let mut state = self.lock();
            // Registration time, not request time: a sync pass whose task list
            // predates this moment must not count the job as lost
            meta.submitted_at = Utc::now();
            state.jobs.insert(record.id.clone(), record.clone());
            state.job_meta.insert(record.id.clone(), meta);
            state.watch.insert(record.id.clone(), PollWatch::new(task.status, task.progress));
        }

        if task.status.is_terminal() {
            self.finalize_job(&record.id, task).await;
            return Ok(record);
        }

        self.persist(&[StateKey::JobMeta])?;
        self.schedule_poll(&record.id, self.poll_delay(task.status));
        Ok(record)
    }

    /// `quickDownload`: submit into the selected library with default outputs.
    pub async fn quick_download(self: &Arc<Self>, lcsc_id: &str, outputs: Option<JobOutputs>) -> Result<JobRecord> {
        let lcsc_id = normalize_lcsc_id(lcsc_id)?;
        self.ensure_backend().await?;

        let selected = self
            .lock()
            .inventory
            .selected()
            .cloned()
            .ok_or_else(|| CourierError::validation(NO_LIBRARY_SELECTED_MESSAGE))?;
        if selected.missing {
            return Err(CourierError::validation(format!(
                "Selected library '{}' is missing on disk",
                selected.name
            )));
        }

        self.submit_job(JobSubmission {
            lcsc_id,
            library_path: Some(selected.path),
            library_name: Some(selected.name),
            outputs,
            ..Default::default()
        })
        .await
    }

    // ==================== Polling ====================

    async fn poll(self: Arc<Self>, job_id: String, last_delay: Duration, failures: u32) {
        if !self.scheduler.begin(&job_id) {
            return;
        }
        if !self.lock().jobs.contains_key(&job_id) {
            log::debug!("Job {} is no longer in flight, polling stops", job_id);
            self.scheduler.finish(&job_id);
            return;
        }

        match self.backend().get_task(&job_id).await {
            Ok(task) if task.status.is_terminal() => {
                self.scheduler.finish(&job_id);
                self.finalize_job(&job_id, task).await;
            }
            Ok(task) => {
                let observed = {
                    let mut guard = self.lock();
                    let state = &mut *guard;
                    state.jobs.get_mut(&job_id).map(|record| {
                        record.apply_task(&task);
                        let watch = state
                            .watch
                            .entry(job_id.clone())
                            .or_insert_with(|| PollWatch::new(task.status, task.progress));
                        let moved = watch.observe(task.status, task.progress);
                        (moved, watch.idle_for() >= self.config.stale_job_timeout)
                    })
                };

                match observed {
                    None => self.scheduler.finish(&job_id),
                    Some((_, true)) => {
                        self.scheduler.finish(&job_id);
                        self.abandon_job(&job_id, TASK_STALE_MESSAGE);
                    }
                    Some((moved, false)) => {
                        if moved {
                            self.broadcast_state();
                        }
                        self.reschedule_poll(&job_id, self.poll_delay(task.status), 0);
                    }
                }
            }
            Err(e) if e.is_not_found() => {
                self.scheduler.finish(&job_id);
                self.abandon_job(&job_id, TASK_LOST_MESSAGE);
            }
            Err(e) => {
                let failures = failures + 1;
                let err = self.note_backend_error(e);
                let stale = self
                    .lock()
                    .watch
                    .get(&job_id)
                    .is_some_and(|w| w.idle_for() >= self.config.stale_job_timeout);

                if stale {
                    self.scheduler.finish(&job_id);
                    self.abandon_job(&job_id, TASK_STALE_MESSAGE);
                } else if failures >= self.config.max_poll_failures {
                    self.scheduler.finish(&job_id);
                    self.abandon_job(&job_id, TASK_UNREACHABLE_MESSAGE);
                } else {
                    let delay = last_delay.saturating_mul(2).min(self.config.poll_delay_max);
                    log::debug!(
                        "Poll for {} failed ({}/{}): {}; retrying in {:?}",
                        job_id,
                        failures,
                        self.config.max_poll_failures,
                        err,
                        delay
                    );
                    self.reschedule_poll(&job_id, delay, failures);
                }
            }
        }
    }

    /// Fold a terminal task into history, drop its metadata, tell the user and
    /// re-validate the library on success.
    async fn finalize_job(&self, job_id: &str, task: TaskSummary) {
        let entry = {
            let mut state = self.lock();
            if !state.jobs.contains_key(job_id) && state.history.iter().any(|e| e.id == job_id) {
                // Already folded in by a racing sync pass
                return;
            }
            let meta = state.job_meta.remove(job_id);
            state.watch.remove(job_id);
            let record = match state.jobs.remove(job_id) {
                Some(mut record) => {
                    record.apply_task(&task);
                    record
                }
                None => JobRecord::from_task(&task, meta.as_ref()),
            };
            let finished_at = parse_backend_time(task.finished_at.as_deref()).unwrap_or_else(Utc::now);
            let entry = JobHistoryEntry::from_record(record, task.log, finished_at);
            insert_history(&mut state.history, entry.clone());
            entry
        };

        log::info!("Job {} ({}) {}", entry.id, entry.lcsc_id, entry.status.as_str());
        self.persist_logged(&JOB_KEYS);
        self.notify_finished(&entry);

        if entry.status == TaskStatus::Completed && !entry.library_path.is_empty() {
            self.revalidate_library_path(&entry.library_path).await;
        }
        self.broadcast_state();
    }

    /// Give up on a job: recorded as failed with `reason`.
    fn abandon_job(&self, job_id: &str, reason: &str) {
        let entry = {
            let mut state = self.lock();
            let meta = state.job_meta.remove(job_id);
            state.watch.remove(job_id);
            let record = match (state.jobs.remove(job_id), meta) {
                (Some(record), _) => record,
                (None, Some(meta)) => JobRecord::from_meta(job_id, &meta),
                (None, None) => return,
            };
            let entry = JobHistoryEntry::abandoned(record, reason);
            insert_history(&mut state.history, entry.clone());
            entry
        };

        log::warn!("Job {} ({}) abandoned: {}", job_id, entry.lcsc_id, reason);
        self.persist_logged(&JOB_KEYS);
        self.notify_finished(&entry);
        self.broadcast_state();
    }

    fn notify_finished(&self, entry: &JobHistoryEntry) {
        let label = if entry.lcsc_id.is_empty() { entry.id.as_str() } else { entry.lcsc_id.as_str() };
        let analysis = entry.analysis();

        let (level, title, message) = match entry.status {
            TaskStatus::Completed if analysis.partial => (
                NotificationLevel::Info,
                format!("{} partially converted", label),
                format!("Missing: {}", analysis.missing.join(", ")),
            ),
            TaskStatus::Completed => (
                NotificationLevel::Success,
                format!("{} added to {}", label, entry.library_name),
                entry.message.clone().unwrap_or_else(|| "Conversion complete".to_string()),
            ),
            _ => (
                NotificationLevel::Error,
                format!("{} failed", label),
                entry
                    .error
                    .clone()
                    .or_else(|| entry.message.clone())
                    .unwrap_or_else(|| "Conversion failed".to_string()),
            ),
        };
        self.notify(level, title, message, Some(entry.id.clone()));
    }

    // ==================== Reconciliation ====================

    /// Reconcile with the backend's task list: finished tasks go to history,
    /// active ones are adopted and polled, and local metadata for tasks the
    /// backend no longer lists is recorded as lost.
    pub async fn sync_existing(self: &Arc<Self>) -> Result<()> {
        let requested_at = Utc::now();
        let tasks = self
            .backend()
            .list_tasks()
            .await
            .map_err(|e| self.note_backend_error(e))?;

        let mut to_poll: Vec<(String, TaskStatus)> = Vec::new();
        let mut finished: Vec<JobHistoryEntry> = Vec::new();
        let mut lost: Vec<JobHistoryEntry> = Vec::new();
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            let listed: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();

            for task in tasks.iter().filter(|t| !t.id.is_empty()) {
                let meta = state.job_meta.get(&task.id).cloned();

                if task.status.is_terminal() {
                    let known = state.history.iter().any(|e| e.id == task.id);
                    let record = state.jobs.remove(&task.id);
                    state.job_meta.remove(&task.id);
                    state.watch.remove(&task.id);
                    self.scheduler.cancel(&task.id);
                    if known {
                        continue;
                    }

                    let record = match record {
                        Some(mut record) => {
                            record.apply_task(task);
                            record
                        }
                        None => JobRecord::from_task(task, meta.as_ref()),
                    };
                    let finished_at = parse_backend_time(task.finished_at.as_deref()).unwrap_or_else(Utc::now);
                    let entry = JobHistoryEntry::from_record(record, task.log.clone(), finished_at);
                    insert_history(&mut state.history, entry.clone());
                    if meta.is_some() {
                        finished.push(entry);
                    }
                    continue;
                }

                match state.jobs.get_mut(&task.id) {
                    Some(record) => record.apply_task(task),
                    None => {
                        let record = JobRecord::from_task(task, meta.as_ref());
                        state.job_meta.entry(task.id.clone()).or_insert_with(|| record.meta());
                        state.jobs.insert(task.id.clone(), record);
                    }
                }
                state
                    .watch
                    .entry(task.id.clone())
                    .or_insert_with(|| PollWatch::new(task.status, task.progress));
                if !self.scheduler.is_scheduled(&task.id) {
                    to_poll.push((task.id.clone(), task.status));
                }
            }

            let lost_ids: Vec<String> = state
                .job_meta
                .iter()
                .filter(|(id, meta)| !listed.contains(id.as_str()) && meta.submitted_at < requested_at)
                .map(|(id, _)| id.clone())
                .collect();
            for id in lost_ids {
                let Some(meta) = state.job_meta.remove(&id) else { continue };
                state.watch.remove(&id);
                self.scheduler.cancel(&id);
                let record = state
                    .jobs
                    .remove(&id)
                    .unwrap_or_else(|| JobRecord::from_meta(&id, &meta));
                let entry = JobHistoryEntry::abandoned(record, TASK_LOST_MESSAGE);
                insert_history(&mut state.history, entry.clone());
                lost.push(entry);
            }
        }

        log::info!(
            "Synced {} backend tasks: {} adopted, {} finished, {} lost",
            tasks.len(),
            to_poll.len(),
            finished.len(),
            lost.len()
        );
        self.persist(&JOB_KEYS)?;

        for (job_id, status) in &to_poll {
            self.schedule_poll(job_id, self.poll_delay(*status));
        }
        for entry in finished.iter().chain(lost.iter()) {
            self.notify_finished(entry);
        }

        let mut revalidate: Vec<&str> = finished
            .iter()
            .filter(|e| e.status == TaskStatus::Completed && !e.library_path.is_empty())
            .map(|e| e.library_path.as_str())
            .collect();
        revalidate.sort_unstable();
        revalidate.dedup();
        for path in revalidate {
            self.revalidate_library_path(path).await;
        }

        self.broadcast_state();
        Ok(())
    }

    // ==================== Queries ====================

    /// `getJobStatus`: in-flight first, then history.
    pub fn get_job_status(&self, job_id: &str) -> Result<JobLookup> {
        let state = self.lock();
        if let Some(record) = state.jobs.get(job_id) {
            return Ok(JobLookup::InFlight(record.clone()));
        }
        state
            .history
            .iter()
            .find(|e| e.id == job_id)
            .map(|e| JobLookup::Finished(HistoryView::from(e)))
            .ok_or_else(|| CourierError::not_found(format!("job {}", job_id)))
    }

    /// `clearHistory`
    pub fn clear_history(&self) -> Result<()> {
        let cleared = {
            let mut state = self.lock();
            std::mem::take(&mut state.history).len()
        };
        log::info!("Cleared {} history entries", cleared);
        self.persist(&[StateKey::JobHistory])
    }

    fn target_library(&self, library_path: Option<&str>) -> Option<String> {
        match non_empty(library_path) {
            Some(path) => Some(paths::canonical_prefix(path)),
            None => self.lock().inventory.selected().map(|l| l.path.clone()),
        }
    }

    /// `checkComponentExists`: local job knowledge plus the backend's view of
    /// the target library.
    pub async fn check_component_exists(
        self: &Arc<Self>,
        lcsc_id: &str,
        library_path: Option<&str>,
    ) -> Result<ComponentStatus> {
        let lcsc_id = normalize_lcsc_id(lcsc_id)?;
        self.ensure_backend().await?;

        let target = self.target_library(library_path);
        let mut status = local_component_status(&self.lock(), &lcsc_id, target.as_deref());

        if let Some(path) = target {
            let presence = self
                .backend()
                .check_component(&path, &lcsc_id)
                .await
                .map_err(|e| self.note_backend_error(e))?;
            status.apply_presence(&presence);
        }
        Ok(status)
    }

    /// `checkComponentsExist`: batch form, one backend call for all ids.
    pub async fn check_components_exist(
        self: &Arc<Self>,
        lcsc_ids: &[String],
        library_path: Option<&str>,
    ) -> Result<Vec<ComponentStatus>> {
        let mut ids: Vec<String> = Vec::with_capacity(lcsc_ids.len());
        for raw in lcsc_ids {
            let id = normalize_lcsc_id(raw)?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_backend().await?;

        let target = self.target_library(library_path);
        let mut statuses: Vec<ComponentStatus> = {
            let state = self.lock();
            ids.iter()
                .map(|id| local_component_status(&state, id, target.as_deref()))
                .collect()
        };

        if let Some(path) = target {
            let presence = self
                .backend()
                .check_components(&path, &ids)
                .await
                .map_err(|e| self.note_backend_error(e))?;
            for status in statuses.iter_mut() {
                if let Some(found) = presence.results.get(&status.lcsc_id) {
                    status.apply_presence(found);
                }
            }
        }
        Ok(statuses)
    }
}
