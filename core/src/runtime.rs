use std::borrow::Cow;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use shell_escape::escape;
use tokio::fs::File;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::models::{RequestId, RequestStatus};
use crate::queue::JobDescriptor;
use crate::results::{LogStream, WorkDir};
use crate::store::Store;

/// Builds the shell line for a job.
///
/// `{1}`..`{n}` in the template are replaced by the shell-quoted parameters
/// in one pass; text coming from a parameter is never scanned again. A
/// template without placeholders gets the quoted parameters appended instead.
pub fn render_command(template: &str, params: &[String]) -> String {
    let quoted: Vec<Cow<'_, str>> = params.iter().map(|p| escape(Cow::Borrowed(p.as_str()))).collect();

    let mut rendered = String::with_capacity(template.len());
    let mut substituted = false;
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let value = if digits > 0 && after[digits..].starts_with('}') {
            after[..digits]
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| quoted.get(i))
        } else {
            None
        };
        match value {
            Some(value) => {
                rendered.push_str(value);
                substituted = true;
                rest = &after[digits + 1..];
            }
            // Not a placeholder we can fill: keep the brace literally.
            None => {
                rendered.push('{');
                rest = after;
            }
        }
    }
    rendered.push_str(rest);

    if !substituted && !quoted.is_empty() {
        rendered.push(' ');
        rendered.push_str(&quoted.join(" "));
    }
    rendered
}

// The local execution engine: drains the channel queue one job at a time.
pub struct Worker {
    store: Arc<dyn Store>,
    workdir: WorkDir,
}

impl Worker {
    pub fn new(store: Arc<dyn Store>, workdir: WorkDir) -> Self {
        Self { store, workdir }
    }

    /// Runs until every queue sender is dropped.
    pub async fn run(self, mut jobs: mpsc::Receiver<JobDescriptor>) {
        info!("Worker started, base directory {}", self.workdir.base().display());
        while let Some(job) = jobs.recv().await {
            let id = job.id;
            let status = match self.run_job(&job).await {
                Ok(true) => RequestStatus::Completed,
                Ok(false) => RequestStatus::Failed,
                Err(e) => {
                    error!(request_id = id, "Job could not be executed: {:#}", e);
                    RequestStatus::Failed
                }
            };
            self.finish(id, status).await;
        }
        info!("Job queue closed, worker stopping");
    }

    // Executes one job. Ok(false) means the command ran and exited non-zero.
    pub async fn run_job(&self, job: &JobDescriptor) -> Result<bool> {
        if job.input_params.len() != job.num_required_input_params as usize {
            warn!(
                request_id = job.id,
                "Job carries {} parameters, {} required",
                job.input_params.len(),
                job.num_required_input_params
            );
            return Ok(false);
        }

        // A. Prepare the request directory and log files
        let dir = self.workdir.request_dir(job.id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        let stdout = File::create(self.workdir.log_path(job.id, LogStream::Stdout)).await?;
        let stderr = File::create(self.workdir.log_path(job.id, LogStream::Stderr)).await?;

        // B. Render and launch
        let line = render_command(&job.command, &job.input_params);
        info!(request_id = job.id, "Executing: {}", line);
        let status = Command::new("sh")
            .arg("-c")
            .arg(&line)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(stdout.into_std().await)
            .stderr(stderr.into_std().await)
            .status()
            .await
            .context("spawning sh")?;

        info!(request_id = job.id, "Command exited with {}", status);
        Ok(status.success())
    }

    // Marker first, then status: a terminal status implies a published directory.
    async fn finish(&self, id: RequestId, status: RequestStatus) {
        if let Err(e) = self.workdir.publish(id, status).await {
            error!(request_id = id, "Failed to publish completion marker: {}", e);
        }
        match self.store.set_request_status(id, status).await {
            Ok(true) => {}
            Ok(false) => warn!(request_id = id, "Finished job has no request record"),
            Err(e) => error!(request_id = id, "Failed to record status {}: {}", status, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ApiDefinition;
    use crate::queue::{ChannelQueue, JobQueue};
    use crate::store::SqliteStore;

    #[test]
    fn placeholders_are_replaced_with_quoted_params() {
        let params = vec!["a b".to_string(), "x".to_string()];
        assert_eq!(render_command("cp {1} {2}", &params), "cp 'a b' x");
        assert_eq!(render_command("cat", &params), "cat 'a b' x");
        assert_eq!(render_command("date", &[]), "date");
    }

    #[test]
    fn double_digit_placeholders_are_not_clobbered() {
        let params: Vec<String> = (1..=12).map(|i| format!("p{i}")).collect();
        assert_eq!(render_command("{1}-{12}", &params), "p1-p12");
    }

    #[test]
    fn shell_metacharacters_stay_inert() {
        let params = vec!["$(rm -rf /); echo".to_string()];
        assert_eq!(render_command("echo {1}", &params), "echo '$(rm -rf /); echo'");
    }

    #[test]
    fn parameter_text_is_never_rescanned_for_placeholders() {
        let params = vec!["$(id)".to_string(), "{1}".to_string()];
        assert_eq!(render_command("echo {1} {2}", &params), "echo '$(id)' '{1}'");
    }

    #[test]
    fn unfillable_braces_are_left_alone() {
        let params = vec!["x".to_string()];
        assert_eq!(render_command("awk '{print}' {1} {2} {}", &params), "awk '{print}' x {2} {}");
    }

    #[cfg(unix)]
    #[test]
    fn quoted_parameters_do_not_run_under_sh() {
        let tmp = tempfile::tempdir().unwrap();
        let params = vec!["$(touch pwned)".to_string(), "{1}".to_string()];
        let line = render_command("echo {1} {2}", &params);

        let output = std::process::Command::new("sh").arg("-c").arg(&line).current_dir(tmp.path()).output().unwrap();

        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), "$(touch pwned) {1}\n");
        assert!(!tmp.path().join("pwned").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn worker_runs_jobs_and_publishes_results() {
        let tmp = tempfile::tempdir().unwrap();
        let workdir = WorkDir::new(tmp.path());
        let store = Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap());
        store.run_migrations().await.unwrap();
        store
            .upsert_api(&ApiDefinition {
                id: 1,
                name: "echo".to_string(),
                description: String::new(),
                command: "echo {1} > out.txt; echo done".to_string(),
                num_input_params: 1,
                output_files: vec!["out.txt".to_string()],
                authorized_groups: vec!["guest".to_string()],
            })
            .await
            .unwrap();
        let user = store.upsert_user("alice", &[]).await.unwrap();
        let ok = store
            .create_request(user.id, 1, &["hello".to_string()], RequestStatus::Processing)
            .await
            .unwrap();
        let bad = store.create_request(user.id, 1, &[], RequestStatus::Processing).await.unwrap();

        let (queue, rx) = ChannelQueue::new(4);
        queue
            .enqueue(JobDescriptor {
                id: ok.id,
                command: "echo {1} > out.txt; echo done".to_string(),
                input_params: vec!["hello".to_string()],
                num_required_input_params: 1,
            })
            .await
            .unwrap();
        queue
            .enqueue(JobDescriptor {
                id: bad.id,
                command: "echo oops >&2; exit 3".to_string(),
                input_params: vec![],
                num_required_input_params: 0,
            })
            .await
            .unwrap();
        drop(queue);

        Worker::new(store.clone(), workdir.clone()).run(rx).await;

        let done = store.get_request(ok.id).await.unwrap().unwrap();
        assert_eq!(done.status, RequestStatus::Completed);
        assert!(workdir.is_published(ok.id).await);
        assert_eq!(std::fs::read_to_string(workdir.request_dir(ok.id).join("out.txt")).unwrap(), "hello\n");
        assert_eq!(workdir.read_log(ok.id, LogStream::Stdout).await.unwrap(), b"done\n");

        let failed = store.get_request(bad.id).await.unwrap().unwrap();
        assert_eq!(failed.status, RequestStatus::Failed);
        assert_eq!(workdir.read_log(bad.id, LogStream::Stderr).await.unwrap(), b"oops\n");
    }
}
