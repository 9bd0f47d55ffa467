//! Worker report polling
//!
//! Workers append line-delimited JSON records to `<remote>/reports/status-*`
//! and their script output to `<remote>/reports/task-*`.

use crate::endpoint::{Endpoint, join};
use crate::error::{Result, StorageError};
use serde::{Deserialize, Deserializer};
use taskfleet_cloud::{Status, StatusCode};

/// Final state written by a worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StatusReport {
    #[serde(alias = "Result")]
    pub result: String,
    #[serde(alias = "Status")]
    pub status: String,
    /// Exit code; workers write it either as a string or a number
    #[serde(alias = "Code", deserialize_with = "code_string")]
    pub code: String,
}

impl StatusReport {
    pub fn outcome(&self) -> Option<StatusCode> {
        if !self.code.is_empty() {
            if self.code == "0" {
                Some(StatusCode::Succeeded)
            } else {
                Some(StatusCode::Failed)
            }
        } else if self.result == "timeout" {
            Some(StatusCode::Failed)
        } else {
            None
        }
    }
}

fn code_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(code) => code,
        serde_json::Value::Number(code) => code.to_string(),
        _ => String::new(),
    })
}

/// Contents of every report named `<prefix>-*`, ordered by name
pub async fn reports(remote: &str, prefix: &str) -> Result<Vec<String>> {
    let location = join(remote, "reports")?;
    let endpoint = match Endpoint::resolve(&location, false).await {
        Ok(endpoint) => endpoint,
        Err(StorageError::NotFound(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let objects = match endpoint.list().await {
        Ok(objects) => objects,
        Err(StorageError::Store(object_store::Error::NotFound { .. })) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let wanted = format!("{prefix}-");
    let mut selected: Vec<_> = objects
        .into_iter()
        .filter(|meta| {
            meta.location
                .filename()
                .is_some_and(|name| name.starts_with(&wanted))
        })
        .collect();
    selected.sort_by(|a, b| a.location.cmp(&b.location));

    let mut contents = Vec::with_capacity(selected.len());
    for meta in selected {
        let data = endpoint.store().get(&meta.location).await?.bytes().await?;
        contents.push(String::from_utf8_lossy(&data).to_string());
    }
    Ok(contents)
}

/// Output of every worker
pub async fn logs(remote: &str) -> Result<Vec<String>> {
    reports(remote, "task").await
}

/// Add the outcome of every finished worker to `baseline`
///
/// Every call counts every report it finds; callers start each poll from a
/// freshly read baseline rather than a previously returned status.
pub async fn status(remote: &str, mut baseline: Status) -> Result<Status> {
    for (index, report) in reports(remote, "status").await?.iter().enumerate() {
        let Some(line) = report.lines().rev().find(|line| !line.trim().is_empty()) else {
            continue;
        };
        let record: StatusReport =
            serde_json::from_str(line).map_err(|e| StorageError::MalformedReport {
                name: format!("status report #{}", index + 1),
                reason: e.to_string(),
            })?;
        if let Some(code) = record.outcome() {
            baseline.increment(code);
        }
    }
    Ok(baseline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_reports(root: &std::path::Path, reports: &[(&str, &str)]) {
        let dir = root.join("reports");
        fs::create_dir_all(&dir).unwrap();
        for (name, content) in reports {
            fs::write(dir.join(name), content).unwrap();
        }
    }

    #[tokio::test]
    async fn test_status_aggregation() {
        let remote = tempdir().unwrap();
        write_reports(
            remote.path(),
            &[
                ("status-a", r#"{"code":"0"}"#),
                ("status-b", r#"{"code":"1"}"#),
                ("status-c", r#"{"result":"timeout"}"#),
            ],
        );
        let baseline = Status::new().with(StatusCode::Active, 1);

        let status = status(remote.path().to_str().unwrap(), baseline)
            .await
            .unwrap();

        assert_eq!(status.get(StatusCode::Active), 1);
        assert_eq!(status.get(StatusCode::Succeeded), 1);
        assert_eq!(status.get(StatusCode::Failed), 2);
    }

    #[tokio::test]
    async fn test_last_record_wins() {
        let remote = tempdir().unwrap();
        write_reports(
            remote.path(),
            &[(
                "status-worker",
                "{\"Status\":\"running\"}\n{\"Result\":\"done\",\"Code\":137}\n\n",
            )],
        );
        let status = status(remote.path().to_str().unwrap(), Status::new())
            .await
            .unwrap();
        assert_eq!(status.get(StatusCode::Failed), 1);
    }

    #[tokio::test]
    async fn test_reports_filter_and_order() {
        let remote = tempdir().unwrap();
        write_reports(
            remote.path(),
            &[
                ("task-b", "second"),
                ("task-a", "first"),
                ("status-a", "{}"),
                ("tasks-x", "not a log"),
            ],
        );
        let logs = logs(remote.path().to_str().unwrap()).await.unwrap();
        assert_eq!(logs, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_missing_reports_directory() {
        let remote = tempdir().unwrap();
        assert!(logs(remote.path().to_str().unwrap()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_running_worker_is_not_counted() {
        let remote = tempdir().unwrap();
        write_reports(remote.path(), &[("status-a", r#"{"status":"running"}"#)]);
        let status = status(remote.path().to_str().unwrap(), Status::new())
            .await
            .unwrap();
        assert_eq!(status, Status::new());
    }
}
