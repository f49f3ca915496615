//! bollard-backed runtime.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, InspectContainerOptions,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions, WaitContainerOptions,
};
use bollard::image::CommitContainerOptions;
use bollard::network::{ConnectNetworkOptions, CreateNetworkOptions};
use bollard::Docker;
use chrono::{DateTime, FixedOffset};
use futures_util::StreamExt;
use std::time::Duration;
use tracing::debug;

use super::{ContainerRuntime, LogStreams, NetworkHandle, RunTimes, UnitHandle, UnitSpec};
use crate::error::{HarnessError, Result};

/// Container runtime talking to the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the local defaults (`DOCKER_HOST` or the unix socket).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    /// Wrap an existing bollard client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(details) => {
                debug!(image, tags = ?details.repo_tags, "image exists");
                Ok(true)
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_network(&self, name: &str) -> Result<NetworkHandle> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            check_duplicate: true,
            ..Default::default()
        };
        self.docker.create_network(options).await?;
        Ok(NetworkHandle::new(name))
    }

    async fn connect(&self, network: &NetworkHandle, unit: &UnitHandle) -> Result<()> {
        let options = ConnectNetworkOptions {
            container: unit.id().to_string(),
            ..Default::default()
        };
        self.docker.connect_network(network.name(), options).await?;
        Ok(())
    }

    async fn remove_network(&self, network: &NetworkHandle) -> Result<()> {
        self.docker.remove_network(network.name()).await?;
        Ok(())
    }

    async fn create(&self, spec: &UnitSpec) -> Result<UnitHandle> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let config = Config {
            image: Some(spec.image.clone()),
            entrypoint: Some(spec.entrypoint.clone()),
            hostname: Some(spec.hostname().to_string()),
            env: Some(spec.env.clone()),
            ..Default::default()
        };

        let created = self.docker.create_container(Some(options), config).await?;
        for warning in &created.warnings {
            debug!(unit = %spec.name, warning = %warning, "create warning");
        }
        Ok(UnitHandle::new(created.id))
    }

    async fn start(&self, unit: &UnitHandle) -> Result<()> {
        self.docker
            .start_container(unit.id(), None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn wait(&self, unit: &UnitHandle, timeout: Duration) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(unit.id(), Some(options));

        let next = tokio::time::timeout(timeout, stream.next())
            .await
            .map_err(|_| HarnessError::Timeout {
                unit: unit.id().to_string(),
                secs: timeout.as_secs(),
            })?;

        match next {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error on the wait stream
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(HarnessError::Runtime(format!(
                "wait stream for {} ended without a status",
                unit
            ))),
        }
    }

    async fn stop(&self, unit: &UnitHandle, timeout: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        self.docker.stop_container(unit.id(), Some(options)).await?;
        Ok(())
    }

    async fn remove(&self, unit: &UnitHandle) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_container(unit.id(), Some(options)).await?;
        Ok(())
    }

    async fn logs(&self, unit: &UnitHandle, streams: LogStreams) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: streams.stdout,
            stderr: streams.stderr,
            follow: false,
            ..Default::default()
        };

        let mut log_stream = self.docker.logs(unit.id(), Some(options));
        let mut logs = String::new();

        while let Some(chunk) = log_stream.next().await {
            logs.push_str(&chunk?.to_string());
        }

        Ok(logs)
    }

    async fn copy_in(&self, unit: &UnitHandle, path: &str, archive: Vec<u8>) -> Result<()> {
        let options = UploadToContainerOptions {
            path: path.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(unit.id(), Some(options), archive.into())
            .await?;
        Ok(())
    }

    async fn copy_out(&self, unit: &UnitHandle, path: &str) -> Result<Vec<u8>> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };
        let mut stream = self.docker.download_from_container(unit.id(), Some(options));

        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            archive.extend_from_slice(&chunk?);
        }
        Ok(archive)
    }

    async fn commit(&self, unit: &UnitHandle, repo: &str, tag: &str) -> Result<String> {
        let options = CommitContainerOptions {
            container: unit.id().to_string(),
            repo: repo.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };
        self.docker
            .commit_container(options, Config::<String>::default())
            .await?;
        Ok(format!("{}:{}", repo, tag))
    }

    async fn run_times(&self, unit: &UnitHandle) -> Result<RunTimes> {
        let details = self
            .docker
            .inspect_container(unit.id(), None::<InspectContainerOptions>)
            .await?;
        let state = details
            .state
            .ok_or_else(|| HarnessError::Runtime(format!("{} has no state", unit)))?;

        Ok(RunTimes {
            started_at: parse_timestamp(unit, state.started_at.as_deref())?,
            finished_at: parse_timestamp(unit, state.finished_at.as_deref())?,
        })
    }
}

fn parse_timestamp(unit: &UnitHandle, value: Option<&str>) -> Result<DateTime<FixedOffset>> {
    let value = value
        .ok_or_else(|| HarnessError::Runtime(format!("{} has no recorded run times", unit)))?;
    DateTime::parse_from_rfc3339(value).map_err(|e| {
        HarnessError::Runtime(format!("invalid timestamp {:?} for {}: {}", value, unit, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_docker_timestamp_with_nanoseconds() {
        let unit = UnitHandle::new("client1");
        let ts = parse_timestamp(&unit, Some("2026-01-15T10:00:00.123456789Z")).unwrap();
        assert_eq!(ts.timestamp(), 1_768_471_200);
    }

    #[test]
    fn parse_missing_timestamp_fails() {
        let unit = UnitHandle::new("client1");
        let err = parse_timestamp(&unit, None).unwrap_err();
        assert!(err.to_string().contains("client1"));
    }
}
