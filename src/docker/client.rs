//! `bollard`-backed implementation of [`ContainerClient`].
//!
//! Grounded on `environment/docker/{container,power}.rs`: the same
//! create/attach/kill call shapes, carried over to the narrower spec this
//! service needs (no ports, no tmpfs, no restart policy — one-shot runs).

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    KillContainerOptions, LogOutput, LogsOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use bollard::Docker;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{
    ContainerClient, ContainerClientError, CreateContainerInput, LogFrame, LogStream,
};

pub struct BollardContainerClient {
    docker: Docker,
}

impl BollardContainerClient {
    pub fn connect() -> Result<Self, ContainerClientError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    async fn ensure_image_exists(&self, image: &str) -> Result<(), ContainerClientError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                info!("image {} not found locally, pulling", image);
            }
            Err(e) => {
                warn!("error inspecting image {}: {}, attempting pull anyway", image, e);
            }
        }

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("pull {}: {}", image, status);
                    }
                }
                Err(e) => {
                    return Err(ContainerClientError::ImagePull {
                        image: image.to_string(),
                        source: e,
                    });
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ContainerClient for BollardContainerClient {
    async fn create_container(
        &self,
        input: CreateContainerInput,
    ) -> Result<String, ContainerClientError> {
        self.ensure_image_exists(&input.image).await?;

        let mount = Mount {
            target: Some(input.mount.container_path.clone()),
            source: Some(input.mount.host_path.clone()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(input.mount.read_only),
            ..Default::default()
        };

        let mut host_config = HostConfig {
            mounts: Some(vec![mount]),
            auto_remove: Some(true),
            memory: if input.memory_mb > 0 {
                Some(input.memory_mb * 1024 * 1024)
            } else {
                None
            },
            cpu_shares: if input.cpu_shares > 0 {
                Some(input.cpu_shares)
            } else {
                None
            },
            privileged: Some(false),
            log_config: Some(bollard::models::HostConfigLogConfig {
                typ: Some("json-file".to_string()),
                config: Some({
                    let mut cfg = HashMap::new();
                    cfg.insert("mode".to_string(), "non-blocking".to_string());
                    cfg
                }),
            }),
            ..Default::default()
        };

        if input.use_strong_isolation {
            host_config.runtime = Some("runsc".to_string());
        }

        let container_config = Config {
            open_stdin: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            image: Some(input.image.clone()),
            network_disabled: Some(true),
            cmd: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                input.full_command.clone(),
            ]),
            working_dir: Some("/bg".to_string()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: input.name.clone(),
            platform: Some(format!(
                "{}/{}{}",
                input.platform.os,
                input.platform.arch,
                input
                    .platform
                    .variant
                    .as_ref()
                    .map(|v| format!("/{v}"))
                    .unwrap_or_default()
            )),
        };

        let resp = self
            .docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| {
                if let bollard::errors::Error::DockerResponseServerError {
                    status_code: 409, ..
                } = e
                {
                    return ContainerClientError::ContainerExists(input.name.clone());
                }
                ContainerClientError::Docker(e)
            })?;

        Ok(resp.id)
    }

    async fn start_and_attach_logs(&self, id: &str) -> Result<LogStream, ContainerClientError> {
        let start_options = StartContainerOptions::<String> {
            ..Default::default()
        };
        self.docker.start_container(id, Some(start_options)).await?;

        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            timestamps: false,
            ..Default::default()
        };

        let logs = self.docker.logs(id, Some(options)).map(|item| {
            item.map(|output| match output {
                LogOutput::StdOut { message } => LogFrame::StdOut(message),
                LogOutput::StdErr { message } => LogFrame::StdErr(message),
                LogOutput::StdIn { message } => LogFrame::StdOut(message),
                LogOutput::Console { message } => LogFrame::StdOut(message),
            })
            .map_err(ContainerClientError::from)
        });

        Ok(Box::pin(logs))
    }

    async fn feed_stdin(&self, id: &str, text: &str) -> Result<(), ContainerClientError> {
        let mut payload = text.to_string();
        if !payload.ends_with('\n') {
            payload.push('\n');
        }

        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stream: Some(true),
            ..Default::default()
        };

        let AttachContainerResults { mut input, .. } =
            self.docker.attach_container(id, Some(options)).await?;

        input.write_all(payload.as_bytes()).await?;
        input.flush().await?;
        input.shutdown().await?;

        Ok(())
    }

    async fn kill_container(&self, id: &str) -> Result<bool, ContainerClientError> {
        let info = match self.docker.inspect_container(id, None).await {
            Ok(info) => info,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(false),
            Err(e) => return Err(ContainerClientError::Docker(e)),
        };

        let running = info.state.and_then(|s| s.running).unwrap_or(false);
        if !running {
            return Ok(false);
        }

        match self
            .docker
            .kill_container(id, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await
        {
            Ok(()) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(false),
            Err(e) => Err(ContainerClientError::Docker(e)),
        }
    }
}

