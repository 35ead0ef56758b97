//! kubectl Adapter
//!
//! Implements the cluster CLI port by spawning `kubectl`. Manifests are fed
//! through stdin (`-f -`); `NotFound` answers from the API server are mapped
//! to `Error::NotFound` so callers can treat absence as an outcome.

use crate::config::KubectlConfig;
use crate::domain::model::ObjectKind;
use crate::domain::ports::ClusterCli;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

/// Cluster CLI backed by the `kubectl` binary
pub struct Kubectl {
    config: KubectlConfig,
}

/// Captured result of one kubectl invocation
struct Invocation {
    rendered: String,
    success: bool,
    stdout: String,
    stderr: String,
}

impl Kubectl {
    pub fn new(config: KubectlConfig) -> Self {
        Self { config }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(kubeconfig) = &self.config.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.display().to_string());
        }
        if let Some(context) = &self.config.context {
            args.push("--context".to_string());
            args.push(context.clone());
        }
        args
    }

    async fn invoke(&self, args: Vec<String>, input: Option<&str>) -> Result<Invocation> {
        let mut full_args = self.base_args();
        full_args.extend(args);
        let rendered = format!("{} {}", self.config.binary, full_args.join(" "));
        trace!(command = %rendered, "Running kubectl");

        let mut child = Command::new(&self.config.binary)
            .args(&full_args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ExternalCallFailed {
                command: rendered.clone(),
                reason: format!("spawn failed: {}", e),
            })?;

        if let (Some(data), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin
                .write_all(data.as_bytes())
                .await
                .map_err(|e| Error::ExternalCallFailed {
                    command: rendered.clone(),
                    reason: format!("writing stdin: {}", e),
                })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::ExternalCallFailed {
                command: rendered.clone(),
                reason: e.to_string(),
            })?;

        Ok(Invocation {
            rendered,
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run and require success, mapping `NotFound` answers for `target`
    async fn run(
        &self,
        args: Vec<String>,
        input: Option<&str>,
        target: Option<(ObjectKind, Option<&str>, &str)>,
    ) -> Result<String> {
        let inv = self.invoke(args, input).await?;
        if inv.success {
            return Ok(inv.stdout);
        }

        if let Some((kind, namespace, name)) = target {
            if is_not_found(&inv.stderr) {
                return Err(Error::not_found(kind.to_string(), namespace, name));
            }
        }

        Err(Error::ExternalCallFailed {
            command: inv.rendered,
            reason: inv.stderr.trim().to_string(),
        })
    }
}

/// Whether kubectl's stderr reports a missing object
fn is_not_found(stderr: &str) -> bool {
    stderr.contains("(NotFound)")
}

fn namespace_args(namespace: Option<&str>) -> Vec<String> {
    match namespace {
        Some(ns) => vec!["-n".to_string(), ns.to_string()],
        None => Vec::new(),
    }
}

/// `kubectl delete` returns once the deletion is accepted; finalizers are
/// awaited by polling
fn delete_args(namespace: Option<&str>) -> Vec<String> {
    let mut args = vec!["delete".to_string(), "--wait=false".to_string()];
    args.extend(namespace_args(namespace));
    args
}

#[async_trait]
impl ClusterCli for Kubectl {
    async fn apply(&self, namespace: Option<&str>, manifest: &str) -> Result<()> {
        let mut args = vec!["apply".to_string()];
        args.extend(namespace_args(namespace));
        args.extend(["-f".to_string(), "-".to_string()]);

        let out = self.run(args, Some(manifest), None).await?;
        debug!(output = %out.trim(), "Applied manifest");
        Ok(())
    }

    async fn delete_manifest(&self, namespace: Option<&str>, manifest: &str) -> Result<()> {
        let mut args = delete_args(namespace);
        args.extend(["-f".to_string(), "-".to_string()]);

        let out = self.run(args, Some(manifest), None).await?;
        debug!(output = %out.trim(), "Deleted manifest");
        Ok(())
    }

    async fn delete(&self, kind: ObjectKind, namespace: Option<&str>, name: &str) -> Result<()> {
        let mut args = delete_args(namespace);
        args.extend([kind.resource().to_string(), name.to_string()]);

        self.run(args, None, Some((kind, namespace, name))).await?;
        debug!(kind = %kind, name = %name, "Deleted object");
        Ok(())
    }

    async fn get(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<serde_json::Value> {
        let mut args = vec!["get".to_string()];
        args.extend(namespace_args(namespace));
        args.extend([
            kind.resource().to_string(),
            name.to_string(),
            "-o".to_string(),
            "json".to_string(),
        ]);

        let out = self.run(args, None, Some((kind, namespace, name))).await?;
        serde_json::from_str(&out).map_err(|e| Error::MalformedResponse {
            what: format!("{} {}", kind, name),
            reason: e.to_string(),
        })
    }

    async fn exec(&self, namespace: &str, pod: &str, command: &[&str]) -> Result<String> {
        let mut args = vec![
            "exec".to_string(),
            "-n".to_string(),
            namespace.to_string(),
            pod.to_string(),
            "--".to_string(),
        ];
        args.extend(command.iter().map(|s| s.to_string()));

        self.run(args, None, Some((ObjectKind::Pod, Some(namespace), pod)))
            .await
    }
}
