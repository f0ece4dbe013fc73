use crate::recipe::BuildRecipe;
use crate::{ImageBuilderError, ImageBuilderResult};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Lines of build output kept for error reports
const OUTPUT_TAIL_LINES: usize = 20;

/// Container runtime used to build and inspect images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRuntime {
    Podman,
    Docker,
}

impl ContainerRuntime {
    pub fn command(&self) -> &'static str {
        match self {
            ContainerRuntime::Podman => "podman",
            ContainerRuntime::Docker => "docker",
        }
    }

    async fn is_installed(&self) -> bool {
        Command::new(self.command())
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|status| status.success())
    }
}

/// Detect an installed runtime, preferring podman
pub async fn detect_runtime() -> Option<ContainerRuntime> {
    for runtime in [ContainerRuntime::Podman, ContainerRuntime::Docker] {
        if runtime.is_installed().await {
            debug!("Using container runtime: {}", runtime.command());
            return Some(runtime);
        }
    }
    None
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub tag: String,
    pub duration: Duration,
}

/// Builds recipes with an external container runtime
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    runtime: ContainerRuntime,
    context_dir: PathBuf,
    timeout: Duration,
}

impl ImageBuilder {
    pub fn new(runtime: ContainerRuntime, context_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            context_dir: context_dir.into(),
            timeout: Duration::from_secs(15 * 60),
        }
    }

    /// Use whichever runtime is installed
    pub async fn detect(context_dir: impl Into<PathBuf>) -> ImageBuilderResult<Self> {
        let runtime = detect_runtime()
            .await
            .ok_or(ImageBuilderError::NoRuntimeAvailable)?;
        Ok(Self::new(runtime, context_dir))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn runtime(&self) -> ContainerRuntime {
        self.runtime
    }

    pub fn context_dir(&self) -> &Path {
        &self.context_dir
    }

    /// Arguments for `<runtime> build`, reading the Dockerfile from stdin
    pub fn build_args(&self, tag: &str) -> Vec<String> {
        vec![
            "build".to_string(),
            "-f".to_string(),
            "-".to_string(),
            "-t".to_string(),
            tag.to_string(),
            self.context_dir.display().to_string(),
        ]
    }

    /// Build `recipe` and tag the result
    pub async fn build(&self, recipe: &BuildRecipe, tag: &str) -> ImageBuilderResult<BuildOutput> {
        if tag.trim().is_empty() {
            return Err(ImageBuilderError::InvalidConfig(
                "Image tag cannot be empty".to_string(),
            ));
        }
        if !self.context_dir.is_dir() {
            return Err(ImageBuilderError::InvalidConfig(format!(
                "Build context '{}' is not a directory",
                self.context_dir.display()
            )));
        }

        let dockerfile = recipe.render();
        let start = Instant::now();
        info!(
            "Building image {} with {} (context: {})",
            tag,
            self.runtime.command(),
            self.context_dir.display()
        );

        let mut child = Command::new(self.runtime.command())
            .args(self.build_args(tag))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let run = feed_and_wait(child, dockerfile.into_bytes());
        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(output) => output?,
            Err(_) => {
                warn!("Image build for {} timed out", tag);
                return Err(ImageBuilderError::BuildTimeout {
                    duration: self.timeout,
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ImageBuilderError::BuildFailed {
                status: output.status.code(),
                output: tail(&stderr, OUTPUT_TAIL_LINES),
            });
        }

        let duration = start.elapsed();
        info!("Built image {} in {:?}", tag, duration);
        Ok(BuildOutput {
            tag: tag.to_string(),
            duration,
        })
    }

    /// Ports declared by `EXPOSE` in a built image
    pub async fn exposed_ports(&self, tag: &str) -> ImageBuilderResult<Vec<u16>> {
        let output = Command::new(self.runtime.command())
            .args([
                "image",
                "inspect",
                "--format",
                "{{range $port, $_ := .Config.ExposedPorts}}{{$port}} {{end}}",
                tag,
            ])
            .output()
            .await?;

        if !output.status.success() {
            return Err(ImageBuilderError::ImageNotFound {
                tag: tag.to_string(),
            });
        }

        Ok(parse_exposed_ports(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Write `input` to the child's stdin, then collect its output. A runtime that
/// exits before reading everything (daemon down, bad flags) still reports its
/// exit status and stderr.
async fn feed_and_wait(mut child: Child, input: Vec<u8>) -> std::io::Result<Output> {
    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(&input).await {
            warn!("Build runtime stopped reading the Dockerfile: {}", e);
        }
        // closing stdin ends the Dockerfile
        drop(stdin);
    }
    child.wait_with_output().await
}

/// Parse `8000/tcp 9090/udp` style port lists
pub fn parse_exposed_ports(raw: &str) -> Vec<u16> {
    raw.split_whitespace()
        .filter_map(|entry| entry.split('/').next())
        .filter_map(|port| port.parse().ok())
        .collect()
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::ServiceImage;

    #[test]
    fn test_runtime_commands() {
        assert_eq!(ContainerRuntime::Podman.command(), "podman");
        assert_eq!(ContainerRuntime::Docker.command(), "docker");
    }

    #[test]
    fn test_build_args() {
        let builder = ImageBuilder::new(ContainerRuntime::Podman, "/work/ctx");
        assert_eq!(
            builder.build_args("iscool-gpt:dev"),
            vec!["build", "-f", "-", "-t", "iscool-gpt:dev", "/work/ctx"]
        );
        assert_eq!(builder.runtime(), ContainerRuntime::Podman);
        assert_eq!(builder.context_dir(), Path::new("/work/ctx"));
    }

    #[test]
    fn test_parse_exposed_ports() {
        assert_eq!(parse_exposed_ports("8000/tcp \n"), vec![8000]);
        assert_eq!(parse_exposed_ports("8000/tcp 9090/udp "), vec![8000, 9090]);
        assert!(parse_exposed_ports("").is_empty());
        assert!(parse_exposed_ports("<no value>").is_empty());
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("a\nb\nc", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
        assert_eq!(tail("", 5), "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_early_exit_keeps_status_and_stderr() {
        let child = Command::new("sh")
            .args(["-c", "echo 'Cannot connect to the daemon' >&2; exit 3"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        // larger than a pipe buffer, so the write cannot succeed after exit
        let output = feed_and_wait(child, vec![b'#'; 1 << 20]).await.unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert!(String::from_utf8_lossy(&output.stderr).contains("Cannot connect to the daemon"));
    }

    #[tokio::test]
    async fn test_build_rejects_bad_inputs() {
        let recipe = ServiceImage::gateway().recipe();

        let builder = ImageBuilder::new(ContainerRuntime::Docker, "/definitely/not/here");
        assert!(matches!(
            builder.build(&recipe, "tag").await,
            Err(ImageBuilderError::InvalidConfig(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let builder = ImageBuilder::new(ContainerRuntime::Docker, dir.path());
        assert!(matches!(
            builder.build(&recipe, "  ").await,
            Err(ImageBuilderError::InvalidConfig(_))
        ));
    }
}
