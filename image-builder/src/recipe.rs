//! Multi-stage container recipes.
//!
//! A [`BuildRecipe`] is an ordered list of [`Stage`]s. Earlier stages install
//! dependencies; the last stage is the runtime image and only receives what it
//! copies from them. Recipes render to Dockerfile text accepted by both podman
//! and docker.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// A single build instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    Workdir(String),
    Env { key: String, value: String },
    Copy {
        from: Option<String>,
        src: String,
        dest: String,
    },
    Run(String),
    Expose(u16),
    /// Launch command in exec form
    Cmd(Vec<String>),
}

impl Instruction {
    fn render(&self) -> String {
        match self {
            Instruction::Workdir(path) => format!("WORKDIR {}", path),
            Instruction::Env { key, value } => {
                if value.chars().any(char::is_whitespace) {
                    format!("ENV {}={}", key, quote(value))
                } else {
                    format!("ENV {}={}", key, value)
                }
            }
            Instruction::Copy { from, src, dest } => match from {
                Some(stage) => format!("COPY --from={} {} {}", stage, src, dest),
                None => format!("COPY {} {}", src, dest),
            },
            Instruction::Run(command) => format!("RUN {}", command),
            Instruction::Expose(port) => format!("EXPOSE {}", port),
            Instruction::Cmd(argv) => {
                let args: Vec<String> = argv.iter().map(|arg| quote(arg)).collect();
                format!("CMD [{}]", args.join(", "))
            }
        }
    }
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// One `FROM` block of a recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub base_image: String,
    pub name: Option<String>,
    pub instructions: Vec<Instruction>,
}

impl Stage {
    pub fn new(base_image: impl Into<String>) -> Self {
        Self {
            base_image: base_image.into(),
            name: None,
            instructions: Vec::new(),
        }
    }

    pub fn named(base_image: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(base_image)
        }
    }

    pub fn workdir(mut self, path: impl Into<String>) -> Self {
        self.instructions.push(Instruction::Workdir(path.into()));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.instructions.push(Instruction::Env {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn copy(mut self, src: impl Into<String>, dest: impl Into<String>) -> Self {
        self.instructions.push(Instruction::Copy {
            from: None,
            src: src.into(),
            dest: dest.into(),
        });
        self
    }

    pub fn copy_from(
        mut self,
        stage: impl Into<String>,
        src: impl Into<String>,
        dest: impl Into<String>,
    ) -> Self {
        self.instructions.push(Instruction::Copy {
            from: Some(stage.into()),
            src: src.into(),
            dest: dest.into(),
        });
        self
    }

    pub fn run(mut self, command: impl Into<String>) -> Self {
        self.instructions.push(Instruction::Run(command.into()));
        self
    }

    pub fn expose(mut self, port: u16) -> Self {
        self.instructions.push(Instruction::Expose(port));
        self
    }

    pub fn cmd<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instructions
            .push(Instruction::Cmd(argv.into_iter().map(Into::into).collect()));
        self
    }

    /// Value of the last `ENV key=...` in this stage
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.instructions.iter().rev().find_map(|i| match i {
            Instruction::Env { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn exposed_ports(&self) -> Vec<u16> {
        self.instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Expose(port) => Some(*port),
                _ => None,
            })
            .collect()
    }

    pub fn commands(&self) -> Vec<&[String]> {
        self.instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Cmd(argv) => Some(argv.as_slice()),
                _ => None,
            })
            .collect()
    }

    fn render_into(&self, out: &mut String) {
        match &self.name {
            Some(name) => {
                let _ = writeln!(out, "FROM {} AS {}", self.base_image, name);
            }
            None => {
                let _ = writeln!(out, "FROM {}", self.base_image);
            }
        }
        for instruction in &self.instructions {
            let _ = writeln!(out, "{}", instruction.render());
        }
    }
}

/// An ordered multi-stage build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecipe {
    pub stages: Vec<Stage>,
}

impl BuildRecipe {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// The runtime stage
    pub fn final_stage(&self) -> Option<&Stage> {
        self.stages.last()
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages
            .iter()
            .find(|stage| stage.name.as_deref() == Some(name))
    }

    /// Render as Dockerfile text
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            stage.render_into(&mut out);
        }
        out
    }
}

/// High-level description of a service image built in two stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceImage {
    pub builder_image: String,
    pub builder_workdir: String,
    /// Paths copied into the builder before installing
    pub builder_inputs: Vec<String>,
    pub install_commands: Vec<String>,
    /// Directory in the builder holding everything the runtime needs
    pub install_prefix: String,
    pub runtime_image: String,
    pub runtime_workdir: String,
    pub runtime_setup: Vec<String>,
    /// Application source directory copied as-is into the runtime
    pub app_dir: Option<String>,
    pub env: Vec<(String, String)>,
    pub port: u16,
    /// What the launch command must reference, e.g. `app.main:app`
    pub entry_point: String,
    pub command: Vec<String>,
}

pub const BUILDER_STAGE: &str = "builder";
pub const SERVICE_PORT: u16 = 8000;
pub const BIND_ALL: &str = "0.0.0.0";

impl ServiceImage {
    /// Python ASGI service served by uvicorn, with dependencies installed
    /// from `requirements.txt` into the user site.
    pub fn asgi(app_path: impl Into<String>) -> Self {
        let app_path = app_path.into();
        let port = SERVICE_PORT.to_string();
        Self {
            builder_image: "python:3.11-slim".to_string(),
            builder_workdir: "/app".to_string(),
            builder_inputs: vec!["requirements.txt".to_string()],
            install_commands: vec![
                "pip install --user --no-cache-dir -r requirements.txt".to_string()
            ],
            install_prefix: "/root/.local".to_string(),
            runtime_image: "python:3.11-slim".to_string(),
            runtime_workdir: "/app".to_string(),
            runtime_setup: Vec::new(),
            app_dir: Some("app".to_string()),
            env: vec![
                ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
                ("PATH".to_string(), "/root/.local/bin:$PATH".to_string()),
            ],
            port: SERVICE_PORT,
            entry_point: app_path.clone(),
            command: vec![
                "uvicorn".to_string(),
                app_path,
                "--host".to_string(),
                BIND_ALL.to_string(),
                "--port".to_string(),
                port,
            ],
        }
    }

    /// This workspace's `gateway` binary, compiled in a Rust builder and run
    /// on a slim Debian base.
    pub fn gateway() -> Self {
        let port = SERVICE_PORT.to_string();
        Self {
            builder_image: "rust:1.85-slim".to_string(),
            builder_workdir: "/src".to_string(),
            builder_inputs: vec![".".to_string()],
            install_commands: vec![
                "apt-get update && apt-get install -y --no-install-recommends pkg-config libssl-dev && rm -rf /var/lib/apt/lists/*".to_string(),
                "cargo build --release -p gateway".to_string(),
                "mkdir -p /install/bin && cp target/release/gateway /install/bin/".to_string(),
            ],
            install_prefix: "/install".to_string(),
            runtime_image: "debian:bookworm-slim".to_string(),
            runtime_workdir: "/app".to_string(),
            runtime_setup: vec![
                "apt-get update && apt-get install -y --no-install-recommends ca-certificates libssl3 && rm -rf /var/lib/apt/lists/*".to_string(),
            ],
            app_dir: None,
            env: vec![
                ("RUST_LOG".to_string(), "info".to_string()),
                ("PATH".to_string(), "/install/bin:$PATH".to_string()),
            ],
            port: SERVICE_PORT,
            entry_point: "gateway".to_string(),
            command: vec![
                "gateway".to_string(),
                "serve".to_string(),
                "--host".to_string(),
                BIND_ALL.to_string(),
                "--port".to_string(),
                port,
            ],
        }
    }

    pub fn recipe(&self) -> BuildRecipe {
        let mut builder =
            Stage::named(self.builder_image.clone(), BUILDER_STAGE).workdir(self.builder_workdir.clone());
        for input in &self.builder_inputs {
            builder = builder.copy(input.clone(), ".");
        }
        for command in &self.install_commands {
            builder = builder.run(command.clone());
        }

        let mut runtime = Stage::new(self.runtime_image.clone());
        for command in &self.runtime_setup {
            runtime = runtime.run(command.clone());
        }
        runtime = runtime.workdir(self.runtime_workdir.clone()).copy_from(
            BUILDER_STAGE,
            self.install_prefix.clone(),
            self.install_prefix.clone(),
        );
        if let Some(app_dir) = &self.app_dir {
            runtime = runtime.copy(app_dir.clone(), format!("./{}", app_dir));
        }
        for (key, value) in &self.env {
            runtime = runtime.env(key.clone(), value.clone());
        }
        runtime = runtime.expose(self.port).cmd(self.command.clone());

        BuildRecipe::new(vec![builder, runtime])
    }

    pub fn expectations(&self) -> crate::validate::Expectations {
        crate::validate::Expectations {
            port: self.port,
            entry_point: self.entry_point.clone(),
            bind_host: BIND_ALL.to_string(),
        }
    }
}

/// Named presets selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Gateway,
    Asgi,
}

impl Preset {
    pub fn service_image(&self) -> ServiceImage {
        match self {
            Preset::Gateway => ServiceImage::gateway(),
            Preset::Asgi => ServiceImage::asgi("app.main:app"),
        }
    }
}
