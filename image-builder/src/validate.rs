//! Structural checks on a [`BuildRecipe`].
//!
//! These verify the runtime contract of the produced image without building
//! it: the service port is exposed, the launch command references the
//! application entry point and binds to all interfaces, and every prefix
//! copied out of a builder stage is reachable through the runtime search path.

use crate::recipe::{BuildRecipe, Instruction};
use std::collections::HashSet;
use std::fmt;

/// What the runtime stage of a recipe must satisfy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectations {
    pub port: u16,
    pub entry_point: String,
    pub bind_host: String,
}

/// Search-path variables a copied prefix may be reachable through
const SEARCH_PATH_VARS: [&str; 2] = ["PATH", "PYTHONPATH"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipeViolation {
    NoStages,
    DuplicateStage { name: String },
    UnknownCopySource { stage: String },
    PortNotExposed { port: u16 },
    MissingCommand,
    MultipleCommands { count: usize },
    EntryPointNotReferenced { entry_point: String },
    NotBoundToAllInterfaces { expected: String },
    PortMismatch { expected: u16, found: String },
    PrefixNotOnSearchPath { prefix: String },
}

impl fmt::Display for RecipeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipeViolation::NoStages => write!(f, "recipe has no stages"),
            RecipeViolation::DuplicateStage { name } => {
                write!(f, "stage name '{}' is used more than once", name)
            }
            RecipeViolation::UnknownCopySource { stage } => write!(
                f,
                "COPY --from={} does not reference an earlier stage",
                stage
            ),
            RecipeViolation::PortNotExposed { port } => {
                write!(f, "runtime stage does not expose port {}", port)
            }
            RecipeViolation::MissingCommand => write!(f, "runtime stage has no CMD"),
            RecipeViolation::MultipleCommands { count } => {
                write!(f, "runtime stage declares {} CMD instructions", count)
            }
            RecipeViolation::EntryPointNotReferenced { entry_point } => {
                write!(f, "launch command does not reference '{}'", entry_point)
            }
            RecipeViolation::NotBoundToAllInterfaces { expected } => {
                write!(f, "launch command does not bind to {}", expected)
            }
            RecipeViolation::PortMismatch { expected, found } => write!(
                f,
                "launch command listens on port {} but {} is expected",
                found, expected
            ),
            RecipeViolation::PrefixNotOnSearchPath { prefix } => write!(
                f,
                "'{}' is copied from a builder stage but is not on PATH or PYTHONPATH",
                prefix
            ),
        }
    }
}

/// Check `recipe` against `expected`, returning every violation found.
pub fn validate(recipe: &BuildRecipe, expected: &Expectations) -> Result<(), Vec<RecipeViolation>> {
    let mut violations = Vec::new();

    let Some(runtime) = recipe.final_stage() else {
        return Err(vec![RecipeViolation::NoStages]);
    };

    // Stage names and COPY --from references, in build order
    let mut seen: HashSet<&str> = HashSet::new();
    for stage in &recipe.stages {
        for instruction in &stage.instructions {
            if let Instruction::Copy {
                from: Some(source), ..
            } = instruction
            {
                if !seen.contains(source.as_str()) {
                    violations.push(RecipeViolation::UnknownCopySource {
                        stage: source.clone(),
                    });
                }
            }
        }
        if let Some(name) = &stage.name {
            if !seen.insert(name.as_str()) {
                violations.push(RecipeViolation::DuplicateStage { name: name.clone() });
            }
        }
    }

    if !runtime.exposed_ports().contains(&expected.port) {
        violations.push(RecipeViolation::PortNotExposed {
            port: expected.port,
        });
    }

    let commands = runtime.commands();
    match commands.as_slice() {
        [] => violations.push(RecipeViolation::MissingCommand),
        [argv] => check_command(argv, expected, &mut violations),
        _ => violations.push(RecipeViolation::MultipleCommands {
            count: commands.len(),
        }),
    }

    let search_path: Vec<&str> = SEARCH_PATH_VARS
        .iter()
        .filter_map(|var| runtime.env_value(var))
        .flat_map(|value| value.split(':'))
        .filter(|entry| !entry.is_empty() && !entry.starts_with('$'))
        .collect();

    for instruction in &runtime.instructions {
        if let Instruction::Copy {
            from: Some(_),
            dest,
            ..
        } = instruction
        {
            let prefix = dest.trim_end_matches('/');
            let parent = parent_dir(prefix);
            // A copied tree holding a search-path entry, or a single file
            // dropped straight into a search-path directory
            let reachable = search_path.iter().any(|entry| {
                let entry = entry.trim_end_matches('/');
                is_within(entry, prefix) || Some(entry) == parent
            });
            if !reachable {
                violations.push(RecipeViolation::PrefixNotOnSearchPath {
                    prefix: dest.clone(),
                });
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn is_within(entry: &str, prefix: &str) -> bool {
    entry == prefix
        || entry
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn parent_dir(path: &str) -> Option<&str> {
    match path.rsplit_once('/') {
        Some(("", file)) if !file.is_empty() => Some("/"),
        Some((parent, file)) if !file.is_empty() => Some(parent),
        _ => None,
    }
}

fn check_command(argv: &[String], expected: &Expectations, violations: &mut Vec<RecipeViolation>) {
    if !argv.iter().any(|arg| arg.contains(&expected.entry_point)) {
        violations.push(RecipeViolation::EntryPointNotReferenced {
            entry_point: expected.entry_point.clone(),
        });
    }

    match flag_value(argv, "--host") {
        Some(host) if host == expected.bind_host => {}
        _ => violations.push(RecipeViolation::NotBoundToAllInterfaces {
            expected: expected.bind_host.clone(),
        }),
    }

    if let Some(port) = flag_value(argv, "--port") {
        if port != expected.port.to_string() {
            violations.push(RecipeViolation::PortMismatch {
                expected: expected.port,
                found: port.to_string(),
            });
        }
    }
}

/// Value of `--flag value` or `--flag=value`
fn flag_value<'a>(argv: &'a [String], flag: &str) -> Option<&'a str> {
    argv.iter().enumerate().find_map(|(i, arg)| {
        if arg == flag {
            argv.get(i + 1).map(String::as_str)
        } else {
            arg.strip_prefix(flag).and_then(|rest| rest.strip_prefix('='))
        }
    })
}
