//! Container image building utilities for iscool-gpt
//!
//! A service image is described as a two-stage [`BuildRecipe`]: a builder
//! stage installs dependencies into a prefix, and a slim runtime stage copies
//! that prefix, exposes the service port and declares the launch command.
//! Recipes are rendered to Dockerfile text, checked structurally with
//! [`validate`], and built with podman or docker through [`ImageBuilder`].

pub mod recipe;
pub mod runtime;
pub mod validate;

use std::time::Duration;
use thiserror::Error;

pub use recipe::{BuildRecipe, Instruction, Preset, ServiceImage, Stage, SERVICE_PORT};
pub use runtime::{detect_runtime, BuildOutput, ContainerRuntime, ImageBuilder};
pub use validate::{validate, Expectations, RecipeViolation};

/// Errors related to image building
#[derive(Error, Debug)]
pub enum ImageBuilderError {
    #[error("No container runtime available. Install podman or docker to build images.")]
    NoRuntimeAvailable,
    #[error("Build failed (exit status {status:?}):\n{output}")]
    BuildFailed { status: Option<i32>, output: String },
    #[error("Build timed out after {duration:?}")]
    BuildTimeout { duration: Duration },
    #[error("Image '{tag}' not found")]
    ImageNotFound { tag: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Recipe is invalid: {}", format_violations(.0))]
    InvalidRecipe(Vec<RecipeViolation>),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_violations(violations: &[RecipeViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type ImageBuilderResult<T> = Result<T, ImageBuilderError>;

/// Validate, build and verify a service image.
///
/// The recipe is checked before anything is sent to the runtime, and the built
/// image is inspected to confirm the service port is exposed.
pub async fn build_service_image(
    builder: &ImageBuilder,
    image: &ServiceImage,
    tag: &str,
) -> ImageBuilderResult<BuildOutput> {
    let recipe = image.recipe();
    validate(&recipe, &image.expectations()).map_err(ImageBuilderError::InvalidRecipe)?;

    let output = builder.build(&recipe, tag).await?;

    let ports = builder.exposed_ports(tag).await?;
    if !ports.contains(&image.port) {
        return Err(ImageBuilderError::InvalidRecipe(vec![
            RecipeViolation::PortNotExposed { port: image.port },
        ]));
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_recipe_message_lists_violations() {
        let err = ImageBuilderError::InvalidRecipe(vec![
            RecipeViolation::MissingCommand,
            RecipeViolation::PortNotExposed { port: 8000 },
        ]);
        assert_eq!(
            err.to_string(),
            "Recipe is invalid: runtime stage has no CMD; runtime stage does not expose port 8000"
        );
    }

    #[tokio::test]
    async fn test_invalid_recipe_is_rejected_before_build() {
        let mut image = ServiceImage::asgi("app.main:app");
        image.port = 9000;
        let builder = ImageBuilder::new(ContainerRuntime::Docker, ".");

        let err = build_service_image(&builder, &image, "never-built")
            .await
            .unwrap_err();
        assert!(matches!(err, ImageBuilderError::InvalidRecipe(_)));
    }
}
