use image_builder::{
    build_service_image, validate, ImageBuilder, Preset, RecipeViolation, ServiceImage,
};
use std::path::PathBuf;

const CHECKED_IN_DOCKERFILE: &str = include_str!("../../Dockerfile");

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("workspace root")
        .to_path_buf()
}

#[test]
fn test_checked_in_dockerfile_matches_gateway_recipe() {
    let rendered = ServiceImage::gateway().recipe().render();
    assert_eq!(
        rendered, CHECKED_IN_DOCKERFILE,
        "Dockerfile is stale; regenerate it with `gateway recipe > Dockerfile`"
    );
}

#[test]
fn test_runtime_contract_of_presets() {
    for preset in [Preset::Gateway, Preset::Asgi] {
        let image = preset.service_image();
        let recipe = image.recipe();
        validate(&recipe, &image.expectations()).expect("preset must be valid");

        let runtime = recipe.final_stage().expect("runtime stage");
        assert_eq!(runtime.exposed_ports(), vec![8000]);
        let path = runtime.env_value("PATH").expect("PATH is set");
        assert!(path.ends_with(":$PATH"), "PATH must extend the base path: {}", path);
    }
}

#[test]
fn test_asgi_launch_references_application_object() {
    let image = ServiceImage::asgi("app.main:app");
    let recipe = image.recipe();
    let runtime = recipe.final_stage().unwrap();
    let argv = runtime.commands()[0];
    assert_eq!(argv[0], "uvicorn");
    assert_eq!(argv[1], "app.main:app");
    assert_eq!(
        runtime.env_value("PYTHONUNBUFFERED"),
        Some("1"),
        "output buffering must be disabled"
    );
}

#[test]
fn test_dropping_the_expose_breaks_the_contract() {
    let mut recipe = ServiceImage::gateway().recipe();
    let runtime = recipe.stages.last_mut().unwrap();
    runtime
        .instructions
        .retain(|i| !matches!(i, image_builder::Instruction::Expose(_)));

    let violations = validate(&recipe, &ServiceImage::gateway().expectations()).unwrap_err();
    assert_eq!(violations, vec![RecipeViolation::PortNotExposed { port: 8000 }]);
}

#[tokio::test]
#[ignore]
async fn test_build_gateway_image_with_local_runtime() {
    let builder = ImageBuilder::detect(workspace_root())
        .await
        .expect("podman or docker must be installed");

    let output = build_service_image(&builder, &ServiceImage::gateway(), "iscool-gpt:test")
        .await
        .expect("image build");
    assert_eq!(output.tag, "iscool-gpt:test");
}
