use clap::{Parser, Subcommand, ValueEnum};
use gateway::config::{GatewayConfig, Overrides};
use gateway::{AppState, Server};
use image_builder::{build_service_image, validate, ImageBuilder, Preset};
use model::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "Study assistant chat gateway backed by Google Gemini")]
struct Cli {
    /// Optional TOML config file
    #[arg(short, long, global = true, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Interface to bind
        #[arg(long, env = "HOST")]
        host: Option<String>,
        /// Port to listen on
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,
    },
    /// Send a single prompt and print the reply
    Chat {
        /// The prompt
        #[arg(short, long)]
        prompt: String,
        /// Optional system instruction
        #[arg(short, long)]
        system: Option<String>,
        /// Model to use instead of the configured default
        #[arg(short, long)]
        model: Option<String>,
    },
    /// List models available to the API key
    Models,
    /// Check that the Gemini API is reachable
    Health,
    /// Print or check the container recipe
    Recipe {
        #[arg(long, value_enum, default_value_t = PresetArg::Gateway)]
        preset: PresetArg,
        /// Validate instead of printing
        #[arg(long)]
        check: bool,
    },
    /// Build the container image with podman or docker
    BuildImage {
        /// Image tag
        #[arg(short, long, default_value = "iscool-gpt:latest")]
        tag: String,
        #[arg(long, value_enum, default_value_t = PresetArg::Gateway)]
        preset: PresetArg,
        /// Build context directory
        #[arg(long, default_value = ".")]
        context: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PresetArg {
    Gateway,
    Asgi,
}

impl From<PresetArg> for Preset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::Gateway => Preset::Gateway,
            PresetArg::Asgi => Preset::Asgi,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // logs go to stderr so command output on stdout stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Serve { host, port } => {
            let config = GatewayConfig::load(config_path, &Overrides { host, port })?;
            let provider = GeminiProvider::new(config.gemini.clone())?;
            info!(
                "Using {} with default model {}",
                provider.provider_name(),
                provider.default_model()
            );

            let server = Server::new(&config, AppState::new(Arc::new(provider)))?;
            server.run().await?;
        }
        Commands::Chat {
            prompt,
            system,
            model,
        } => {
            let provider = load_provider(config_path)?;
            single_chat(&provider, &prompt, system, model).await?;
        }
        Commands::Models => {
            let provider = load_provider(config_path)?;
            list_models(&provider).await?;
        }
        Commands::Health => {
            let provider = load_provider(config_path)?;
            health_check(&provider).await?;
        }
        Commands::Recipe { preset, check } => {
            let image = Preset::from(preset).service_image();
            let recipe = image.recipe();
            if check {
                match validate(&recipe, &image.expectations()) {
                    Ok(()) => println!("Recipe OK"),
                    Err(violations) => {
                        for violation in &violations {
                            eprintln!("✗ {}", violation);
                        }
                        std::process::exit(1);
                    }
                }
            } else {
                print!("{}", recipe.render());
            }
        }
        Commands::BuildImage {
            tag,
            preset,
            context,
        } => {
            let builder = ImageBuilder::detect(context).await?;
            let image = Preset::from(preset).service_image();
            let output = build_service_image(&builder, &image, &tag).await?;
            println!(
                "Built {} with {} in {:.1}s",
                output.tag,
                builder.runtime().command(),
                output.duration.as_secs_f64()
            );
        }
    }

    Ok(())
}

fn load_provider(
    config_path: Option<&std::path::Path>,
) -> Result<GeminiProvider, Box<dyn std::error::Error>> {
    let config = GatewayConfig::load(config_path, &Overrides::default())?;
    Ok(GeminiProvider::new(config.gemini)?)
}

async fn single_chat(
    provider: &GeminiProvider,
    prompt: &str,
    system: Option<String>,
    model: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(prompt));

    let request = ChatRequest::new(model.unwrap_or_default(), messages);
    let response = provider.chat(request).await?;

    println!("{}", response.text());
    if let Some(usage) = &response.usage {
        info!(
            "Tokens: {} prompt, {} completion",
            usage.prompt_tokens, usage.completion_tokens
        );
    }

    Ok(())
}

async fn list_models(provider: &GeminiProvider) -> Result<(), Box<dyn std::error::Error>> {
    let models = provider.list_models().await?;

    println!("Available models:");
    for model in models {
        match model.display_name {
            Some(display_name) => println!("  {} ({})", model.name, display_name),
            None => println!("  {}", model.name),
        }
    }

    Ok(())
}

async fn health_check(provider: &GeminiProvider) -> Result<(), Box<dyn std::error::Error>> {
    match provider.health_check().await {
        Ok(()) => {
            println!("✓ {} is healthy", provider.provider_name());
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            println!("✗ {} is not healthy: {}", provider.provider_name(), e);
            return Err(e.into());
        }
    }

    Ok(())
}
