//! CLI for Compose Studio - role-tagged image composition via Gemini.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use compose_studio::{
    ApiKey, CandidateFile, GeminiProviderBuilder, ImageRole, Outcome, Studio, StudioConfig,
    MAX_IMAGES,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "compose-studio")]
#[command(about = "Compose reference images into one image with Gemini")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Args)]
struct BackendArgs {
    /// API key (falls back to GEMINI_API_KEY, GOOGLE_API_KEY, API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Model used to expand ideas into prompts
    #[arg(long, global = true, env = "COMPOSE_STUDIO_TEXT_MODEL")]
    text_model: Option<String>,

    /// Image model (nano-banana, nano-banana-pro or a model id)
    #[arg(long, global = true, env = "COMPOSE_STUDIO_IMAGE_MODEL")]
    image_model: Option<String>,

    /// API base URL
    #[arg(long, global = true, env = "COMPOSE_STUDIO_BASE_URL")]
    base_url: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true, env = "COMPOSE_STUDIO_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand a short idea into a detailed image prompt
    Expand {
        /// The idea, in a few words
        idea: String,
    },

    /// Compose images into one using a prompt
    Compose(ComposeArgs),

    /// List image roles
    Roles,

    /// Run as MCP server (for AI agent integration)
    Mcp,
}

#[derive(Args)]
struct ComposeArgs {
    /// Input image, optionally tagged with a role (path[:role])
    #[arg(short, long = "input", required = true, value_parser = parse_input)]
    inputs: Vec<(PathBuf, ImageRole)>,

    /// Final prompt, used as is
    #[arg(short, long, conflicts_with = "idea", required_unless_present = "idea")]
    prompt: Option<String>,

    /// Idea to expand into the final prompt first
    #[arg(long)]
    idea: Option<String>,

    /// Output file path
    #[arg(short, long)]
    output: PathBuf,
}

/// Splits `path[:role]`, keeping the whole string as the path when the
/// suffix is not a role.
fn parse_input(raw: &str) -> Result<(PathBuf, ImageRole), String> {
    if let Some((path, role)) = raw.rsplit_once(':') {
        if let Ok(role) = role.parse::<ImageRole>() {
            if path.is_empty() {
                return Err("missing path before role".into());
            }
            return Ok((PathBuf::from(path), role));
        }
    }
    Ok((PathBuf::from(raw), ImageRole::default()))
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "compose_studio=debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

impl BackendArgs {
    fn config(&self) -> anyhow::Result<StudioConfig> {
        let api_key = ApiKey::resolve(self.api_key.clone(), |name| std::env::var(name).ok())?;
        let mut config = StudioConfig::new(api_key);
        config.text_model = self.text_model.clone();
        config.image_model = self.image_model.clone();
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        if let Some(secs) = self.timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    fn studio(&self) -> anyhow::Result<Studio> {
        let provider = GeminiProviderBuilder::from_config(&self.config()?)?.build()?;
        tracing::debug!(
            model = provider.model().as_str(),
            text_model = provider.text_model(),
            "backend ready"
        );
        Ok(Studio::with_gemini(provider))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Expand { idea } => {
            expand(&cli.backend, idea, cli.json).await?;
        }
        Commands::Compose(args) => {
            compose(&cli.backend, args, cli.json).await?;
        }
        Commands::Roles => {
            list_roles(cli.json)?;
        }
        Commands::Mcp => {
            run_mcp_server(&cli.backend).await?;
        }
    }

    Ok(())
}

async fn expand(backend: &BackendArgs, idea: String, json_output: bool) -> anyhow::Result<()> {
    let studio = backend.studio()?;
    studio.set_idea(idea);

    if let Outcome::Failed(message) = studio.expand_prompt().await? {
        anyhow::bail!("{}", message);
    }
    let prompt = studio.prompt();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&prompt)?);
    } else {
        println!("{}", prompt.final_prompt());
    }
    Ok(())
}

async fn compose(
    backend: &BackendArgs,
    args: ComposeArgs,
    json_output: bool,
) -> anyhow::Result<()> {
    if args.inputs.len() > MAX_IMAGES {
        anyhow::bail!("at most {} input images are allowed", MAX_IMAGES);
    }
    for (path, _) in &args.inputs {
        if !path.is_file() {
            anyhow::bail!("input not found: {}", path.display());
        }
    }

    let studio = backend.studio()?;
    let start = Instant::now();

    let images = studio.add_images(
        args.inputs
            .iter()
            .map(|(path, _)| CandidateFile::from_path(path)),
    );
    if images.len() != args.inputs.len() {
        let accepted: Vec<&str> = images.iter().map(|i| i.name.as_str()).collect();
        anyhow::bail!(
            "unsupported image type among inputs (accepted: {}); use jpg, png or webp",
            accepted.join(", ")
        );
    }
    for (image, (_, role)) in images.iter().zip(&args.inputs) {
        studio.set_role(&image.id, *role);
    }

    match (args.prompt, args.idea) {
        (Some(prompt), _) => studio.set_final_prompt(prompt),
        (None, Some(idea)) => {
            studio.set_idea(idea);
            if let Outcome::Failed(message) = studio.expand_prompt().await? {
                anyhow::bail!("{}", message);
            }
            if !json_output {
                eprintln!("Prompt: {}", studio.prompt().final_prompt());
            }
        }
        (None, None) => anyhow::bail!("either --prompt or --idea is required"),
    }

    match studio.compose().await? {
        Outcome::Succeeded => {}
        Outcome::Failed(message) => anyhow::bail!("{}", message),
        Outcome::Superseded => anyhow::bail!("composition was superseded"),
    }
    let image = studio
        .result()
        .context("composition finished without a result")?;
    let size = image
        .save(&args.output)
        .with_context(|| format!("failed to save {}", args.output.display()))?;
    let duration_ms = start.elapsed().as_millis() as u64;

    if json_output {
        let result = serde_json::json!({
            "type": "image",
            "success": true,
            "output": args.output.display().to_string(),
            "size_bytes": size,
            "mime_type": image.mime_type,
            "images": studio.images(),
            "prompt": studio.prompt().final_prompt(),
            "duration_ms": duration_ms,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Composed image: {} ({} bytes) from {} input(s)",
            args.output.display(),
            size,
            images.len()
        );
        println!("Duration: {}ms", duration_ms);
    }

    Ok(())
}

async fn run_mcp_server(backend: &BackendArgs) -> anyhow::Result<()> {
    let studio = backend.studio()?;
    tracing::info!("starting MCP server");
    let mut server = compose_studio::mcp::McpServer::new(std::sync::Arc::new(studio));
    server.run().await?;
    Ok(())
}

fn list_roles(json_output: bool) -> anyhow::Result<()> {
    #[derive(serde::Serialize)]
    struct RoleInfo {
        name: &'static str,
        role: ImageRole,
        default: bool,
    }

    let roles: Vec<RoleInfo> = ImageRole::ALL
        .iter()
        .map(|role| RoleInfo {
            name: role.as_str(),
            role: *role,
            default: *role == ImageRole::default(),
        })
        .collect();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&roles)?);
    } else {
        println!("Image roles:\n");
        for r in &roles {
            let marker = if r.default { " (default)" } else { "" };
            println!("  {}{}", r.name.to_lowercase(), marker);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input_with_role() {
        let (path, role) = parse_input("beach.png:background").unwrap();
        assert_eq!(path, PathBuf::from("beach.png"));
        assert_eq!(role, ImageRole::Background);
    }

    #[test]
    fn test_parse_input_defaults_to_primary() {
        let (path, role) = parse_input("C:/photos/me.jpg").unwrap();
        assert_eq!(path, PathBuf::from("C:/photos/me.jpg"));
        assert_eq!(role, ImageRole::Primary);
    }

    #[test]
    fn test_parse_input_missing_path() {
        assert!(parse_input(":element").is_err());
    }

    #[test]
    fn test_cli_parses_compose() {
        let cli = Cli::try_parse_from([
            "compose-studio",
            "compose",
            "-i",
            "a.png",
            "-i",
            "b.jpg:element",
            "--prompt",
            "a scene",
            "-o",
            "out.png",
        ])
        .unwrap();
        match cli.command {
            Commands::Compose(args) => {
                assert_eq!(args.inputs.len(), 2);
                assert_eq!(args.inputs[1].1, ImageRole::Element);
                assert_eq!(args.prompt.as_deref(), Some("a scene"));
            }
            _ => panic!("expected compose"),
        }
    }

    #[test]
    fn test_cli_requires_prompt_or_idea() {
        let result =
            Cli::try_parse_from(["compose-studio", "compose", "-i", "a.png", "-o", "x.png"]);
        assert!(result.is_err());
    }
}
