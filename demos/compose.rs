//! Composition example - places a subject into a background scene.
//!
//! Run with: `cargo run --example compose -- <subject.png> <background.png> [idea]`
//!
//! Requires `GEMINI_API_KEY` (or `GOOGLE_API_KEY`) environment variable.

use compose_studio::{ApiKey, CandidateFile, GeminiProvider, ImageRole, Outcome, Studio};

#[tokio::main]
async fn main() -> compose_studio::Result<()> {
    let mut args = std::env::args().skip(1);
    let subject = args
        .next()
        .expect("Usage: compose <subject.png> <background.png> [idea]");
    let background = args
        .next()
        .expect("Usage: compose <subject.png> <background.png> [idea]");
    let idea = args
        .next()
        .unwrap_or_else(|| "the subject relaxing in the scene at golden hour".to_string());

    let provider = GeminiProvider::builder()
        .api_key(ApiKey::from_env()?)
        .build()?;
    let studio = Studio::with_gemini(provider);

    let images = studio.add_images(vec![
        CandidateFile::from_path(subject),
        CandidateFile::from_path(background),
    ]);
    if let Some(scene) = images.get(1) {
        studio.set_role(&scene.id, ImageRole::Background);
    }

    studio.set_idea(idea);
    if let Outcome::Failed(message) = studio.expand_prompt().await? {
        eprintln!("Prompt expansion failed: {}", message);
        return Ok(());
    }
    println!("Prompt: {}", studio.prompt().final_prompt());

    match studio.compose().await? {
        Outcome::Succeeded => {
            if let Some(image) = studio.result() {
                let size = image.save(image.suggested_filename())?;
                println!(
                    "Composed image saved to {} ({} bytes)",
                    image.suggested_filename(),
                    size
                );
            }
        }
        Outcome::Failed(message) => eprintln!("Composition failed: {}", message),
        Outcome::Superseded => eprintln!("Composition was superseded"),
    }

    Ok(())
}
