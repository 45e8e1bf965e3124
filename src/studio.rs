//! Session state and the orchestration of expansion and composition.
//!
//! [`Studio`] owns the image registry, the prompt state, one status per
//! remote pipeline, the composed result and a single error slot. All
//! mutations go through one mutex that is never held across an await, and
//! every mutation is announced on a broadcast channel so any front end can
//! re-render from [`Studio::snapshot`].

use crate::error::{Result, StudioError};
use crate::image::composition;
use crate::image::prompt::{self, PromptState};
use crate::image::providers::GeminiProvider;
use crate::image::registry::{CandidateFile, ImageId, ImageRegistry, UploadedImage};
use crate::image::{ComposedImage, ImageComposer, ImageRole, PromptExpander};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Lifecycle of one remote pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    /// Nothing has run yet, or the last run was superseded.
    #[default]
    Idle,
    /// A remote call is outstanding.
    Running,
    /// The last run produced its payload.
    Succeeded,
    /// The last run failed; the message is in the error slot.
    Failed,
}

/// The two remote operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Idea to prompt.
    Expansion,
    /// Images plus prompt to image.
    Composition,
}

impl Operation {
    /// Message shown when a failure carries no text of its own.
    pub fn generic_failure(&self) -> &'static str {
        match self {
            Self::Expansion => "An error occurred while generating the prompt.",
            Self::Composition => "An unknown error occurred while generating the image.",
        }
    }
}

/// How a remote operation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum Outcome {
    /// The result was stored.
    Succeeded,
    /// The failure message was stored in the error slot.
    Failed(String),
    /// Newer input made the result stale; nothing was stored.
    Superseded,
}

/// Announced after every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudioEvent {
    /// Images were added or removed.
    ImagesChanged,
    /// An image's role changed.
    RoleChanged(ImageId),
    /// The idea text changed.
    IdeaChanged,
    /// The final prompt changed, by edit or by expansion.
    PromptChanged,
    /// A remote operation started.
    Started(Operation),
    /// A remote operation finished.
    Finished(Operation, Outcome),
}

/// A serializable view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSummary {
    /// Unique id.
    pub id: ImageId,
    /// Display name.
    pub name: String,
    /// Accepted MIME type.
    pub mime_type: &'static str,
    /// Assigned role.
    pub role: ImageRole,
    /// Preview reference.
    pub preview: String,
}

impl From<&UploadedImage> for ImageSummary {
    fn from(image: &UploadedImage) -> Self {
        Self {
            id: image.id(),
            name: image.name().to_string(),
            mime_type: image.format().mime_type(),
            role: image.role(),
            preview: image.preview().uri().to_string(),
        }
    }
}

/// Metadata about the composed image currently held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultSummary {
    /// Declared MIME type.
    pub mime_type: String,
    /// Length of the base64 payload.
    pub base64_len: usize,
    /// Suggested download filename.
    pub download_filename: &'static str,
}

/// Everything a front end needs to render the session.
#[derive(Debug, Clone, Serialize)]
pub struct StudioSnapshot {
    /// Images in upload order.
    pub images: Vec<ImageSummary>,
    /// Idea and final prompt.
    pub prompt: PromptState,
    /// Expansion pipeline status.
    pub expansion: GenerationStatus,
    /// Composition pipeline status.
    pub composition: GenerationStatus,
    /// Either pipeline is running.
    pub busy: bool,
    /// A composition may be started now.
    pub can_compose: bool,
    /// The composed image, if any.
    pub result: Option<ResultSummary>,
    /// The current error message, if any.
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct StudioState {
    registry: ImageRegistry,
    prompt: PromptState,
    expansion: GenerationStatus,
    composition: GenerationStatus,
    result: Option<ComposedImage>,
    error: Option<String>,
    composition_ticket: u64,
}

impl StudioState {
    fn is_busy(&self) -> bool {
        self.expansion == GenerationStatus::Running
            || self.composition == GenerationStatus::Running
    }

    fn can_compose(&self) -> bool {
        !self.registry.is_empty() && self.prompt.has_final_prompt() && !self.is_busy()
    }

    /// Drops the displayed result and error, and fences any in-flight
    /// composition built from the previous inputs.
    fn invalidate_outputs(&mut self) {
        self.result = None;
        self.error = None;
        self.composition_ticket += 1;
        if self.composition == GenerationStatus::Running {
            self.composition = GenerationStatus::Idle;
        }
    }

    fn fail(&mut self, operation: Operation, error: &StudioError) -> String {
        let message = error
            .remote_message()
            .unwrap_or_else(|| operation.generic_failure().to_string());
        tracing::warn!(?operation, error = %error, "remote operation failed");
        self.result = None;
        self.error = Some(message.clone());
        message
    }
}

/// The session container.
pub struct Studio {
    state: Mutex<StudioState>,
    expander: Arc<dyn PromptExpander>,
    composer: Arc<dyn ImageComposer>,
    events: broadcast::Sender<StudioEvent>,
}

impl Studio {
    /// Creates a session backed by the given remote capabilities.
    pub fn new(expander: Arc<dyn PromptExpander>, composer: Arc<dyn ImageComposer>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(StudioState::default()),
            expander,
            composer,
            events,
        }
    }

    /// Creates a session using one Gemini provider for both capabilities.
    pub fn with_gemini(provider: GeminiProvider) -> Self {
        let provider = Arc::new(provider);
        Self::new(provider.clone(), provider)
    }

    /// Subscribes to state-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<StudioEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, StudioState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: StudioEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Adds candidates (see [`ImageRegistry::add`]) and returns the full list.
    pub fn add_images(
        &self,
        candidates: impl IntoIterator<Item = CandidateFile>,
    ) -> Vec<ImageSummary> {
        let (images, changed) = {
            let mut state = self.lock();
            let before = state.registry.len();
            let images: Vec<ImageSummary> = state
                .registry
                .add(candidates)
                .iter()
                .map(ImageSummary::from)
                .collect();
            let changed = images.len() != before;
            if changed {
                state.invalidate_outputs();
            }
            (images, changed)
        };
        if changed {
            tracing::debug!(count = images.len(), "images added");
            self.emit(StudioEvent::ImagesChanged);
        }
        images
    }

    /// Removes an image. Returns false if it was not present.
    pub fn remove_image(&self, id: &ImageId) -> bool {
        let removed = {
            let mut state = self.lock();
            let removed = state.registry.remove(id);
            if removed {
                state.invalidate_outputs();
            }
            removed
        };
        if removed {
            tracing::debug!(%id, "image removed");
            self.emit(StudioEvent::ImagesChanged);
        }
        removed
    }

    /// Changes an image's role. Returns false if it was not present.
    ///
    /// Like adding or removing images, this clears the result and error and
    /// fences any in-flight composition.
    pub fn set_role(&self, id: &ImageId, role: ImageRole) -> bool {
        let updated = {
            let mut state = self.lock();
            let updated = state.registry.set_role(id, role);
            if updated {
                state.invalidate_outputs();
            }
            updated
        };
        if updated {
            tracing::debug!(%id, %role, "role changed");
            self.emit(StudioEvent::RoleChanged(*id));
        }
        updated
    }

    /// Replaces the idea text.
    pub fn set_idea(&self, idea: impl Into<String>) {
        self.lock().prompt.set_idea(idea);
        self.emit(StudioEvent::IdeaChanged);
    }

    /// Replaces the final prompt.
    pub fn set_final_prompt(&self, prompt: impl Into<String>) {
        self.lock().prompt.set_final_prompt(prompt);
        self.emit(StudioEvent::PromptChanged);
    }

    /// Expands the current idea into the final prompt.
    ///
    /// Returns `Err` only when the call is refused up front (`Busy`, or
    /// `Validation` for a blank idea). Remote failures are stored in the
    /// error slot and reported as [`Outcome::Failed`]. If the final prompt
    /// is edited while the call is outstanding, the edit is kept and the
    /// outcome is [`Outcome::Superseded`].
    pub async fn expand_prompt(&self) -> Result<Outcome> {
        let (idea, revision) = {
            let mut state = self.lock();
            if state.is_busy() {
                return Err(StudioError::Busy);
            }
            prompt::validate_idea(state.prompt.idea())?;
            state.expansion = GenerationStatus::Running;
            state.error = None;
            (state.prompt.idea().to_string(), state.prompt.revision())
        };
        self.emit(StudioEvent::Started(Operation::Expansion));

        let result = prompt::expand(self.expander.as_ref(), &idea).await;

        let (outcome, prompt_changed) = {
            let mut state = self.lock();
            match result {
                Ok(text) => {
                    if state.prompt.apply_expansion(text, revision) {
                        state.expansion = GenerationStatus::Succeeded;
                        (Outcome::Succeeded, true)
                    } else {
                        state.expansion = GenerationStatus::Idle;
                        tracing::warn!("final prompt edited during expansion, discarding result");
                        (Outcome::Superseded, false)
                    }
                }
                Err(e) => {
                    state.expansion = GenerationStatus::Failed;
                    (Outcome::Failed(state.fail(Operation::Expansion, &e)), false)
                }
            }
        };
        if prompt_changed {
            self.emit(StudioEvent::PromptChanged);
        }
        self.emit(StudioEvent::Finished(Operation::Expansion, outcome.clone()));
        Ok(outcome)
    }

    /// Composes the current images and final prompt into one image.
    ///
    /// Refused with `Validation` or `Busy` unless [`Studio::can_compose`]
    /// holds. The registry and prompt are copied when the call starts. A
    /// completion whose inputs were changed meanwhile is discarded and
    /// reported as [`Outcome::Superseded`].
    pub async fn compose(&self) -> Result<Outcome> {
        let (images, final_prompt, ticket) = {
            let mut state = self.lock();
            if state.is_busy() {
                return Err(StudioError::Busy);
            }
            let images = state.registry.snapshot();
            let final_prompt = state.prompt.final_prompt().to_string();
            composition::validate_request(&images, &final_prompt)?;

            state.composition = GenerationStatus::Running;
            state.error = None;
            state.result = None;
            state.composition_ticket += 1;
            (images, final_prompt, state.composition_ticket)
        };
        self.emit(StudioEvent::Started(Operation::Composition));

        let result =
            composition::build_and_submit(self.composer.as_ref(), &images, &final_prompt).await;

        let outcome = {
            let mut state = self.lock();
            if state.composition_ticket != ticket {
                tracing::warn!(ticket, "composition inputs changed, discarding stale result");
                Outcome::Superseded
            } else {
                match result {
                    Ok(image) => {
                        state.composition = GenerationStatus::Succeeded;
                        state.error = None;
                        state.result = Some(image);
                        Outcome::Succeeded
                    }
                    Err(e) => {
                        state.composition = GenerationStatus::Failed;
                        Outcome::Failed(state.fail(Operation::Composition, &e))
                    }
                }
            }
        };
        self.emit(StudioEvent::Finished(Operation::Composition, outcome.clone()));
        Ok(outcome)
    }

    /// Either pipeline is running.
    pub fn is_busy(&self) -> bool {
        self.lock().is_busy()
    }

    /// Images present, prompt non-empty, and nothing running.
    pub fn can_compose(&self) -> bool {
        self.lock().can_compose()
    }

    /// Expansion pipeline status.
    pub fn expansion_status(&self) -> GenerationStatus {
        self.lock().expansion
    }

    /// Composition pipeline status.
    pub fn composition_status(&self) -> GenerationStatus {
        self.lock().composition
    }

    /// Images in upload order.
    pub fn images(&self) -> Vec<ImageSummary> {
        self.lock()
            .registry
            .images()
            .iter()
            .map(ImageSummary::from)
            .collect()
    }

    /// Current idea and final prompt.
    pub fn prompt(&self) -> PromptState {
        self.lock().prompt.clone()
    }

    /// The composed image, if one is held.
    pub fn result(&self) -> Option<ComposedImage> {
        self.lock().result.clone()
    }

    /// The current error message, if any.
    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// A consistent view of the whole session.
    pub fn snapshot(&self) -> StudioSnapshot {
        let state = self.lock();
        StudioSnapshot {
            images: state.registry.images().iter().map(ImageSummary::from).collect(),
            prompt: state.prompt.clone(),
            expansion: state.expansion,
            composition: state.composition,
            busy: state.is_busy(),
            can_compose: state.can_compose(),
            result: state.result.as_ref().map(|r| ResultSummary {
                mime_type: r.mime_type.clone(),
                base64_len: r.data.len(),
                download_filename: r.suggested_filename(),
            }),
            error: state.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ComposeResponse, ContentPart, EncodedImage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const PNG_MAGIC: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    /// Replies with a fixed result, optionally waiting for a release first.
    struct FakeBackend {
        expansion: std::result::Result<String, String>,
        parts: Vec<ContentPart>,
        composition_error: Option<String>,
        gate: Option<Arc<Notify>>,
        expand_calls: AtomicUsize,
        compose_calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                expansion: Ok("A detailed prompt".into()),
                parts: vec![ContentPart::text("ok"), ContentPart::image("image/png", "AAA")],
                composition_error: None,
                gate: None,
                expand_calls: AtomicUsize::new(0),
                compose_calls: AtomicUsize::new(0),
            }
        }

        fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }

        async fn wait(&self) {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
        }
    }

    #[async_trait]
    impl PromptExpander for FakeBackend {
        async fn expand(&self, _system_directive: &str, _idea: &str) -> Result<String> {
            self.expand_calls.fetch_add(1, Ordering::SeqCst);
            self.wait().await;
            self.expansion.clone().map_err(|message| StudioError::Api {
                status: 500,
                message,
            })
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl ImageComposer for FakeBackend {
        async fn compose(
            &self,
            _instruction: &str,
            _images: &[EncodedImage],
        ) -> Result<ComposeResponse> {
            self.compose_calls.fetch_add(1, Ordering::SeqCst);
            self.wait().await;
            if let Some(message) = &self.composition_error {
                return Err(StudioError::Api {
                    status: 503,
                    message: message.clone(),
                });
            }
            Ok(ComposeResponse {
                parts: self.parts.clone(),
            })
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    fn studio(backend: FakeBackend) -> (Arc<Studio>, Arc<FakeBackend>) {
        let backend = Arc::new(backend);
        let studio = Arc::new(Studio::new(backend.clone(), backend.clone()));
        (studio, backend)
    }

    fn png(name: &str) -> CandidateFile {
        CandidateFile::from_bytes(name, Some("image/png".into()), PNG_MAGIC.to_vec())
    }

    /// Yields until the spawned task has reached the backend.
    async fn until(condition: impl Fn() -> bool) {
        while !condition() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_full_flow() {
        let (studio, backend) = studio(FakeBackend::new());
        studio.add_images(vec![png("a.png"), png("b.png")]);
        studio.set_idea("a cat on the moon");
        assert!(!studio.can_compose());

        assert_eq!(studio.expand_prompt().await.unwrap(), Outcome::Succeeded);
        assert_eq!(studio.prompt().final_prompt(), "A detailed prompt");
        assert_eq!(studio.expansion_status(), GenerationStatus::Succeeded);
        assert!(studio.can_compose());

        assert_eq!(studio.compose().await.unwrap(), Outcome::Succeeded);
        assert_eq!(
            studio.result().unwrap().to_data_url(),
            "data:image/png;base64,AAA"
        );
        assert_eq!(studio.composition_status(), GenerationStatus::Succeeded);
        assert_eq!(studio.error(), None);
        assert_eq!(backend.expand_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.compose_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_blank_idea_is_refused_without_remote_call() {
        let (studio, backend) = studio(FakeBackend::new());
        studio.set_idea("   ");

        let err = studio.expand_prompt().await.unwrap_err();
        assert!(matches!(err, StudioError::Validation(_)));
        assert_eq!(studio.expansion_status(), GenerationStatus::Idle);
        assert_eq!(studio.error(), None);
        assert_eq!(backend.expand_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_compose_preconditions() {
        let (studio, backend) = studio(FakeBackend::new());
        studio.set_final_prompt("P");
        assert!(matches!(
            studio.compose().await,
            Err(StudioError::Validation(_))
        ));

        studio.set_final_prompt("");
        studio.add_images(vec![png("a.png")]);
        assert!(matches!(
            studio.compose().await,
            Err(StudioError::Validation(_))
        ));
        assert_eq!(backend.compose_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expansion_failure_uses_remote_message() {
        let mut backend = FakeBackend::new();
        backend.expansion = Err("quota exceeded".into());
        let (studio, _) = studio(backend);
        studio.set_idea("idea");
        studio.set_final_prompt("kept");

        let outcome = studio.expand_prompt().await.unwrap();
        assert_eq!(outcome, Outcome::Failed("quota exceeded".into()));
        assert_eq!(studio.error().as_deref(), Some("quota exceeded"));
        assert_eq!(studio.prompt().final_prompt(), "kept");
        assert_eq!(studio.expansion_status(), GenerationStatus::Failed);
    }

    #[tokio::test]
    async fn test_failure_without_message_uses_generic_text() {
        let mut backend = FakeBackend::new();
        backend.expansion = Err(String::new());
        let (studio, _) = studio(backend);
        studio.set_idea("idea");

        studio.expand_prompt().await.unwrap();
        assert_eq!(
            studio.error().as_deref(),
            Some(Operation::Expansion.generic_failure())
        );
    }

    #[tokio::test]
    async fn test_no_image_in_response() {
        let mut backend = FakeBackend::new();
        backend.parts = vec![ContentPart::text("sorry")];
        let (studio, _) = studio(backend);
        studio.add_images(vec![png("a.png")]);
        studio.set_final_prompt("P");

        let outcome = studio.compose().await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Failed("no image was generated by the API".into())
        );
        assert!(studio.result().is_none());
        assert_eq!(studio.composition_status(), GenerationStatus::Failed);
    }

    #[tokio::test]
    async fn test_registry_changes_clear_result_and_error() {
        let (studio, _) = studio(FakeBackend::new());
        let images = studio.add_images(vec![png("a.png"), png("b.png")]);
        studio.set_final_prompt("P");
        studio.compose().await.unwrap();
        assert!(studio.result().is_some());

        studio.set_role(&images[0].id, ImageRole::Element);
        assert!(studio.result().is_none());

        studio.compose().await.unwrap();
        assert!(studio.result().is_some());
        assert!(studio.remove_image(&images[1].id));
        assert!(studio.result().is_none());
        assert_eq!(studio.error(), None);

        // Removing twice is a no-op.
        assert!(!studio.remove_image(&images[1].id));
        assert_eq!(studio.images().len(), 1);
    }

    #[tokio::test]
    async fn test_edit_during_expansion_wins() {
        let gate = Arc::new(Notify::new());
        let (studio, backend) = studio(FakeBackend::new().gated(gate.clone()));
        studio.set_idea("idea");

        let task = {
            let studio = studio.clone();
            tokio::spawn(async move { studio.expand_prompt().await })
        };
        until(|| backend.expand_calls.load(Ordering::SeqCst) == 1).await;
        assert!(studio.is_busy());
        assert!(matches!(studio.expand_prompt().await, Err(StudioError::Busy)));

        studio.set_final_prompt("my edit");
        gate.notify_one();

        assert_eq!(task.await.unwrap().unwrap(), Outcome::Superseded);
        assert_eq!(studio.prompt().final_prompt(), "my edit");
        assert_eq!(studio.expansion_status(), GenerationStatus::Idle);
        assert!(!studio.is_busy());
    }

    #[tokio::test]
    async fn test_role_change_clears_result_and_error() {
        let (studio, _) = studio(FakeBackend::new());
        let images = studio.add_images(vec![png("a.png")]);
        studio.set_final_prompt("P");
        studio.compose().await.unwrap();
        assert!(studio.result().is_some());

        assert!(studio.set_role(&images[0].id, ImageRole::Background));
        assert!(studio.result().is_none());
        assert_eq!(studio.error(), None);
        assert_eq!(studio.images()[0].role, ImageRole::Background);
        assert!(studio.can_compose());
    }

    #[tokio::test]
    async fn test_role_change_on_unknown_id_keeps_result() {
        let (studio, _) = studio(FakeBackend::new());
        let images = studio.add_images(vec![png("a.png")]);
        studio.set_final_prompt("P");
        studio.compose().await.unwrap();
        studio.remove_image(&images[0].id);
        studio.add_images(vec![png("b.png")]);
        studio.compose().await.unwrap();

        assert!(!studio.set_role(&images[0].id, ImageRole::Element));
        assert!(studio.result().is_some());
    }

    #[tokio::test]
    async fn test_starting_compose_clears_previous_error() {
        let gate = Arc::new(Notify::new());
        let mut backend = FakeBackend::new().gated(gate.clone());
        backend.expansion = Err("quota exceeded".into());
        let (studio, backend) = studio(backend);
        studio.add_images(vec![png("a.png")]);
        studio.set_idea("idea");
        studio.set_final_prompt("P");

        // Stored permit lets the expansion through.
        gate.notify_one();
        studio.expand_prompt().await.unwrap();
        assert_eq!(studio.error().as_deref(), Some("quota exceeded"));

        let task = {
            let studio = studio.clone();
            tokio::spawn(async move { studio.compose().await })
        };
        until(|| backend.compose_calls.load(Ordering::SeqCst) == 1).await;
        assert_eq!(studio.error(), None);
        assert_eq!(studio.snapshot().error, None);

        gate.notify_one();
        assert_eq!(task.await.unwrap().unwrap(), Outcome::Succeeded);
        assert_eq!(studio.error(), None);
        assert!(studio.result().is_some());
    }

    #[tokio::test]
    async fn test_composition_failure_without_message_uses_generic_text() {
        let mut backend = FakeBackend::new();
        backend.composition_error = Some("  ".into());
        let (studio, _) = studio(backend);
        studio.add_images(vec![png("a.png")]);
        studio.set_final_prompt("P");

        let outcome = studio.compose().await.unwrap();
        let generic = Operation::Composition.generic_failure();
        assert_eq!(outcome, Outcome::Failed(generic.to_string()));
        assert_eq!(studio.error().as_deref(), Some(generic));
        assert!(studio.result().is_none());
        assert_eq!(studio.composition_status(), GenerationStatus::Failed);
    }

    #[tokio::test]
    async fn test_stale_composition_is_discarded() {
        let gate = Arc::new(Notify::new());
        let (studio, backend) = studio(FakeBackend::new().gated(gate.clone()));
        studio.add_images(vec![png("a.png")]);
        studio.set_final_prompt("P");

        let task = {
            let studio = studio.clone();
            tokio::spawn(async move { studio.compose().await })
        };
        until(|| backend.compose_calls.load(Ordering::SeqCst) == 1).await;
        assert!(!studio.can_compose());

        studio.add_images(vec![png("b.png")]);
        assert_eq!(studio.composition_status(), GenerationStatus::Idle);
        gate.notify_one();

        assert_eq!(task.await.unwrap().unwrap(), Outcome::Superseded);
        assert!(studio.result().is_none());
        assert!(studio.can_compose());
    }

    #[tokio::test]
    async fn test_events_follow_mutations() {
        let (studio, _) = studio(FakeBackend::new());
        let mut events = studio.subscribe();

        let images = studio.add_images(vec![png("a.png")]);
        studio.set_role(&images[0].id, ImageRole::Background);
        studio.set_idea("idea");
        studio.expand_prompt().await.unwrap();
        studio.compose().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                StudioEvent::ImagesChanged,
                StudioEvent::RoleChanged(images[0].id),
                StudioEvent::IdeaChanged,
                StudioEvent::Started(Operation::Expansion),
                StudioEvent::PromptChanged,
                StudioEvent::Finished(Operation::Expansion, Outcome::Succeeded),
                StudioEvent::Started(Operation::Composition),
                StudioEvent::Finished(Operation::Composition, Outcome::Succeeded),
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_candidates_do_not_clear_result() {
        let (studio, _) = studio(FakeBackend::new());
        studio.add_images((0..5).map(|i| png(&format!("{i}.png"))));
        studio.set_final_prompt("P");
        studio.compose().await.unwrap();

        let images = studio.add_images(vec![png("extra.png")]);
        assert_eq!(images.len(), 5);
        assert!(studio.result().is_some());
    }

    #[tokio::test]
    async fn test_snapshot_serializes() {
        let (studio, _) = studio(FakeBackend::new());
        studio.add_images(vec![png("a.png")]);
        studio.set_final_prompt("P");
        studio.compose().await.unwrap();

        let json = serde_json::to_value(studio.snapshot()).unwrap();
        assert_eq!(json["images"][0]["role"], "Primary");
        assert_eq!(json["images"][0]["mime_type"], "image/png");
        assert_eq!(json["prompt"]["final_prompt"], "P");
        assert_eq!(json["composition"], "succeeded");
        assert_eq!(json["busy"], false);
        assert_eq!(json["result"]["download_filename"], "imagem-gerada.png");
        assert!(json["error"].is_null());
    }
}
