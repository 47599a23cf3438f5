use crate::config::Config;
use crate::conversation::{
    next_id, title_for, AspectRatio, Author, Conversation, ConversationKind, GenerationParams,
    ImageModel, Message, Part,
};
use crate::gemini::{GeminiClient, GENERATION_APOLOGY};
use crate::media::{self, Upload};
use crate::store::Store;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Synthetic first message of a new conversation. Never persisted and
/// never replayed to the model.
pub const GREETING_ID: &str = "welcome";
pub const GREETING_TEXT: &str = "Hello! How can I help you today?";

const EDIT_APOLOGY: &str = "Sorry, I couldn't edit the image. Please try again.";

/// Completion signals sent back from background service calls. Applied
/// one at a time by [`App::apply`], which keeps every state transition
/// auditable and testable without a terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    StreamChunk(String),
    StreamCompleted {
        text: String,
    },
    GenerationCompleted {
        prompt: String,
        params: GenerationParams,
        images: Option<Vec<String>>,
    },
    AnalysisCompleted {
        text: String,
    },
    EditCompleted {
        instruction: String,
        image: Option<String>,
    },
}

/// Fire-and-forget notifications surfaced to the rendering layer.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    ConversationCreated { id: String },
    ViewImage { urls: Vec<String>, start: usize },
    EditImage { url: String },
}

/// Image-generation panel: prompt plus the parameter bundle reused as
/// defaults for the next request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenPanel {
    pub open: bool,
    pub prompt: String,
    pub params: GenerationParams,
}

/// One renderable image reference; `inline` carries the base64 payload
/// when the source makes it available (uploads and data URLs).
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    pub url: String,
    pub inline: Option<(String, String)>, // (data, mime_type)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Generate {
        prompt: Option<String>,
        model: Option<ImageModel>,
        aspect_ratio: Option<AspectRatio>,
        count: Option<u8>,
    },
    Recall(usize),
    View(usize),
    Edit { index: usize, instruction: String },
    Attach(PathBuf),
    Detach,
    Analyze(String),
    Model(String),
    New,
    Open(String),
    List,
    Favorite,
}

impl Command {
    /// Parses one input line. `Ok(None)` means the line is plain chat
    /// text, not a command.
    pub fn parse(line: &str) -> Result<Option<Command>, String> {
        if !line.starts_with('/') {
            return Ok(None);
        }
        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or("/");
        let rest: Vec<&str> = words.collect();
        match name {
            "/gen" => Self::parse_generate(&rest).map(Some),
            "/recall" => Self::parse_index(&rest, "/recall <n>").map(|n| Some(Command::Recall(n))),
            "/view" => Self::parse_index(&rest, "/view <n>").map(|n| Some(Command::View(n))),
            "/edit" => {
                let index = Self::parse_index(&rest[..rest.len().min(1)], "/edit <n> <instruction>")?;
                let instruction = rest[1..].join(" ");
                if instruction.is_empty() {
                    return Err("Usage: /edit <n> <instruction>".to_string());
                }
                Ok(Some(Command::Edit { index, instruction }))
            }
            "/attach" => {
                if rest.is_empty() {
                    return Err("Usage: /attach <path>".to_string());
                }
                Ok(Some(Command::Attach(PathBuf::from(rest.join(" ")))))
            }
            "/detach" => Ok(Some(Command::Detach)),
            "/analyze" => {
                if rest.is_empty() {
                    return Err("Usage: /analyze <prompt>".to_string());
                }
                Ok(Some(Command::Analyze(rest.join(" "))))
            }
            "/model" => match rest.as_slice() {
                [name] => Ok(Some(Command::Model(name.to_string()))),
                _ => Err("Usage: /model <name>".to_string()),
            },
            "/new" => Ok(Some(Command::New)),
            "/open" => match rest.as_slice() {
                [id] => Ok(Some(Command::Open(id.to_string()))),
                _ => Err("Usage: /open <conversation id>".to_string()),
            },
            "/list" => Ok(Some(Command::List)),
            "/fav" => Ok(Some(Command::Favorite)),
            other => Err(format!("Unknown command: {}", other)),
        }
    }

    fn parse_generate(args: &[&str]) -> Result<Command, String> {
        let mut model = None;
        let mut aspect_ratio = None;
        let mut count = None;
        let mut i = 0;
        while i < args.len() && args[i].starts_with('-') {
            let flag = args[i];
            let value = args
                .get(i + 1)
                .ok_or_else(|| format!("Missing value for {}", flag))?;
            match flag {
                "-m" => model = Some(value.parse::<ImageModel>()?),
                "-a" => aspect_ratio = Some(value.parse::<AspectRatio>()?),
                "-n" => {
                    count = Some(
                        value
                            .parse::<u8>()
                            .map_err(|_| format!("Not an image count: {}", value))?,
                    )
                }
                other => return Err(format!("Unknown option: {}", other)),
            }
            i += 2;
        }
        let prompt = args[i..].join(" ");
        Ok(Command::Generate {
            prompt: if prompt.is_empty() { None } else { Some(prompt) },
            model,
            aspect_ratio,
            count,
        })
    }

    fn parse_index(args: &[&str], usage: &str) -> Result<usize, String> {
        match args.first().and_then(|a| a.parse::<usize>().ok()) {
            Some(n) if n >= 1 => Ok(n),
            _ => Err(format!("Usage: {}", usage)),
        }
    }
}

/// History snapshot handed to a background chat-stream task.
#[derive(Debug)]
pub struct SubmitJob {
    pub history: Vec<Message>,
    pub model: String,
}

#[derive(Debug)]
pub struct GenerateJob {
    pub prompt: String,
    pub params: GenerationParams,
}

/// The chat view: current conversation, transient UI state, and the
/// orchestration that ties the store and the Gemini client together.
pub struct App {
    pub conversation_id: Option<String>,
    pub messages: Vec<Message>,
    pub chat_model: String,
    pub input: String,
    pub loading: bool,
    pub upload: Option<Upload>,
    pub panel: GenPanel,
    pub favorite: bool,
    pub status: String,
    pub should_quit: bool,
    pub data_dir: PathBuf,
    created_at: DateTime<Utc>,
    default_model: String,
    events: Vec<UiEvent>,
    store: Store,
    client: GeminiClient,
    action_tx: UnboundedSender<Action>,
    action_rx: UnboundedReceiver<Action>,
}

impl App {
    pub async fn new(config: &Config, api_key: String) -> Result<Self> {
        let store = Store::connect(&config.database_url).await?;
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let mut app = App {
            conversation_id: None,
            messages: Vec::new(),
            chat_model: config.chat_model.clone(),
            input: String::new(),
            loading: false,
            upload: None,
            panel: GenPanel::default(),
            favorite: false,
            status: String::new(),
            should_quit: false,
            data_dir: config.data_dir(),
            created_at: Utc::now(),
            default_model: config.chat_model.clone(),
            events: Vec::new(),
            store,
            client: GeminiClient::new(api_key),
            action_tx,
            action_rx,
        };
        app.load_conversation(None).await;
        Ok(app)
    }

    fn greeting() -> Message {
        Message {
            id: GREETING_ID.to_string(),
            author: Author::Model,
            parts: vec![Part::text(GREETING_TEXT)],
        }
    }

    /// Loads the named conversation, or starts a fresh one (greeting plus
    /// default model) when the id is absent or unknown. Transient state
    /// always resets.
    pub async fn load_conversation(&mut self, id: Option<&str>) {
        let stored = match id {
            Some(id) if !id.is_empty() => match self.store.get_conversation(id).await {
                Ok(found) => found,
                Err(e) => {
                    log::error!("Failed to load conversation {}: {}", id, e);
                    None
                }
            },
            _ => None,
        };

        self.input.clear();
        self.upload = None;
        self.panel = GenPanel::default();
        self.loading = false;
        self.status.clear();

        match stored {
            Some(conversation) => {
                self.conversation_id = Some(conversation.id);
                self.created_at = conversation.created_at;
                self.messages = conversation.messages;
                self.chat_model = conversation.model;
                self.favorite = conversation.favorite;
            }
            None => {
                self.conversation_id = None;
                self.created_at = Utc::now();
                self.messages = vec![Self::greeting()];
                self.chat_model = self.default_model.clone();
                self.favorite = false;
            }
        }
    }

    /// Lazily creates the conversation id on the first saved message and
    /// signals creation exactly once.
    fn ensure_conversation(&mut self) -> String {
        if let Some(id) = &self.conversation_id {
            return id.clone();
        }
        let id = next_id();
        self.conversation_id = Some(id.clone());
        self.created_at = Utc::now();
        self.events.push(UiEvent::ConversationCreated { id: id.clone() });
        log::info!("Created conversation {}", id);
        id
    }

    fn persisted_messages(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.id != GREETING_ID)
            .cloned()
            .collect();
        // While a reply streams, the trailing model message is the local
        // placeholder, possibly partially filled; it is persisted only
        // once streaming completes.
        if self.loading {
            if let Some(last) = messages.last() {
                if last.author == Author::Model {
                    messages.pop();
                }
            }
        }
        messages
    }

    async fn persist(&mut self) {
        let Some(id) = self.conversation_id.clone() else {
            return;
        };
        let messages = self.persisted_messages();
        let conversation = Conversation {
            id: id.clone(),
            title: title_for(&messages),
            messages,
            created_at: self.created_at,
            model: self.chat_model.clone(),
            favorite: self.favorite,
            kind: ConversationKind::Chat,
        };
        if let Err(e) = self.store.add_or_update_conversation(&conversation).await {
            log::error!("Failed to persist conversation {}: {}", id, e);
        }
    }

    /// Stages the submission: guards, user message (image before text),
    /// streaming placeholder, and the history snapshot for the service.
    /// Returns `None` when the submission is a no-op.
    pub fn prepare_submit(&mut self) -> Option<SubmitJob> {
        let text = self.input.trim().to_string();
        if self.loading || (text.is_empty() && self.upload.is_none()) {
            return None;
        }

        let mut parts = Vec::new();
        if let Some(upload) = self.upload.take() {
            parts.push(Part::Image {
                url: upload.url,
                data: upload.data,
                mime_type: upload.mime_type,
            });
        }
        if !text.is_empty() {
            parts.push(Part::text(text));
        }

        self.ensure_conversation();
        self.messages.push(Message::new(Author::User, parts));
        // The greeting is never replayed to the model.
        let history = self.persisted_messages();
        self.messages
            .push(Message::new(Author::Model, vec![Part::text("")]));
        self.loading = true;
        self.input.clear();
        Some(SubmitJob {
            history,
            model: self.chat_model.clone(),
        })
    }

    pub async fn submit(&mut self) {
        let Some(job) = self.prepare_submit() else {
            return;
        };
        self.persist().await;

        let client = self.client.clone();
        let tx = self.action_tx.clone();
        tokio::spawn(async move {
            let mut accumulated = String::new();
            client
                .stream_chat(&job.history, &job.model, |fragment| {
                    accumulated.push_str(fragment);
                    let _ = tx.send(Action::StreamChunk(fragment.to_string()));
                })
                .await;
            let _ = tx.send(Action::StreamCompleted { text: accumulated });
        });
    }

    pub fn prepare_generate(&mut self) -> Option<GenerateJob> {
        let prompt = self.panel.prompt.trim().to_string();
        if self.loading || prompt.is_empty() {
            return None;
        }
        self.ensure_conversation();
        self.messages.push(Message::text(
            Author::User,
            format!("Generate image: \"{}\"", prompt),
        ));
        self.loading = true;
        Some(GenerateJob {
            prompt,
            params: self.panel.params.clone(),
        })
    }

    pub async fn generate(&mut self) {
        let Some(job) = self.prepare_generate() else {
            if !self.loading {
                self.status = "Nothing to generate: the image prompt is empty".to_string();
            }
            return;
        };
        self.persist().await;

        let client = self.client.clone();
        let tx = self.action_tx.clone();
        tokio::spawn(async move {
            let images = client.generate_images(&job.prompt, &job.params).await;
            let _ = tx.send(Action::GenerationCompleted {
                prompt: job.prompt,
                params: job.params,
                images,
            });
        });
    }

    pub async fn analyze(&mut self, prompt: String) {
        if self.loading {
            return;
        }
        let Some(upload) = self.upload.take() else {
            self.status = "Attach an image first (/attach <path>)".to_string();
            return;
        };
        let (data, mime_type) = (upload.data.clone(), upload.mime_type.clone());
        self.ensure_conversation();
        self.messages.push(Message::new(
            Author::User,
            vec![
                Part::Image {
                    url: upload.url,
                    data: upload.data,
                    mime_type: upload.mime_type,
                },
                Part::text(prompt.clone()),
            ],
        ));
        self.loading = true;
        self.persist().await;

        let client = self.client.clone();
        let tx = self.action_tx.clone();
        tokio::spawn(async move {
            let text = client.analyze_image(&data, &mime_type, &prompt).await;
            let _ = tx.send(Action::AnalysisCompleted { text });
        });
    }

    pub async fn edit(&mut self, index: usize, instruction: String) {
        if self.loading {
            return;
        }
        let Some(image) = self.image_refs().into_iter().nth(index) else {
            self.status = format!("No image #{}", index + 1);
            return;
        };
        let Some((data, mime_type)) = image.inline else {
            self.status = format!("Image #{} has no local payload to edit", index + 1);
            return;
        };
        self.events.push(UiEvent::EditImage {
            url: image.url.clone(),
        });
        self.ensure_conversation();
        self.messages.push(Message::text(
            Author::User,
            format!("Edit image: \"{}\"", instruction),
        ));
        self.loading = true;
        self.persist().await;

        let client = self.client.clone();
        let tx = self.action_tx.clone();
        tokio::spawn(async move {
            let image = client.edit_image(&data, &mime_type, &instruction).await;
            let _ = tx.send(Action::EditCompleted { instruction, image });
        });
    }

    /// Repopulates the generation panel from a past result and opens it.
    /// Uploads and generation are mutually exclusive input modes, so any
    /// pending upload is dropped.
    pub fn recall(&mut self, index: usize) -> bool {
        let Some((prompt, params)) = self
            .generation_results()
            .into_iter()
            .nth(index)
            .map(|(p, g)| (p.to_string(), g.clone()))
        else {
            return false;
        };
        self.panel.prompt = prompt;
        self.panel.params = params;
        self.panel.open = true;
        self.upload = None;
        true
    }

    /// All generation results in message order.
    pub fn generation_results(&self) -> Vec<(&str, &GenerationParams)> {
        self.messages
            .iter()
            .flat_map(|m| &m.parts)
            .filter_map(|part| match part {
                Part::ImageGenerationResult { prompt, params, .. } => {
                    Some((prompt.as_str(), params))
                }
                _ => None,
            })
            .collect()
    }

    /// All image references in message order: uploads first-class, each
    /// generated image individually. Rendering numbers images in this
    /// same order.
    pub fn image_refs(&self) -> Vec<ImageRef> {
        let mut refs = Vec::new();
        for message in &self.messages {
            for part in &message.parts {
                match part {
                    Part::Image {
                        url,
                        data,
                        mime_type,
                    } => refs.push(ImageRef {
                        url: url.clone(),
                        inline: Some((data.clone(), mime_type.clone())),
                    }),
                    Part::ImageGenerationResult { images, .. } => {
                        for url in images {
                            let inline = media::parse_data_url(url)
                                .map(|(mime, data)| (data.to_string(), mime.to_string()));
                            refs.push(ImageRef {
                                url: url.clone(),
                                inline,
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
        refs
    }

    fn has_user_messages(&self) -> bool {
        self.messages.iter().any(|m| m.id != GREETING_ID)
    }

    /// Applies one completion action. Pure state transition; persistence
    /// happens in [`App::handle_action`].
    pub fn apply(&mut self, action: Action) {
        match action {
            Action::StreamChunk(chunk) => {
                if !self.loading {
                    return;
                }
                if let Some(Part::Text { text }) = self
                    .messages
                    .last_mut()
                    .filter(|m| m.author == Author::Model)
                    .and_then(|m| m.parts.first_mut())
                {
                    text.push_str(&chunk);
                }
            }
            Action::StreamCompleted { text } => {
                // A completion that lands after the conversation was
                // switched has nothing to finish.
                if !self.loading {
                    return;
                }
                if let Some(last) = self
                    .messages
                    .last_mut()
                    .filter(|m| m.author == Author::Model)
                {
                    // The streaming placeholder is replaced wholesale.
                    last.parts = vec![Part::text(text)];
                }
                self.loading = false;
            }
            Action::GenerationCompleted {
                prompt,
                params,
                images,
            } => {
                let message = match images {
                    Some(images) => Message::new(
                        Author::Model,
                        vec![Part::ImageGenerationResult {
                            prompt,
                            params,
                            images,
                        }],
                    ),
                    None => Message::text(Author::Model, GENERATION_APOLOGY),
                };
                self.messages.push(message);
                self.loading = false;
                self.panel.prompt.clear();
                self.panel.open = false;
            }
            Action::AnalysisCompleted { text } => {
                self.messages.push(Message::text(Author::Model, text));
                self.loading = false;
            }
            Action::EditCompleted { instruction, image } => {
                let message = match image {
                    Some(url) => Message::new(
                        Author::Model,
                        vec![Part::ImageGenerationResult {
                            prompt: instruction,
                            params: GenerationParams::default(),
                            images: vec![url],
                        }],
                    ),
                    None => Message::text(Author::Model, EDIT_APOLOGY),
                };
                self.messages.push(message);
                self.loading = false;
            }
        }
    }

    pub async fn handle_action(&mut self, action: Action) {
        let persist_after = !matches!(action, Action::StreamChunk(_));
        self.apply(action);
        if persist_after {
            self.persist().await;
        }
    }

    pub fn try_recv_action(&mut self) -> Option<Action> {
        self.action_rx.try_recv().ok()
    }

    pub fn take_events(&mut self) -> Vec<UiEvent> {
        std::mem::take(&mut self.events)
    }

    /// Interprets the current input line: a slash command, or plain chat
    /// text to submit.
    pub async fn handle_input(&mut self) {
        match Command::parse(self.input.trim()) {
            Ok(None) => self.submit().await,
            Ok(Some(command)) => {
                self.input.clear();
                self.run_command(command).await;
            }
            Err(message) => {
                self.input.clear();
                self.status = message;
            }
        }
    }

    pub async fn run_command(&mut self, command: Command) {
        match command {
            Command::Generate {
                prompt,
                model,
                aspect_ratio,
                count,
            } => {
                // A refused request must not clobber the panel or drop a
                // pending upload.
                if self.loading {
                    self.status = "Still waiting on the previous request".to_string();
                    return;
                }
                if let Some(model) = model {
                    self.panel.params.model = model;
                }
                if let Some(ratio) = aspect_ratio {
                    self.panel.params.aspect_ratio = ratio;
                }
                if let Some(count) = count {
                    self.panel.params.count =
                        count.clamp(crate::conversation::MIN_IMAGE_COUNT, crate::conversation::MAX_IMAGE_COUNT);
                }
                if let Some(prompt) = prompt {
                    self.panel.prompt = prompt;
                }
                self.panel.open = true;
                self.upload = None;
                self.generate().await;
            }
            Command::Recall(n) => {
                if self.recall(n - 1) {
                    self.status = format!("Recalled generation #{} into the panel", n);
                } else {
                    self.status = format!("No generation result #{}", n);
                }
            }
            Command::View(n) => {
                let refs = self.image_refs();
                if n <= refs.len() {
                    self.events.push(UiEvent::ViewImage {
                        urls: refs.into_iter().map(|r| r.url).collect(),
                        start: n - 1,
                    });
                } else {
                    self.status = format!("No image #{}", n);
                }
            }
            Command::Edit { index, instruction } => self.edit(index - 1, instruction).await,
            Command::Attach(path) => match media::load_attachment(&path) {
                Ok(upload) => {
                    self.status = format!("Attached {}", upload.url);
                    self.upload = Some(upload);
                    self.panel.open = false;
                }
                Err(e) => self.status = e.to_string(),
            },
            Command::Detach => {
                self.upload = None;
                self.status = "Attachment removed".to_string();
            }
            Command::Analyze(prompt) => self.analyze(prompt).await,
            Command::Model(name) => {
                if self.has_user_messages() {
                    self.status =
                        "The model cannot be changed once a conversation has messages".to_string();
                } else {
                    self.status = format!("Chat model set to {}", name);
                    self.chat_model = name;
                }
            }
            Command::New => {
                self.load_conversation(None).await;
                self.status = "Started a new conversation".to_string();
            }
            Command::Open(id) => {
                self.load_conversation(Some(&id)).await;
                if self.conversation_id.as_deref() == Some(id.as_str()) {
                    self.status = format!("Opened conversation {}", id);
                } else {
                    self.status = format!("Conversation {} not found; started a new one", id);
                }
            }
            Command::List => match self.store.list_conversations().await {
                Ok(conversations) => {
                    let summary: Vec<String> = conversations
                        .iter()
                        .take(5)
                        .map(|c| format!("{} \"{}\"", c.id, c.title))
                        .collect();
                    self.status = format!(
                        "{} conversation(s): {}",
                        conversations.len(),
                        summary.join(", ")
                    );
                }
                Err(e) => {
                    log::error!("Failed to list conversations: {}", e);
                    self.status = "Failed to list conversations".to_string();
                }
            },
            Command::Favorite => {
                self.favorite = !self.favorite;
                self.status = if self.favorite {
                    "Marked as favorite".to_string()
                } else {
                    "Removed favorite mark".to_string()
                };
                if self.conversation_id.is_some() {
                    self.persist().await;
                }
            }
        }
    }
}
