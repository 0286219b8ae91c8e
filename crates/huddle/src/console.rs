//! Line-oriented host: parses shell commands, forwards them to a feed session, and renders
//! whatever the session publishes.

use std::fmt::Write as _;
use std::num::ParseIntError;
use std::sync::Arc;

use huddle_api::{AttachmentUpload, LoopbackBackend, LoopbackUser};
use huddle_feed::{
    ConversationId, ErrorKind, FeedError, FeedSessionHandle, HostCommand, Key, KeyEvent, MessageId,
    NotificationScope, PanelNotice, PanelSnapshot, SessionUpdate, UserId,
};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::settings::{SettingsError, SettingsStore};

pub const HELP: &str = "\
commands:
  open <id>              open a conversation
  switch <id>            navigate to a conversation (no-op if already open)
  close                  close the open conversation
  send <text>            send a message
  type <text>            replace the composer draft
  mention <id> <name>    add a mention token to the draft
  key <keys...>          press keys: shift, shift-up, enter
  more                   load older messages
  refresh                reload the first page
  delete <id>            delete a message
  upload <name> [text]   upload a file with optional text content
  post <id> <text>       post as another user (loopback only)
  interact               record a user gesture so alerts may sound
  scope <scope>          save notification scope: global | active-only
  status                 print the open conversation
  help                   show this text
  quit                   exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open(ConversationId),
    Switch(ConversationId),
    Close,
    Send(String),
    Type(String),
    Mention { user_id: UserId, display_name: String },
    Keys(Vec<KeyEvent>),
    More,
    Refresh,
    Delete(MessageId),
    Upload { file_name: String, content: String },
    Post { parent_id: ConversationId, body: String },
    Interact,
    Scope(NotificationScope),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CommandError {
    #[snafu(display("empty command"))]
    EmptyCommand { stage: &'static str },
    #[snafu(display("unknown command '{name}', try 'help'"))]
    UnknownCommand { stage: &'static str, name: String },
    #[snafu(display("'{command}' needs {argument}"))]
    MissingArgument {
        stage: &'static str,
        command: &'static str,
        argument: &'static str,
    },
    #[snafu(display("'{value}' is not a valid id: {source}"))]
    InvalidId {
        stage: &'static str,
        value: String,
        source: ParseIntError,
    },
    #[snafu(display("unknown key '{key}', expected shift, shift-up or enter"))]
    UnknownKey { stage: &'static str, key: String },
    #[snafu(display("unknown notification scope '{value}'"))]
    UnknownScope { stage: &'static str, value: String },
    #[snafu(display("feed session is unavailable: {source}"))]
    Session {
        stage: &'static str,
        source: FeedError,
    },
    #[snafu(display("failed to save settings: {source}"))]
    SaveSettings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("failed to read input: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    let (name, rest) = line
        .split_once(char::is_whitespace)
        .map(|(name, rest)| (name, rest.trim()))
        .unwrap_or((line, ""));
    ensure!(
        !name.is_empty(),
        EmptyCommandSnafu {
            stage: "parse-command-name",
        }
    );

    let command = match name.to_ascii_lowercase().as_str() {
        "open" => Command::Open(ConversationId::new(parse_id(rest, "open", "a conversation id")?)),
        "switch" => Command::Switch(ConversationId::new(parse_id(
            rest,
            "switch",
            "a conversation id",
        )?)),
        "close" => Command::Close,
        "send" => Command::Send(rest.to_string()),
        "type" => Command::Type(rest.to_string()),
        "mention" => {
            let (id, display_name) = split_head(rest, "mention", "a user id and a name")?;
            Command::Mention {
                user_id: UserId::new(parse_id(id, "mention", "a user id")?),
                display_name: display_name.to_string(),
            }
        }
        "key" | "keys" => Command::Keys(parse_keys(rest)?),
        "more" => Command::More,
        "refresh" => Command::Refresh,
        "delete" => Command::Delete(MessageId::new(parse_id(rest, "delete", "a message id")?)),
        "upload" => {
            let (file_name, content) = rest
                .split_once(char::is_whitespace)
                .map(|(name, content)| (name, content.trim()))
                .unwrap_or((rest, ""));
            ensure!(
                !file_name.is_empty(),
                MissingArgumentSnafu {
                    stage: "parse-upload",
                    command: "upload",
                    argument: "a file name",
                }
            );
            Command::Upload {
                file_name: file_name.to_string(),
                content: content.to_string(),
            }
        }
        "post" => {
            let (id, body) = split_head(rest, "post", "a conversation id and text")?;
            Command::Post {
                parent_id: ConversationId::new(parse_id(id, "post", "a conversation id")?),
                body: body.to_string(),
            }
        }
        "interact" => Command::Interact,
        "scope" => Command::Scope(parse_scope(rest)?),
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => {
            return UnknownCommandSnafu {
                stage: "parse-command-name",
                name: other.to_string(),
            }
            .fail();
        }
    };
    Ok(command)
}

fn parse_id(value: &str, command: &'static str, argument: &'static str) -> Result<u64, CommandError> {
    let value = value.trim();
    ensure!(
        !value.is_empty(),
        MissingArgumentSnafu {
            stage: "parse-id",
            command,
            argument,
        }
    );
    value.parse::<u64>().context(InvalidIdSnafu {
        stage: "parse-id",
        value: value.to_string(),
    })
}

fn split_head<'a>(
    rest: &'a str,
    command: &'static str,
    argument: &'static str,
) -> Result<(&'a str, &'a str), CommandError> {
    rest.split_once(char::is_whitespace)
        .map(|(head, tail)| (head, tail.trim()))
        .filter(|(_, tail)| !tail.is_empty())
        .context(MissingArgumentSnafu {
            stage: "parse-arguments",
            command,
            argument,
        })
}

fn parse_keys(rest: &str) -> Result<Vec<KeyEvent>, CommandError> {
    ensure!(
        !rest.is_empty(),
        MissingArgumentSnafu {
            stage: "parse-keys",
            command: "key",
            argument: "at least one key",
        }
    );

    rest.split_whitespace()
        .map(|key| match key.to_ascii_lowercase().as_str() {
            "shift" | "shift-down" => Ok(KeyEvent::Down(Key::Shift)),
            "shift-up" => Ok(KeyEvent::Up(Key::Shift)),
            "enter" => Ok(KeyEvent::Down(Key::Enter)),
            other => UnknownKeySnafu {
                stage: "parse-keys",
                key: other.to_string(),
            }
            .fail(),
        })
        .collect()
}

fn parse_scope(value: &str) -> Result<NotificationScope, CommandError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "global" => Ok(NotificationScope::Global),
        "active-only" | "active" => Ok(NotificationScope::ActiveOnly),
        other => UnknownScopeSnafu {
            stage: "parse-scope",
            value: other.to_string(),
        }
        .fail(),
    }
}

pub fn render_notice(notice: &PanelNotice) -> String {
    match notice {
        PanelNotice::Alert(alert) => format!(
            "[alert] new message {} in #{}",
            alert.message_id, alert.parent_id
        ),
        PanelNotice::Background(notice) => format!(
            "[#{}] {}: {}",
            notice.parent_id, notice.author, notice.preview
        ),
        PanelNotice::Error(error) => {
            let kind = match error.kind {
                ErrorKind::Validation => "invalid",
                ErrorKind::Permission => "denied",
                ErrorKind::Network => "network",
                ErrorKind::State => "busy",
            };
            format!("[{kind}] {}", error.message)
        }
    }
}

pub fn render_snapshot(snapshot: &PanelSnapshot) -> String {
    let mut output = String::new();
    let Some(parent_id) = snapshot.parent_id else {
        output.push_str("no conversation open");
        render_unread(snapshot, &mut output);
        return output;
    };

    let _ = write!(
        output,
        "#{parent_id}: {}/{} loaded",
        snapshot.items.len(),
        snapshot.total
    );
    for (flag, label) in [
        (snapshot.has_more, "more"),
        (snapshot.loading, "loading"),
        (snapshot.submitting, "sending"),
        (!snapshot.subscribed, "offline"),
    ] {
        if flag {
            let _ = write!(output, " [{label}]");
        }
    }
    if let Some(file_name) = &snapshot.pending_upload {
        let _ = write!(output, " [uploading {file_name}]");
    }

    for message in snapshot.items.iter().rev() {
        let _ = write!(output, "\n  {:>5} {}: ", message.id.0, message.author_name);
        if message.body.is_empty() {
            let names = message
                .attachments
                .iter()
                .map(|attachment| attachment.name.as_str())
                .collect::<Vec<_>>();
            let _ = write!(output, "<{}>", names.join(", "));
        } else {
            output.push_str(&message.body.replace('\n', "\n        "));
        }
    }

    if !snapshot.composer_text.is_empty() {
        let _ = write!(output, "\n  draft: {:?}", snapshot.composer_text);
    }
    let _ = write!(output, "\n  {}", snapshot.composer_hint);
    render_unread(snapshot, &mut output);
    output
}

fn render_unread(snapshot: &PanelSnapshot, output: &mut String) {
    if snapshot.unread.is_empty() {
        return;
    }
    let counts = snapshot
        .unread
        .iter()
        .map(|(parent_id, count)| format!("#{parent_id}({count})"))
        .collect::<Vec<_>>();
    let _ = write!(output, "\n  unread: {}", counts.join(" "));
}

/// Identity used by `post` to play the other side of a conversation.
pub fn guest_user() -> LoopbackUser {
    LoopbackUser::new(2, "Grace")
}

pub struct Console {
    handle: FeedSessionHandle,
    backend: Arc<LoopbackBackend>,
    store: SettingsStore,
    last_snapshot: PanelSnapshot,
}

impl Console {
    pub fn new(handle: FeedSessionHandle, backend: Arc<LoopbackBackend>, store: SettingsStore) -> Self {
        Self {
            handle,
            backend,
            store,
            last_snapshot: PanelSnapshot::default(),
        }
    }

    /// Runs until `quit`, end of input, or the session going away.
    pub async fn run(mut self) -> Result<(), CommandError> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("{HELP}");

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = line.context(ReadInputSnafu { stage: "read-console-line" })?;
                    let Some(line) = line else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_command(&line) {
                        Ok(Command::Quit) => break,
                        Ok(command) => {
                            if let Err(error) = self.execute(command) {
                                println!("error: {error}");
                            }
                        }
                        Err(error) => println!("error: {error}"),
                    }
                }
                update = self.handle.next_update() => {
                    let Some(update) = update else { break };
                    self.show(update);
                }
            }
        }

        self.handle
            .shutdown()
            .context(SessionSnafu { stage: "shutdown-session" })
    }

    fn execute(&mut self, command: Command) -> Result<(), CommandError> {
        let host_command = match command {
            Command::Open(parent_id) => HostCommand::Open(parent_id),
            Command::Switch(parent_id) => HostCommand::ParentChanged(parent_id),
            Command::Close => HostCommand::Close,
            Command::Send(body) => HostCommand::SendMessage(body),
            Command::Type(text) => HostCommand::SetComposerText(text),
            Command::Mention {
                user_id,
                display_name,
            } => HostCommand::InsertMention {
                display_name,
                user_id,
            },
            Command::Keys(keys) => {
                for key in keys {
                    self.forward(HostCommand::Key(key))?;
                }
                return Ok(());
            }
            Command::More => HostCommand::LoadMore,
            Command::Refresh => HostCommand::Refresh,
            Command::Delete(message_id) => HostCommand::DeleteMessage(message_id),
            Command::Upload { file_name, content } => {
                HostCommand::Upload(AttachmentUpload::new(file_name, content.into_bytes()))
            }
            Command::Post { parent_id, body } => {
                self.backend.post_as(parent_id.0, &guest_user(), &body);
                return Ok(());
            }
            Command::Interact => HostCommand::NoteInteraction,
            Command::Scope(scope) => {
                let mut settings = (*self.store.settings()).clone();
                settings.notification_scope = scope;
                self.store
                    .update(settings)
                    .context(SaveSettingsSnafu { stage: "save-scope" })?;
                println!(
                    "saved notification scope to {:?}; applies on next start",
                    self.store.config_path()
                );
                return Ok(());
            }
            Command::Status => {
                println!("{}", render_snapshot(&self.last_snapshot));
                return Ok(());
            }
            Command::Help => {
                println!("{HELP}");
                return Ok(());
            }
            Command::Quit => return Ok(()),
        };
        self.forward(host_command)
    }

    fn forward(&self, command: HostCommand) -> Result<(), CommandError> {
        self.handle
            .send(command)
            .context(SessionSnafu { stage: "forward-command" })
    }

    fn show(&mut self, update: SessionUpdate) {
        for notice in &update.notices {
            println!("{}", render_notice(notice));
        }
        if update.snapshot != self.last_snapshot {
            println!("{}", render_snapshot(&update.snapshot));
            self.last_snapshot = update.snapshot;
        }
    }
}
