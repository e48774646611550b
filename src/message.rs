//! Message protocol definitions
//!
//! Line-oriented text protocol: every frame is `KEYWORD:payload`. Parsing is
//! a pure function from one sanitized line to a tagged variant, matched on
//! the keyword before the first `:`. Anything unrecognised becomes an
//! explicit `Invalid` variant; parsing never fails.

/// Client → Server message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `AUTH:<secret>` - only the first whitespace-delimited token is kept
    Auth(Option<String>),
    /// `NAME:<name>` with a non-empty name
    Name(String),
    /// `NAME:` with nothing after the prefix; answered like a taken name
    EmptyName,
    /// `SAY:<text>`
    Say(String),
    /// `KICK:<target>`
    Kick(String),
    /// `LIST:`
    List,
    /// `LEAVE:`
    Leave,
    /// Unrecognised or malformed frame
    Invalid,
}

impl ClientMessage {
    /// Build an AUTH frame for the given secret
    pub fn auth(secret: &str) -> Self {
        if secret.is_empty() {
            ClientMessage::Auth(None)
        } else {
            ClientMessage::Auth(Some(secret.to_string()))
        }
    }

    /// Parse one line (without its terminator)
    pub fn parse(line: &str) -> Self {
        let Some((keyword, payload)) = line.split_once(':') else {
            return ClientMessage::Invalid;
        };
        match keyword {
            "AUTH" => ClientMessage::Auth(payload.split_whitespace().next().map(str::to_string)),
            "NAME" if payload.is_empty() => ClientMessage::EmptyName,
            "NAME" => ClientMessage::Name(payload.to_string()),
            "SAY" => ClientMessage::Say(payload.to_string()),
            "KICK" => ClientMessage::Kick(payload.to_string()),
            "LIST" => ClientMessage::List,
            "LEAVE" => ClientMessage::Leave,
            _ => ClientMessage::Invalid,
        }
    }

    /// Wire form without the newline terminator
    ///
    /// Returns `None` for `Invalid`, which has no wire form.
    pub fn to_wire(&self) -> Option<String> {
        let line = match self {
            ClientMessage::Auth(secret) => format!("AUTH:{}", secret.as_deref().unwrap_or("")),
            ClientMessage::Name(name) => format!("NAME:{name}"),
            ClientMessage::EmptyName => "NAME:".to_string(),
            ClientMessage::Say(text) => format!("SAY:{text}"),
            ClientMessage::Kick(target) => format!("KICK:{target}"),
            ClientMessage::List => "LIST:".to_string(),
            ClientMessage::Leave => "LEAVE:".to_string(),
            ClientMessage::Invalid => return None,
        };
        Some(line)
    }

    /// Short keyword used in logs and protocol errors
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Auth(_) => "AUTH",
            ClientMessage::Name(_) | ClientMessage::EmptyName => "NAME",
            ClientMessage::Say(_) => "SAY",
            ClientMessage::Kick(_) => "KICK",
            ClientMessage::List => "LIST",
            ClientMessage::Leave => "LEAVE",
            ClientMessage::Invalid => "INVALID",
        }
    }
}

/// Server → Client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// `AUTH:` challenge
    Auth,
    /// `OK:` after a successful auth and after an accepted name
    Ok,
    /// `WHO:` name request
    Who,
    /// `NAME_TAKEN:` - pick another name
    NameTaken,
    /// `MSG:<name>:<text>`
    Msg { name: String, text: String },
    /// `LIST:<n1,n2,...>`
    List(Vec<String>),
    /// `ENTER:<name>`
    Enter(String),
    /// `LEAVE:<name>`
    Leave(String),
    /// `KICK:` - sent to the victim only
    Kick,
    /// Unrecognised or malformed frame
    Invalid,
}

impl ServerMessage {
    /// Parse one line (without its terminator)
    pub fn parse(line: &str) -> Self {
        let Some((keyword, payload)) = line.split_once(':') else {
            return ServerMessage::Invalid;
        };
        match keyword {
            "AUTH" => ServerMessage::Auth,
            "OK" => ServerMessage::Ok,
            "WHO" => ServerMessage::Who,
            "NAME_TAKEN" => ServerMessage::NameTaken,
            "KICK" => ServerMessage::Kick,
            "MSG" => match payload.split_once(':') {
                Some((name, text)) if !name.is_empty() => ServerMessage::Msg {
                    name: name.to_string(),
                    text: text.to_string(),
                },
                _ => ServerMessage::Invalid,
            },
            "LIST" => ServerMessage::List(
                payload
                    .split(',')
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            "ENTER" if !payload.is_empty() => ServerMessage::Enter(payload.to_string()),
            "LEAVE" if !payload.is_empty() => ServerMessage::Leave(payload.to_string()),
            _ => ServerMessage::Invalid,
        }
    }

    /// Wire form without the newline terminator
    ///
    /// Returns `None` for `Invalid`, which has no wire form.
    pub fn to_wire(&self) -> Option<String> {
        let line = match self {
            ServerMessage::Auth => "AUTH:".to_string(),
            ServerMessage::Ok => "OK:".to_string(),
            ServerMessage::Who => "WHO:".to_string(),
            ServerMessage::NameTaken => "NAME_TAKEN:".to_string(),
            ServerMessage::Kick => "KICK:".to_string(),
            ServerMessage::Msg { name, text } => format!("MSG:{name}:{text}"),
            ServerMessage::List(names) => format!("LIST:{}", names.join(",")),
            ServerMessage::Enter(name) => format!("ENTER:{name}"),
            ServerMessage::Leave(name) => format!("LEAVE:{name}"),
            ServerMessage::Invalid => return None,
        };
        Some(line)
    }

    /// Display payload carried by the frame, if any
    ///
    /// `MSG` combines sender and text as `"<name>: <text>"`; `LIST` is the
    /// comma-joined name list.
    pub fn payload(&self) -> Option<String> {
        match self {
            ServerMessage::Msg { name, text } => Some(format!("{name}: {text}")),
            ServerMessage::List(names) => Some(names.join(",")),
            ServerMessage::Enter(name) | ServerMessage::Leave(name) => Some(name.clone()),
            _ => None,
        }
    }

    /// Short keyword used in logs and protocol errors
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Auth => "AUTH",
            ServerMessage::Ok => "OK",
            ServerMessage::Who => "WHO",
            ServerMessage::NameTaken => "NAME_TAKEN",
            ServerMessage::Msg { .. } => "MSG",
            ServerMessage::List(_) => "LIST",
            ServerMessage::Enter(_) => "ENTER",
            ServerMessage::Leave(_) => "LEAVE",
            ServerMessage::Kick => "KICK",
            ServerMessage::Invalid => "INVALID",
        }
    }
}
