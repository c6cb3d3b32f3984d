use bytes::Bytes;
use indexmap::IndexMap;

/// Message headers, in wire order.
pub type Headers = IndexMap<String, String>;

/// Wire constants for the leading kind tag of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Invocation = 1,
    StreamItem = 2,
    Completion = 3,
    StreamInvocation = 4,
    CancelInvocation = 5,
    Ping = 6,
    Close = 7,
}

impl MessageKind {
    pub fn from_tag(tag: i64) -> Option<Self> {
        Some(match tag {
            1 => Self::Invocation,
            2 => Self::StreamItem,
            3 => Self::Completion,
            4 => Self::StreamInvocation,
            5 => Self::CancelInvocation,
            6 => Self::Ping,
            7 => Self::Close,
            _ => return None,
        })
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Invocation => "invocation",
            Self::StreamItem => "stream item",
            Self::Completion => "completion",
            Self::StreamInvocation => "stream invocation",
            Self::CancelInvocation => "cancel invocation",
            Self::Ping => "ping",
            Self::Close => "close",
        }
    }
}

/// A decoded hub message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubMessage {
    Invocation(InvocationMessage),
    /// Reply to an invocation. Decode-only.
    Completion(CompletionMessage),
    CancelInvocation(CancelInvocationMessage),
    Ping,
    Close(CloseMessage),
}

impl HubMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Invocation(_) => MessageKind::Invocation,
            Self::Completion(_) => MessageKind::Completion,
            Self::CancelInvocation(_) => MessageKind::CancelInvocation,
            Self::Ping => MessageKind::Ping,
            Self::Close(_) => MessageKind::Close,
        }
    }
}

/// A call of `target` on the remote side.
///
/// `arguments` holds the MessagePack-encoded argument array exactly as it
/// appeared on the wire; it is forwarded, never decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationMessage {
    pub headers: Headers,
    /// `None` for fire-and-forget invocations. Empty ids are treated as absent.
    pub invocation_id: Option<String>,
    pub target: String,
    pub arguments: Bytes,
    pub stream_ids: Vec<String>,
}

impl InvocationMessage {
    /// A fire-and-forget invocation with no headers or streams.
    pub fn new(target: impl Into<String>, arguments: impl Into<Bytes>) -> Self {
        Self {
            target: target.into(),
            arguments: arguments.into(),
            ..Self::default()
        }
    }

    /// Attach an invocation id so the peer replies with a completion.
    pub fn with_invocation_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.invocation_id = (!id.is_empty()).then_some(id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionMessage {
    pub headers: Headers,
    pub invocation_id: String,
    pub outcome: CompletionOutcome,
}

/// Result carried by a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The remote method failed with this message.
    Error(String),
    /// The remote method returned nothing.
    Void,
    /// Raw MessagePack encoding of the returned value.
    Result(Bytes),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelInvocationMessage {
    pub headers: Headers,
    pub invocation_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseMessage {
    pub error: Option<String>,
    pub allow_reconnect: bool,
}

impl From<InvocationMessage> for HubMessage {
    fn from(message: InvocationMessage) -> Self {
        Self::Invocation(message)
    }
}

impl From<CancelInvocationMessage> for HubMessage {
    fn from(message: CancelInvocationMessage) -> Self {
        Self::CancelInvocation(message)
    }
}

impl From<CloseMessage> for HubMessage {
    fn from(message: CloseMessage) -> Self {
        Self::Close(message)
    }
}
