//! # Device Protocol
//!
//! The newline-delimited text grammar spoken between the server and its
//! devices, in both directions.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Device Protocol Lines                             │
//! │                                                                         │
//! │  POLL FLOW                                                             │
//! │  ─────────                                                             │
//! │  Server ───► PING <rid>                                                │
//! │  Tag    ◄─── PONG <rid> EMPTY            (no payload configured)       │
//! │  Tag    ◄─── PONG <rid> DATA <json>      (current configuration)       │
//! │  Reader ◄─── PONG <rid> NFC <BOX|DOOR>   (readers answer with role)    │
//! │                                                                         │
//! │  CONFIGURATION FLOW                                                    │
//! │  ──────────────────                                                    │
//! │  Server ───► SET <json>                                                │
//! │  Tag    ◄─── ACK ID=<n>                  (config with that id applied) │
//! │                                                                         │
//! │  UID CAPTURE FLOW                                                      │
//! │  ────────────────                                                      │
//! │  Server ───► READUID <rid>                                             │
//! │  Reader ◄─── UID <rid> <hex>                                           │
//! │                                                                         │
//! │  UNSOLICITED EVENTS (device → server, fire-and-forget)                 │
//! │  ─────────────────────────────────────────────────────                 │
//! │  ROLE NFC <BOX|DOOR>    reader self-identification                     │
//! │  SCAN <hex>             tag passed an NFC reader                       │
//! │  MOVE <json>            item relocation report                         │
//! │  SOLD <json>            item sold report                               │
//! │  RESET                  device restarted (informational no-op)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Plain UTF-8 lines over TCP, space-delimited leading tokens, `\n`
//! terminated, no length prefix. JSON payloads occupy the rest of the line.

use tagnet_core::{MoveEvent, ReaderKind, TagConfig};

use crate::error::{FleetError, FleetResult};

// =============================================================================
// Device → Server Messages
// =============================================================================

/// Payload of a `PONG` reply.
#[derive(Debug, Clone, PartialEq)]
pub enum PongReply {
    /// `PONG <rid> EMPTY` — the tag has no configuration yet.
    Empty,
    /// `PONG <rid> DATA <json>` — the tag's current configuration.
    Data(TagConfig),
    /// `PONG <rid> NFC <BOX|DOOR>` — an NFC reader answering a poll.
    Reader(ReaderKind),
}

/// One parsed line from a device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    /// Reply to a `PING <rid>` poll.
    Pong { rid: String, reply: PongReply },

    /// Acknowledgement that the `SET` carrying that article id was applied.
    Ack { id: i64 },

    /// Reader self-identification; idempotent if repeated.
    Role { kind: ReaderKind },

    /// Reply to a `READUID <rid>` request.
    Uid { rid: String, uid: String },

    /// Fire-and-forget relocation report.
    Move(MoveEvent),

    /// Fire-and-forget sale report carrying the sold item's configuration.
    Sold(TagConfig),

    /// A tag passed an NFC reader; direction derives from the reader role.
    Scan { uid: String },

    /// Device restart notification. No server-side action.
    Reset,

    /// Unrecognized leading token. No server-side action.
    Unknown,
}

impl DeviceMessage {
    /// Parses one framed line.
    ///
    /// Unrecognized leading tokens parse to [`DeviceMessage::Unknown`]
    /// (forward compatibility); a *recognized* token with a malformed body
    /// is an error the dispatcher logs and drops.
    pub fn parse(line: &str) -> FleetResult<DeviceMessage> {
        let line = line.trim();
        let (token, rest) = match line.split_once(' ') {
            Some((token, rest)) => (token, rest.trim()),
            None => (line, ""),
        };

        match token {
            "PONG" => parse_pong(line, rest),
            "ACK" => parse_ack(line, rest),
            "ROLE" => parse_role(line, rest),
            "UID" => parse_uid(line, rest),
            "MOVE" => {
                let event: MoveEvent = serde_json::from_str(rest)
                    .map_err(|e| malformed(line, format!("bad MOVE payload: {e}")))?;
                Ok(DeviceMessage::Move(event))
            }
            "SOLD" => {
                let config: TagConfig = serde_json::from_str(rest)
                    .map_err(|e| malformed(line, format!("bad SOLD payload: {e}")))?;
                Ok(DeviceMessage::Sold(config))
            }
            "SCAN" => {
                if rest.is_empty() {
                    return Err(malformed(line, "missing scan uid".into()));
                }
                Ok(DeviceMessage::Scan {
                    uid: rest.to_string(),
                })
            }
            "RESET" => Ok(DeviceMessage::Reset),
            _ => Ok(DeviceMessage::Unknown),
        }
    }

    /// Returns the message kind as a string (for logging).
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceMessage::Pong { .. } => "PONG",
            DeviceMessage::Ack { .. } => "ACK",
            DeviceMessage::Role { .. } => "ROLE",
            DeviceMessage::Uid { .. } => "UID",
            DeviceMessage::Move(_) => "MOVE",
            DeviceMessage::Sold(_) => "SOLD",
            DeviceMessage::Scan { .. } => "SCAN",
            DeviceMessage::Reset => "RESET",
            DeviceMessage::Unknown => "UNKNOWN",
        }
    }
}

fn malformed(line: &str, reason: String) -> FleetError {
    FleetError::MalformedLine {
        line: line.to_string(),
        reason,
    }
}

fn parse_pong(line: &str, rest: &str) -> FleetResult<DeviceMessage> {
    let (rid, body) = rest
        .split_once(' ')
        .ok_or_else(|| malformed(line, "missing pong body".into()))?;
    let body = body.trim();

    let reply = if body == "EMPTY" {
        PongReply::Empty
    } else if let Some(json) = body.strip_prefix("DATA ") {
        let config: TagConfig = serde_json::from_str(json.trim())
            .map_err(|e| malformed(line, format!("bad DATA payload: {e}")))?;
        PongReply::Data(config)
    } else if let Some(role) = body.strip_prefix("NFC ") {
        let kind = ReaderKind::from_wire(role.trim())
            .ok_or_else(|| malformed(line, format!("unknown reader role {role:?}")))?;
        PongReply::Reader(kind)
    } else {
        return Err(malformed(line, format!("unknown pong body {body:?}")));
    };

    Ok(DeviceMessage::Pong {
        rid: rid.to_string(),
        reply,
    })
}

fn parse_ack(line: &str, rest: &str) -> FleetResult<DeviceMessage> {
    let value = rest
        .strip_prefix("ID=")
        .ok_or_else(|| malformed(line, "expected ID=<n>".into()))?;
    let id: i64 = value
        .trim()
        .parse()
        .map_err(|_| malformed(line, format!("non-numeric ack id {value:?}")))?;
    Ok(DeviceMessage::Ack { id })
}

fn parse_role(line: &str, rest: &str) -> FleetResult<DeviceMessage> {
    let role = rest
        .strip_prefix("NFC ")
        .ok_or_else(|| malformed(line, "expected ROLE NFC <BOX|DOOR>".into()))?;
    let kind = ReaderKind::from_wire(role.trim())
        .ok_or_else(|| malformed(line, format!("unknown reader role {role:?}")))?;
    Ok(DeviceMessage::Role { kind })
}

fn parse_uid(line: &str, rest: &str) -> FleetResult<DeviceMessage> {
    let (rid, uid) = rest
        .split_once(' ')
        .ok_or_else(|| malformed(line, "expected UID <rid> <hex>".into()))?;
    let uid = uid.trim();
    if uid.is_empty() {
        return Err(malformed(line, "empty uid".into()));
    }
    Ok(DeviceMessage::Uid {
        rid: rid.to_string(),
        uid: uid.to_string(),
    })
}

// =============================================================================
// Server → Device Commands
// =============================================================================

/// One command line the server sends to a device.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerCommand {
    /// Assign a configuration payload. Acknowledged by `ACK ID=<n>`.
    Set(TagConfig),
    /// Poll for the current payload. Answered by `PONG <rid> ...`.
    Ping { rid: String },
    /// Request a hardware identifier read. Answered by `UID <rid> <hex>`.
    ReadUid { rid: String },
}

impl ServerCommand {
    /// Encodes the command as one wire line (without the `\n` delimiter;
    /// the connection's writer appends it).
    pub fn encode(&self) -> FleetResult<String> {
        match self {
            ServerCommand::Set(config) => {
                let json = serde_json::to_string(config)?;
                Ok(format!("SET {json}"))
            }
            ServerCommand::Ping { rid } => Ok(format!("PING {rid}")),
            ServerCommand::ReadUid { rid } => Ok(format!("READUID {rid}")),
        }
    }
}
