/*! xPL message model and wire codec.

The canonical wire representation is line oriented ASCII, lines
terminated by `\n`:

```text
xpl-cmnd
{
hop=1
source=acme-cm12.srv
target=*
}
x10.basic
{
command=on
device=a1
}
```

Encoding always emits exactly this grammar. Decoding is a pull state
machine that accepts the buffer progressively and may be re-entered on
the next chunk, so a frame arriving in pieces (ZigBee serial reads)
decodes the same as one arriving whole (a UDP datagram).
*/
use std::fmt;
use std::str::FromStr;

use log::debug;

use crate::id::{Id, Schema};
use crate::{Error, Result};

/// Highest legal hop count on the wire.
pub const HOP_MAX: u8 = 9;

/// Maximum length of a name in a body name/value pair.
pub const PAIR_NAME_MAX: usize = 16;

/// The three xPL message types.
///
/// Filters additionally know a wildcard "any" type; that is spelled
/// `Option<MessageType>` there, it never appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// `xpl-cmnd`: ask a device to do something.
    Command,
    /// `xpl-stat`: spontaneous state report.
    Status,
    /// `xpl-trig`: state change notification.
    Trigger,
}

impl MessageType {
    /// Wire spelling, without the `xpl-` prefix.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Command => "cmnd",
            MessageType::Status => "stat",
            MessageType::Trigger => "trig",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cmnd" => Ok(MessageType::Command),
            "stat" => Ok(MessageType::Status),
            "trig" => Ok(MessageType::Trigger),
            _ => Err(Error::BadArgument(format!("unknown message type {s:?}"))),
        }
    }
}

/// One name/value pair of a message body.
///
/// Order of insertion is significant and duplicates are allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    /// Pair name. At most [`PAIR_NAME_MAX`] bytes when sent.
    pub name: String,
    /// Pair value. Unbounded text, may be empty.
    pub value: String,
}

impl Pair {
    /// Split a `name=value` line. Returns `None` when there is no `=`.
    #[must_use]
    pub fn from_line(line: &str) -> Option<Pair> {
        let (name, value) = line.split_once('=')?;
        Some(Pair {
            name: name.to_owned(),
            value: value.to_owned(),
        })
    }
}

/// An xPL frame in memory.
#[derive(Debug, Clone)]
pub struct Message {
    typ: MessageType,
    hop: u8,
    source: Id,
    /// `None` means broadcast; the wire target is `*`.
    target: Option<Id>,
    schema: Schema,
    body: Vec<Pair>,
    received: bool,
}

impl Message {
    /// Create a broadcast message with an empty body.
    #[must_use]
    pub fn broadcast(typ: MessageType, source: Id, schema: Schema) -> Self {
        Self {
            typ,
            hop: 1,
            source,
            target: None,
            schema,
            body: Vec::new(),
            received: false,
        }
    }

    /// Create a targeted message with an empty body.
    #[must_use]
    pub fn targeted(typ: MessageType, source: Id, target: Id, schema: Schema) -> Self {
        Self {
            target: Some(target),
            ..Self::broadcast(typ, source, schema)
        }
    }

    /// Message type.
    #[must_use]
    pub fn typ(&self) -> MessageType {
        self.typ
    }

    /// Hop count, in `[1, 9]`.
    #[must_use]
    pub fn hop(&self) -> u8 {
        self.hop
    }

    /// Increment the hop count. Only forwarders (bridges) do this;
    /// the sender and the hub never touch it. Saturates at
    /// [`HOP_MAX`] so the frame stays encodable.
    pub fn hop_inc(&mut self) {
        if self.hop < HOP_MAX {
            self.hop += 1;
        }
    }

    /// Source id.
    #[must_use]
    pub fn source(&self) -> &Id {
        &self.source
    }

    /// Overwrite the source id. Devices stamp outgoing messages with
    /// their own id before sending.
    pub fn set_source(&mut self, source: Id) {
        self.source = source;
    }

    /// Target id, `None` for broadcast.
    #[must_use]
    pub fn target(&self) -> Option<&Id> {
        self.target.as_ref()
    }

    /// True when the message is a broadcast.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.target.is_none()
    }

    /// True when the target is the reserved group id
    /// `xpl-group.<name>`.
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.target.as_ref().is_some_and(Id::is_group)
    }

    /// Group name for group-addressed messages.
    #[must_use]
    pub fn group_name(&self) -> Option<&str> {
        match &self.target {
            Some(t) if t.is_group() => Some(t.instance()),
            _ => None,
        }
    }

    /// Schema of the body.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// True when the message came off the wire rather than being
    /// built locally.
    #[must_use]
    pub fn is_received(&self) -> bool {
        self.received
    }

    /// Ordered body.
    #[must_use]
    pub fn body(&self) -> &[Pair] {
        &self.body
    }

    /// Append a name/value pair. The name length bound is enforced
    /// here, on the sending side; received frames are taken as-is.
    pub fn add_pair(&mut self, name: &str, value: &str) -> Result<()> {
        if name.is_empty() || name.len() > PAIR_NAME_MAX {
            return Err(Error::BadArgument(format!(
                "pair name must be 1..={PAIR_NAME_MAX} bytes, got {name:?}"
            )));
        }
        self.body.push(Pair {
            name: name.to_owned(),
            value: value.to_owned(),
        });
        Ok(())
    }

    /// Update the first pair with this name (ignoring case), or
    /// append a new one.
    pub fn set_value(&mut self, name: &str, value: &str) -> Result<()> {
        match self
            .body
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
        {
            Some(i) => {
                self.body[i].value = value.to_owned();
                Ok(())
            }
            None => self.add_pair(name, value),
        }
    }

    /// Value of the first pair with this name, ignoring case.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.body
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.value.as_str())
    }

    /// True if a pair with this name exists.
    #[must_use]
    pub fn has_pair(&self, name: &str) -> bool {
        self.value(name).is_some()
    }

    /// Remove every body pair.
    pub fn clear_body(&mut self) {
        self.body.clear();
    }

    /// Serialize to the wire form. The output follows the grammar in
    /// the module doc exactly: every line `\n` terminated, names in
    /// insertion order, target written as `*` for broadcasts.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(128 + self.body.len() * 16);
        out.push_str(&format!("xpl-{}\n{{\nhop={}\n", self.typ, self.hop));
        out.push_str(&format!("source={}\n", self.source));
        match &self.target {
            None => out.push_str("target=*\n"),
            Some(t) => out.push_str(&format!("target={t}\n")),
        }
        out.push_str(&format!("}}\n{}\n{{\n", self.schema));
        for p in &self.body {
            out.push_str(&format!("{}={}\n", p.name, p.value));
        }
        out.push_str("}\n");
        out
    }
}

/// Structural equality: type, hop, addressing, schema, and the
/// ordered body. The reception bookkeeping flag is deliberately
/// excluded so a decoded frame compares equal to the message that
/// produced it.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.typ == other.typ
            && self.hop == other.hop
            && self.source == other.source
            && self.target == other.target
            && self.schema == other.schema
            && self.body == other.body
    }
}
impl Eq for Message {}

impl FromStr for Message {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut d = Decoder::new();
        d.feed(s);
        d.take()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Header,
    HeaderHop,
    HeaderSource,
    HeaderTarget,
    HeaderEnd,
    Schema,
    BodyBegin,
    Body,
    BodyEnd,
    End,
    Error,
}

/// Pull decoder for xPL frames.
///
/// Feed it text as it arrives; [`Decoder::take`] yields the message
/// once the closing brace of the body has been seen, and an error for
/// anything malformed or truncated. A single decoder is reusable:
/// `take` resets it.
#[derive(Debug)]
pub struct Decoder {
    state: State,
    buf: String,
    error: Option<String>,
    typ: Option<MessageType>,
    hop: u8,
    source: Option<Id>,
    target: Option<Id>,
    body: Vec<Pair>,
    schema: Option<Schema>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// Create a fresh decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Init,
            buf: String::new(),
            error: None,
            typ: None,
            hop: 0,
            source: None,
            target: None,
            body: Vec::new(),
            schema: None,
        }
    }

    /// Accept the next chunk of input. Incomplete trailing lines are
    /// kept for the next call.
    pub fn feed(&mut self, chunk: &str) {
        self.buf.push_str(chunk);
        loop {
            if matches!(self.state, State::End | State::Error) {
                if !self.buf.is_empty() {
                    debug!("Decoder: ignoring {} trailing bytes", self.buf.len());
                    self.buf.clear();
                }
                return;
            }
            let Some(nl) = self.buf.find('\n') else {
                return;
            };
            let line = self.buf[..nl].to_owned();
            self.buf.drain(..=nl);
            self.line(&line);
        }
    }

    /// True once a complete, well formed frame has been read.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state == State::End
    }

    /// True once malformed input has been seen.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.state == State::Error
    }

    /// Finish the decode: the message on success, an error for
    /// malformed or truncated input. Either way the decoder is reset
    /// and ready for the next frame.
    pub fn take(&mut self) -> Result<Message> {
        let mut d = std::mem::take(self);
        if d.state != State::End {
            let why = d
                .error
                .unwrap_or_else(|| format!("truncated frame (decoder in {:?})", d.state));
            return Err(Error::MalformedMessage(why));
        }
        // All fields are guaranteed present in the End state.
        Ok(Message {
            typ: d.typ.take().unwrap(),
            hop: d.hop,
            source: d.source.take().unwrap(),
            target: d.target.take(),
            schema: d.schema.take().unwrap(),
            body: std::mem::take(&mut d.body),
            received: true,
        })
    }

    fn fail(&mut self, why: String) {
        debug!("Decoder: {why}");
        self.error = Some(why);
        self.state = State::Error;
    }

    fn header_pair(&mut self, line: &str, want: &str) -> Option<String> {
        match Pair::from_line(line) {
            Some(p) if p.name == want => Some(p.value),
            Some(p) => {
                self.fail(format!("expected {want}=, got {:?}=", p.name));
                None
            }
            None => {
                self.fail(format!("expected {want}=, got line {line:?}"));
                None
            }
        }
    }

    fn line(&mut self, line: &str) {
        match self.state {
            State::Init => {
                let typ = line.strip_prefix("xpl-").and_then(|t| t.parse().ok());
                match typ {
                    Some(t) if line.len() == 8 => {
                        self.typ = Some(t);
                        self.state = State::Header;
                    }
                    _ => self.fail(format!("unknown message header {line:?}")),
                }
            }
            State::Header => {
                if line == "{" {
                    self.state = State::HeaderHop;
                } else {
                    self.fail(format!("expected '{{' before header, got {line:?}"));
                }
            }
            State::HeaderHop => {
                if let Some(v) = self.header_pair(line, "hop") {
                    match v.parse::<u8>() {
                        Ok(h) if (1..=HOP_MAX).contains(&h) => {
                            self.hop = h;
                            self.state = State::HeaderSource;
                        }
                        _ => self.fail(format!("invalid hop count {v:?}")),
                    }
                }
            }
            State::HeaderSource => {
                if let Some(v) = self.header_pair(line, "source") {
                    match v.parse() {
                        Ok(id) => {
                            self.source = Some(id);
                            self.state = State::HeaderTarget;
                        }
                        Err(_) => self.fail(format!("invalid source {v:?}")),
                    }
                }
            }
            State::HeaderTarget => {
                if let Some(v) = self.header_pair(line, "target") {
                    if v == "*" {
                        // Broadcast: the target stays empty.
                        self.state = State::HeaderEnd;
                    } else {
                        match v.parse() {
                            Ok(id) => {
                                self.target = Some(id);
                                self.state = State::HeaderEnd;
                            }
                            Err(_) => self.fail(format!("invalid target {v:?}")),
                        }
                    }
                }
            }
            State::HeaderEnd => {
                if line == "}" {
                    self.state = State::Schema;
                } else {
                    self.fail(format!("expected '}}' after header, got {line:?}"));
                }
            }
            State::Schema => match line.parse() {
                Ok(s) => {
                    self.schema = Some(s);
                    self.state = State::BodyBegin;
                }
                Err(_) => self.fail(format!("invalid schema {line:?}")),
            },
            State::BodyBegin => {
                if line == "{" {
                    self.state = State::Body;
                } else {
                    self.fail(format!("expected '{{' before body, got {line:?}"));
                }
            }
            State::Body => {
                // A line with no '=' ends the pair list; it had
                // better be the closing brace.
                match Pair::from_line(line) {
                    Some(p) => self.body.push(p),
                    None => {
                        self.state = State::BodyEnd;
                        self.line(line);
                    }
                }
            }
            State::BodyEnd => {
                if line == "}" {
                    self.state = State::End;
                } else {
                    self.fail(format!("expected '}}' after body, got {line:?}"));
                }
            }
            State::End | State::Error => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        let mut m = Message::broadcast(
            MessageType::Status,
            "acme-cm12.srv".parse().unwrap(),
            "hbeat.app".parse().unwrap(),
        );
        m.add_pair("interval", "5").unwrap();
        m.add_pair("port", "54321").unwrap();
        m.add_pair("remote-ip", "192.0.2.7").unwrap();
        m
    }

    #[test]
    fn encode_exact() {
        let want = "xpl-stat\n\
                    {\n\
                    hop=1\n\
                    source=acme-cm12.srv\n\
                    target=*\n\
                    }\n\
                    hbeat.app\n\
                    {\n\
                    interval=5\n\
                    port=54321\n\
                    remote-ip=192.0.2.7\n\
                    }\n";
        assert_eq!(sample().encode(), want);
    }

    #[test]
    fn decode_encode_round_trip() -> crate::Result<()> {
        let m = sample();
        let back: Message = m.encode().parse()?;
        assert_eq!(back, m);
        assert!(back.is_received());
        Ok(())
    }

    #[test]
    fn targeted_round_trip() -> crate::Result<()> {
        let mut m = Message::targeted(
            MessageType::Command,
            "acme-cm12.srv".parse()?,
            "other-dev.lamp".parse()?,
            "x10.basic".parse()?,
        );
        m.add_pair("command", "on")?;
        let back: Message = m.encode().parse()?;
        assert_eq!(back, m);
        assert!(!back.is_broadcast());
        assert_eq!(back.target().unwrap().to_string(), "other-dev.lamp");
        Ok(())
    }

    #[test]
    fn chunked_feed() -> crate::Result<()> {
        let text = sample().encode();
        let mut d = Decoder::new();
        for c in text.chars() {
            d.feed(&c.to_string());
        }
        assert!(d.is_valid());
        assert_eq!(d.take()?, sample());
        Ok(())
    }

    #[test]
    fn decoder_is_reusable() -> crate::Result<()> {
        let mut d = Decoder::new();
        d.feed(&sample().encode());
        d.take()?;
        d.feed(&sample().encode());
        assert_eq!(d.take()?, sample());
        Ok(())
    }

    #[test]
    fn duplicate_names_preserved() -> crate::Result<()> {
        let mut m = Message::broadcast(
            MessageType::Status,
            "acme-cfg.a".parse()?,
            "config.list".parse()?,
        );
        m.add_pair("reconf", "newconf")?;
        m.add_pair("reconf", "interval")?;
        m.add_pair("option", "group[4]")?;
        let back: Message = m.encode().parse()?;
        let names: Vec<&str> = back.body().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["reconf", "reconf", "option"]);
        assert_eq!(back.value("reconf"), Some("newconf"));
        Ok(())
    }

    #[test]
    fn hop_bounds() {
        for hop in ["0", "10", "x", ""] {
            let text = format!(
                "xpl-cmnd\n{{\nhop={hop}\nsource=a-b.c\ntarget=*\n}}\nx.y\n{{\n}}\n"
            );
            assert!(
                text.parse::<Message>().is_err(),
                "hop {hop:?} should be rejected"
            );
        }
        for hop in 1..=9 {
            let text = format!(
                "xpl-cmnd\n{{\nhop={hop}\nsource=a-b.c\ntarget=*\n}}\nx.y\n{{\n}}\n"
            );
            assert_eq!(text.parse::<Message>().unwrap().hop(), hop);
        }
    }

    #[test]
    fn hop_inc_saturates() {
        let mut m = sample();
        for _ in 0..20 {
            m.hop_inc();
        }
        assert_eq!(m.hop(), HOP_MAX);
    }

    #[test]
    fn malformed_frames() {
        for text in [
            // Not xPL at all.
            "GET / HTTP/1.0\n\n",
            // Bad type.
            "xpl-zzzz\n{\nhop=1\nsource=a-b.c\ntarget=*\n}\nx.y\n{\n}\n",
            // Source before hop.
            "xpl-cmnd\n{\nsource=a-b.c\nhop=1\ntarget=*\n}\nx.y\n{\n}\n",
            // Bad source id.
            "xpl-cmnd\n{\nhop=1\nsource=nodash\ntarget=*\n}\nx.y\n{\n}\n",
            // Bad target id.
            "xpl-cmnd\n{\nhop=1\nsource=a-b.c\ntarget=nodash\n}\nx.y\n{\n}\n",
            // Schema missing the dot.
            "xpl-cmnd\n{\nhop=1\nsource=a-b.c\ntarget=*\n}\nxy\n{\n}\n",
            // Missing body closing brace.
            "xpl-cmnd\n{\nhop=1\nsource=a-b.c\ntarget=*\n}\nx.y\n{\na=b\n",
            // Garbage instead of the body close.
            "xpl-cmnd\n{\nhop=1\nsource=a-b.c\ntarget=*\n}\nx.y\n{\na=b\n!\n",
        ] {
            assert!(
                text.parse::<Message>().is_err(),
                "should not decode: {text:?}"
            );
        }
    }

    #[test]
    fn empty_value_and_empty_body() -> crate::Result<()> {
        let m: Message =
            "xpl-trig\n{\nhop=2\nsource=a-b.c\ntarget=*\n}\nsensor.basic\n{\ncurrent=\n}\n"
                .parse()?;
        assert_eq!(m.value("current"), Some(""));

        let m: Message = "xpl-trig\n{\nhop=2\nsource=a-b.c\ntarget=*\n}\nsensor.basic\n{\n}\n"
            .parse()?;
        assert!(m.body().is_empty());
        Ok(())
    }

    #[test]
    fn trailing_bytes_ignored() -> crate::Result<()> {
        let mut d = Decoder::new();
        d.feed(&sample().encode());
        d.feed("garbage after the frame\n");
        assert!(d.is_valid());
        d.take()?;
        Ok(())
    }

    #[test]
    fn value_lookup_ignores_case() -> crate::Result<()> {
        let mut m = sample();
        assert_eq!(m.value("Remote-IP"), Some("192.0.2.7"));
        m.set_value("INTERVAL", "7")?;
        assert_eq!(m.value("interval"), Some("7"));
        // set_value updated in place, no duplicate appended.
        assert_eq!(m.body().len(), 3);
        Ok(())
    }

    #[test]
    fn group_target_detected() -> crate::Result<()> {
        let m: Message =
            "xpl-cmnd\n{\nhop=1\nsource=a-b.c\ntarget=xpl-group.lights\n}\nx10.basic\n{\n}\n"
                .parse()?;
        assert!(m.is_group());
        assert_eq!(m.group_name(), Some("lights"));
        Ok(())
    }

    #[test]
    fn outbound_pair_name_bounded() {
        let mut m = sample();
        assert!(m.add_pair("a-name-that-is-too-long", "v").is_err());
        assert!(m.add_pair("sixteen-chars-ok", "v").is_ok());
    }
}
