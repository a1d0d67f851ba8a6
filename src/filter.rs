/*! Message filters.

A filter narrows the broadcasts a device is willing to see. Every
component may be a wildcard; a message passes when all non wildcard
components match, ignoring case.

Textual form is `msgtype.vendor.device.instance.class.type`, e.g.
`stat.acme.sensor.kitchen.sensor.basic`. A component spelled `*`,
`any`, or left empty is a wildcard.
*/
use std::fmt;
use std::str::FromStr;

use crate::message::{Message, MessageType};
use crate::{Error, Result};

fn wildcard(s: &str) -> Option<String> {
    if s.is_empty() || s == "*" || s.eq_ignore_ascii_case("any") {
        None
    } else {
        Some(s.to_owned())
    }
}

fn component(c: &Option<String>) -> &str {
    c.as_deref().unwrap_or("*")
}

fn matches(c: &Option<String>, got: &str) -> bool {
    match c {
        None => true,
        Some(want) => want.eq_ignore_ascii_case(got),
    }
}

/// One message filter. `None` components are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// Message type, or any.
    pub typ: Option<MessageType>,
    /// Source vendor id.
    pub vendor: Option<String>,
    /// Source device id.
    pub device: Option<String>,
    /// Source instance id.
    pub instance: Option<String>,
    /// Schema class.
    pub class: Option<String>,
    /// Schema type.
    pub schema_type: Option<String>,
}

impl Filter {
    /// True when every non wildcard component matches the message.
    #[must_use]
    pub fn matches(&self, msg: &Message) -> bool {
        if self.typ.is_some_and(|t| t != msg.typ()) {
            return false;
        }
        matches(&self.vendor, msg.source().vendor())
            && matches(&self.device, msg.source().device())
            && matches(&self.instance, msg.source().instance())
            && matches(&self.class, msg.schema().class())
            && matches(&self.schema_type, msg.schema().typ())
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}.{}",
            self.typ.map_or("*", |t| t.as_str()),
            component(&self.vendor),
            component(&self.device),
            component(&self.instance),
            component(&self.class),
            component(&self.schema_type),
        )
    }
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        let [typ, vendor, device, instance, class, schema_type] = parts[..] else {
            return Err(Error::BadArgument(format!(
                "filter needs 6 dot separated components, got {s:?}"
            )));
        };
        let typ = match wildcard(typ) {
            None => None,
            Some(t) => Some(t.parse()?),
        };
        Ok(Filter {
            typ,
            vendor: wildcard(vendor),
            device: wildcard(device),
            instance: wildcard(instance),
            class: wildcard(class),
            schema_type: wildcard(schema_type),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(typ: MessageType, source: &str, schema: &str) -> Message {
        Message::broadcast(typ, source.parse().unwrap(), schema.parse().unwrap())
    }

    #[test]
    fn all_wildcards_match_everything() -> Result<()> {
        let f: Filter = "*.*.*.*.*.*".parse()?;
        assert!(f.matches(&msg(MessageType::Command, "a-b.c", "x10.basic")));
        assert!(f.matches(&msg(MessageType::Trigger, "x-y.z", "sensor.basic")));
        Ok(())
    }

    #[test]
    fn single_axis_mismatch_rejects() -> Result<()> {
        let f: Filter = "stat.acme.sensor.kitchen.sensor.basic".parse()?;
        let hit = msg(MessageType::Status, "acme-sensor.kitchen", "sensor.basic");
        assert!(f.matches(&hit));
        for miss in [
            msg(MessageType::Command, "acme-sensor.kitchen", "sensor.basic"),
            msg(MessageType::Status, "evil-sensor.kitchen", "sensor.basic"),
            msg(MessageType::Status, "acme-switch.kitchen", "sensor.basic"),
            msg(MessageType::Status, "acme-sensor.garage", "sensor.basic"),
            msg(MessageType::Status, "acme-sensor.kitchen", "x10.basic"),
            msg(MessageType::Status, "acme-sensor.kitchen", "sensor.request"),
        ] {
            assert!(!f.matches(&miss), "{miss:?} should not match");
        }
        Ok(())
    }

    #[test]
    fn partial_wildcards() -> Result<()> {
        let f: Filter = "stat.acme.*.*.sensor.basic".parse()?;
        assert!(f.matches(&msg(MessageType::Status, "acme-anydev.anyinst", "sensor.basic")));
        assert!(!f.matches(&msg(MessageType::Command, "acme-anydev.anyinst", "x10.basic")));
        Ok(())
    }

    #[test]
    fn case_insensitive_match() -> Result<()> {
        let f: Filter = "stat.ACME.sensor.Kitchen.sensor.basic".parse()?;
        assert!(f.matches(&msg(MessageType::Status, "acme-SENSOR.kitchen", "SENSOR.BASIC")));
        Ok(())
    }

    #[test]
    fn text_round_trip() -> Result<()> {
        for s in [
            "stat.acme.sensor.kitchen.sensor.basic",
            "*.*.*.*.*.*",
            "cmnd.*.*.*.x10.*",
        ] {
            let f: Filter = s.parse()?;
            assert_eq!(f.to_string(), s);
        }
        // "any" and empty components normalize to "*".
        let f: Filter = "any.acme...sensor.".parse()?;
        assert_eq!(f.to_string(), "*.acme.*.*.sensor.*");
        Ok(())
    }

    #[test]
    fn bad_forms() {
        assert!("stat.acme.sensor".parse::<Filter>().is_err());
        assert!("bogus.a.b.c.d.e".parse::<Filter>().is_err());
    }
}
