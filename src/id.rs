/*! xPL identifiers and schemas.

Every xPL participant is named by a vendor/device/instance triple, and
every message body shape by a class/type schema. All five components
are short bounded strings; length is the only enforced invariant, the
lower case alphanumeric convention is the sender's problem.
*/
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Maximum length of a vendor id.
pub const VENDOR_MAX: usize = 8;
/// Maximum length of a device id.
pub const DEVICE_MAX: usize = 8;
/// Maximum length of an instance id.
pub const INSTANCE_MAX: usize = 16;
/// Maximum length of a schema class.
pub const CLASS_MAX: usize = 8;
/// Maximum length of a schema type.
pub const TYPE_MAX: usize = 8;

fn checked(what: &str, max: usize, s: &str) -> Result<String> {
    if s.is_empty() || s.len() > max {
        return Err(Error::BadArgument(format!(
            "{what} must be 1..={max} bytes, got {:?}",
            s
        )));
    }
    Ok(s.to_owned())
}

/// The three part identifier of an xPL participant.
///
/// Textual form is `vendor-device.instance`, e.g. `acme-cm12.srv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Id {
    vendor: String,
    device: String,
    instance: String,
}

impl Id {
    /// Create an id, enforcing the component length bounds.
    pub fn new(vendor: &str, device: &str, instance: &str) -> Result<Self> {
        Ok(Self {
            vendor: checked("vendor id", VENDOR_MAX, vendor)?,
            device: checked("device id", DEVICE_MAX, device)?,
            instance: checked("instance id", INSTANCE_MAX, instance)?,
        })
    }

    /// Vendor component.
    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Device component.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Instance component.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Replace the instance component.
    pub fn set_instance(&mut self, instance: &str) -> Result<()> {
        self.instance = checked("instance id", INSTANCE_MAX, instance)?;
        Ok(())
    }

    /// Compare two ids ignoring ASCII case.
    ///
    /// On the wire ids are lower case by convention, but received
    /// frames are matched leniently.
    #[must_use]
    pub fn eq_ignore_case(&self, other: &Id) -> bool {
        self.vendor.eq_ignore_ascii_case(&other.vendor)
            && self.device.eq_ignore_ascii_case(&other.device)
            && self.instance.eq_ignore_ascii_case(&other.instance)
    }

    /// True for the reserved group target `xpl-group.<name>`.
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.vendor.eq_ignore_ascii_case("xpl") && self.device.eq_ignore_ascii_case("group")
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}.{}", self.vendor, self.device, self.instance)
    }
}

impl FromStr for Id {
    type Err = Error;

    // vendor-device.instance
    fn from_str(s: &str) -> Result<Self> {
        let (vendor, rest) = s
            .split_once('-')
            .ok_or_else(|| Error::BadArgument(format!("no '-' in id {s:?}")))?;
        let (device, instance) = rest
            .split_once('.')
            .ok_or_else(|| Error::BadArgument(format!("no '.' in id {s:?}")))?;
        Id::new(vendor, device, instance)
    }
}

/// An xPL schema: the `class.type` pair describing a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    class: String,
    typ: String,
}

impl Schema {
    /// Create a schema, enforcing the component length bounds.
    pub fn new(class: &str, typ: &str) -> Result<Self> {
        Ok(Self {
            class: checked("schema class", CLASS_MAX, class)?,
            typ: checked("schema type", TYPE_MAX, typ)?,
        })
    }

    /// Class component.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Type component.
    pub fn typ(&self) -> &str {
        &self.typ
    }

    /// Compare two schemas ignoring ASCII case.
    #[must_use]
    pub fn eq_ignore_case(&self, other: &Schema) -> bool {
        self.class.eq_ignore_ascii_case(&other.class) && self.typ.eq_ignore_ascii_case(&other.typ)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.typ)
    }
}

impl FromStr for Schema {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (class, typ) = s
            .split_once('.')
            .ok_or_else(|| Error::BadArgument(format!("no '.' in schema {s:?}")))?;
        Schema::new(class, typ)
    }
}
