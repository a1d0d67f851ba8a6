/*! Remote device configuration.

A configurable device announces `config.app` heartbeats until someone
configures it, answers `config.list` / `config.current` requests with
its configurable items and their values, and applies `config.response`
bodies: first the item declarations, then the values (instance
change, heartbeat interval, groups, filters, and user defined items).

Applied configuration is persisted to a one-device-per-file text
format so a restarted tool comes back configured:

```text
[acme-sensor]
reconf=newconf
reconf=interval
option=group[4]
option=filter[4]
newconf=kitchen
interval=10
group=xpl-group.lights
filter=
```
*/
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::device::{Device, LinkInfo};
use crate::io::Transport;
use crate::message::{Message, MessageType, Pair};
use crate::{Error, Result};

/// How a configurable item is presented to managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// `option=`: may be set, may be left alone.
    Optional,
    /// `config=`: must be set before the device is usable.
    Mandatory,
    /// `reconf=`: may be changed again after configuration.
    Reconf,
}

impl ItemKind {
    fn keyword(self) -> &'static str {
        match self {
            ItemKind::Optional => "option",
            ItemKind::Mandatory => "config",
            ItemKind::Reconf => "reconf",
        }
    }

    fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "option" => Some(ItemKind::Optional),
            "config" => Some(ItemKind::Mandatory),
            "reconf" => Some(ItemKind::Reconf),
            _ => None,
        }
    }
}

/// One user defined configurable item.
#[derive(Debug, Clone)]
pub struct ConfigItem {
    /// Item name, the body pair name used to set it.
    pub name: String,
    /// Presentation kind.
    pub kind: ItemKind,
    /// How many values the item accepts.
    pub values_max: usize,
    /// Current values, at most `values_max`.
    pub values: Vec<String>,
}

impl ConfigItem {
    /// The `name[max]` form used in `config.list` bodies and saved
    /// files; a single-valued item is just `name`.
    fn declaration(&self) -> String {
        if self.values_max > 1 {
            format!("{}[{}]", self.name, self.values_max)
        } else {
            self.name.clone()
        }
    }

    /// Parse the `name[max]` form.
    fn parse_declaration(s: &str) -> (String, usize) {
        if let Some((name, rest)) = s.split_once('[')
            && let Some(max) = rest.strip_suffix(']').and_then(|m| m.parse().ok())
        {
            return (name.to_owned(), max);
        }
        (s.to_owned(), 1)
    }
}

/// The configuration block of a configurable device.
#[derive(Default)]
pub struct DeviceConfig {
    pub(crate) items: Vec<ConfigItem>,
    pub(crate) filename: Option<PathBuf>,
    pub(crate) configured: bool,
    listeners: Vec<Box<dyn FnMut(&Device)>>,
}

impl std::fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("items", &self.items)
            .field("filename", &self.filename)
            .field("configured", &self.configured)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Device {
    /// Turn the device into a configurable one. The optional file is
    /// where applied configuration is persisted; load it separately
    /// with [`load_config`].
    pub fn make_configurable(&mut self, filename: Option<PathBuf>) {
        if self.config.is_none() {
            self.config = Some(DeviceConfig {
                filename,
                ..DeviceConfig::default()
            });
        }
    }

    fn config_ref(&self) -> Result<&DeviceConfig> {
        self.config.as_ref().ok_or(Error::NotConfigured)
    }

    fn config_mut(&mut self) -> Result<&mut DeviceConfig> {
        self.config.as_mut().ok_or(Error::NotConfigured)
    }

    /// Declare a configurable item.
    pub fn add_configurable(&mut self, name: &str, kind: ItemKind, values_max: usize) -> Result<()> {
        let config = self.config_mut()?;
        if config.items.iter().any(|i| i.name == name) {
            return Err(Error::BadArgument(format!("item {name:?} already exists")));
        }
        config.items.push(ConfigItem {
            name: name.to_owned(),
            kind,
            values_max: values_max.max(1),
            values: Vec::new(),
        });
        Ok(())
    }

    /// First value of an item.
    #[must_use]
    pub fn config_value(&self, name: &str) -> Option<&str> {
        self.config
            .as_ref()?
            .items
            .iter()
            .find(|i| i.name == name)?
            .values
            .first()
            .map(String::as_str)
    }

    /// All values of an item.
    #[must_use]
    pub fn config_values(&self, name: &str) -> Option<&[String]> {
        self.config
            .as_ref()?
            .items
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.values.as_slice())
    }

    /// Append a value to an item, bounded by its `values_max`.
    pub fn add_config_value(&mut self, name: &str, value: &str) -> Result<()> {
        let item = self
            .config_mut()?
            .items
            .iter_mut()
            .find(|i| i.name == name)
            .ok_or_else(|| Error::BadArgument(format!("no item {name:?}")))?;
        if item.values.len() >= item.values_max {
            return Err(Error::CapacityExceeded(format!(
                "item {name:?} takes at most {} values",
                item.values_max
            )));
        }
        debug!("config value {name}={value}");
        item.values.push(value.to_owned());
        Ok(())
    }

    /// Run when the device has been reconfigured remotely.
    pub fn add_config_listener(&mut self, f: impl FnMut(&Device) + 'static) -> Result<()> {
        self.config_mut()?.listeners.push(Box::new(f));
        Ok(())
    }

    /// The persistence file, if any.
    #[must_use]
    pub fn config_filename(&self) -> Option<&Path> {
        self.config.as_ref()?.filename.as_deref()
    }
}

/// Answer `config.list`: every configurable, standard ones first.
fn send_config_list(device: &Device, io: &mut dyn Transport) -> Result<()> {
    let mut m = Message::broadcast(
        MessageType::Status,
        device.id().clone(),
        "config.list".parse()?,
    );
    m.add_pair("reconf", "newconf")?;
    m.add_pair("reconf", "interval")?;
    m.add_pair("option", &format!("group[{}]", device.group_capacity()))?;
    m.add_pair("option", &format!("filter[{}]", device.filter_capacity()))?;
    for item in &device.config_ref()?.items {
        m.add_pair(item.kind.keyword(), &item.declaration())?;
    }
    io.send(m.encode().as_bytes(), None)?;
    Ok(())
}

/// Answer `config.current`: every current value.
fn send_config_current(device: &Device, io: &mut dyn Transport) -> Result<()> {
    let mut m = Message::broadcast(
        MessageType::Status,
        device.id().clone(),
        "config.current".parse()?,
    );
    m.add_pair("newconf", device.id().instance())?;
    m.add_pair("interval", &(device.heartbeat_interval() / 60).to_string())?;
    if device.groups().is_empty() {
        m.add_pair("group", "")?;
    } else {
        for g in device.groups() {
            m.add_pair("group", &format!("xpl-group.{g}"))?;
        }
    }
    if device.filters().is_empty() {
        m.add_pair("filter", "")?;
    } else {
        for f in device.filters() {
            m.add_pair("filter", &f.to_string())?;
        }
    }
    for item in &device.config_ref()?.items {
        for v in &item.values {
            m.add_pair(&item.name, v)?;
        }
    }
    io.send(m.encode().as_bytes(), None)?;
    Ok(())
}

/// First pass over a `config.response` (or loaded file) body:
/// re-register the declared items. Returns the index of the first
/// pair after the declarations.
fn register_items(device: &mut Device, pairs: &[Pair]) -> Result<usize> {
    device.config_mut()?.items.clear();
    for (i, pair) in pairs.iter().enumerate() {
        let Some(kind) = ItemKind::from_keyword(&pair.name) else {
            return Ok(i);
        };
        // The standard configurables are implicit, not items.
        let v = pair.value.as_str();
        if v == "newconf" || v == "interval" || v.starts_with("group") || v.starts_with("filter") {
            continue;
        }
        let (name, max) = ConfigItem::parse_declaration(v);
        device.config_mut()?.items.push(ConfigItem {
            name,
            kind,
            values_max: max.max(1),
            values: Vec::new(),
        });
    }
    Ok(pairs.len())
}

/// Second pass: apply the values. Instance and interval changes only
/// take effect through a disable/enable cycle, which also emits the
/// proper goodbye and hello heartbeats.
fn apply_values(
    device: &mut Device,
    pairs: &[Pair],
    from: usize,
    io: &mut dyn Transport,
    info: &LinkInfo,
    now_ms: u64,
) -> Result<()> {
    let mut new_instance: Option<String> = None;
    let mut new_interval: Option<u32> = None;

    for pair in &pairs[from..] {
        match pair.name.as_str() {
            "newconf" => {
                if pair.value != device.id().instance() {
                    debug!("new instance id {}", pair.value);
                    new_instance = Some(pair.value.clone());
                }
            }
            "interval" => match pair.value.parse::<u32>() {
                Ok(min) if min * 60 != device.heartbeat_interval() => {
                    debug!("new heartbeat interval {} minutes", min);
                    new_interval = Some(min * 60);
                }
                Ok(_) => {}
                Err(_) => warn!("bad interval value {:?} ignored", pair.value),
            },
            "group" => {
                if let Err(e) = device.add_group_from_string(&pair.value) {
                    warn!("group {:?} rejected: {e}", pair.value);
                }
            }
            "filter" => {
                if let Err(e) = device.add_filter_from_string(&pair.value) {
                    warn!("filter {:?} rejected: {e}", pair.value);
                }
            }
            name => {
                // Anything else had better be a declared item.
                if let Err(e) = device.add_config_value(name, &pair.value) {
                    warn!("config value {name:?} rejected: {e}");
                }
            }
        }
    }

    let restart = new_instance.is_some() || new_interval.is_some();
    let was_enabled = device.enabled();
    if was_enabled && restart {
        device.set_enabled(false, io, info, now_ms);
    }
    if let Some(instance) = new_instance {
        if let Err(e) = device.set_instance(&instance) {
            warn!("instance id {instance:?} rejected: {e}");
        }
    }
    if let Some(interval) = new_interval {
        device.set_heartbeat_interval(interval);
    }
    device.config_mut()?.configured = true;
    if let Err(e) = save_config(device) {
        warn!("could not persist configuration: {e}");
    }
    if was_enabled && restart {
        device.set_enabled(true, io, info, now_ms);
    }

    // Fire the config-changed listeners.
    let mut listeners = std::mem::take(&mut device.config_mut()?.listeners);
    for l in &mut listeners {
        l(device);
    }
    device.config_mut()?.listeners = listeners;
    Ok(())
}

/// Dispatch one `config` class message to a configurable device.
/// Addressing has already been checked by the device.
pub(crate) fn handle_config_message(
    device: &mut Device,
    msg: &Message,
    io: &mut dyn Transport,
    info: &LinkInfo,
    now_ms: u64,
) -> Result<()> {
    if msg.typ() != MessageType::Command {
        return Ok(());
    }
    let typ = msg.schema().typ();
    if typ.eq_ignore_ascii_case("response") {
        device.clear_config_state()?;
        let body: Vec<Pair> = msg.body().to_vec();
        let from = register_items(device, &body)?;
        apply_values(device, &body, from, io, info, now_ms)?;
    } else if msg.value("command").is_some_and(|c| c.eq_ignore_ascii_case("request")) {
        if typ.eq_ignore_ascii_case("list") {
            send_config_list(device, io)?;
        } else if typ.eq_ignore_ascii_case("current") {
            send_config_current(device, io)?;
        }
    }
    Ok(())
}

impl Device {
    /// Drop item values, filters, and groups ahead of applying a
    /// fresh configuration.
    fn clear_config_state(&mut self) -> Result<()> {
        for item in &mut self.config_mut()?.items {
            item.values.clear();
        }
        self.clear_filters();
        self.clear_groups();
        Ok(())
    }
}

/// Write the device's configuration to its file. A device without a
/// file is simply not persisted.
pub fn save_config(device: &Device) -> Result<()> {
    let config = device.config_ref()?;
    let Some(path) = &config.filename else {
        return Ok(());
    };
    let mut f = std::fs::File::create(path)?;
    write!(f, "[{}-{}]\n", device.id().vendor(), device.id().device())?;
    write!(f, "reconf=newconf\nreconf=interval\n")?;
    write!(f, "option=group[{}]\n", device.group_capacity())?;
    write!(f, "option=filter[{}]\n", device.filter_capacity())?;
    for item in &config.items {
        write!(f, "{}={}\n", item.kind.keyword(), item.declaration())?;
    }
    write!(f, "newconf={}\n", device.id().instance())?;
    write!(f, "interval={}\n", device.heartbeat_interval() / 60)?;
    if device.groups().is_empty() {
        write!(f, "group=\n")?;
    } else {
        for g in device.groups() {
            write!(f, "group=xpl-group.{g}\n")?;
        }
    }
    if device.filters().is_empty() {
        write!(f, "filter=\n")?;
    } else {
        for flt in device.filters() {
            write!(f, "filter={flt}\n")?;
        }
    }
    for item in &config.items {
        for v in &item.values {
            write!(f, "{}={}\n", item.name, v)?;
        }
    }
    f.flush()?;
    info!("configuration saved to {}", path.display());
    Ok(())
}

/// Read a configuration file back into its pair list. When an
/// expected `(vendor, device)` is given the `[vendor-device]` header
/// must match it (ignoring case). Unknown keys are kept; the reader
/// is permissive by design.
pub fn read_config_file(path: &Path, expect: Option<(&str, &str)>) -> Result<Vec<Pair>> {
    let f = std::fs::File::open(path)?;
    let mut lines = std::io::BufReader::new(f).lines();
    let header = lines
        .next()
        .transpose()?
        .ok_or_else(|| Error::BadArgument(format!("{}: empty file", path.display())))?;
    let inner = header
        .trim()
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .ok_or_else(|| Error::BadArgument(format!("{}: bad file header", path.display())))?;
    let (vendor, device) = inner
        .split_once('-')
        .ok_or_else(|| Error::BadArgument(format!("{}: bad file header", path.display())))?;
    if let Some((v, d)) = expect
        && (!vendor.eq_ignore_ascii_case(v) || !device.eq_ignore_ascii_case(d))
    {
        return Err(Error::BadArgument(format!(
            "{}: file header [{inner}] does not match {v}-{d}",
            path.display()
        )));
    }
    let mut pairs = Vec::new();
    for line in lines {
        let line = line?;
        match Pair::from_line(line.trim_end()) {
            Some(p) => pairs.push(p),
            None if line.trim().is_empty() => {}
            None => debug!("{}: no '=' in line {line:?}", path.display()),
        }
    }
    Ok(pairs)
}

/// Load and apply the device's configuration file, if it has one and
/// the file exists.
pub fn load_config(
    device: &mut Device,
    io: &mut dyn Transport,
    info: &LinkInfo,
    now_ms: u64,
) -> Result<()> {
    let Some(path) = device.config_filename().map(Path::to_path_buf) else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }
    let pairs = read_config_file(&path, Some((device.id().vendor(), device.id().device())))?;
    if pairs.is_empty() {
        return Ok(());
    }
    let from = register_items(device, &pairs)?;
    apply_values(device, &pairs, from, io, info, now_ms)?;
    info!("configuration loaded from {}", path.display());
    Ok(())
}
