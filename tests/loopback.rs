//! End to end scenarios over the in-memory loopback transport.

use rustxpl::app::Application;
use rustxpl::config::ItemKind;
use rustxpl::io::{ConnectType, Setting, Transport, TransportRegistry};
use rustxpl::loopback::LoopbackTransport;
use rustxpl::message::{Message, MessageType};
use rustxpl::platform::SystemPlatform;
use rustxpl::Result;

fn echo_app() -> Result<Application> {
    let registry = TransportRegistry::with_defaults();
    let setting = Setting::new("loopback", ConnectType::Standalone);
    Application::open(&registry, setting)
}

fn paired_app() -> Result<(Application, LoopbackTransport)> {
    let (app_side, wire) = LoopbackTransport::pair();
    let setting = Setting::new("loopback", ConnectType::Standalone);
    let app = Application::with_transport(
        Box::new(app_side),
        setting,
        Box::new(SystemPlatform::new()),
    )?;
    Ok((app, wire))
}

fn inject(wire: &mut LoopbackTransport, msg: &Message) {
    wire.send(msg.encode().as_bytes(), None).unwrap();
}

fn drain(wire: &mut LoopbackTransport) -> Vec<Message> {
    let mut out = Vec::new();
    let mut buf = [0u8; 1500];
    loop {
        let (n, _) = wire.recv(&mut buf).unwrap();
        if n == 0 {
            return out;
        }
        out.push(std::str::from_utf8(&buf[..n]).unwrap().parse().unwrap());
    }
}

#[test]
fn heartbeat_discovery() -> Result<()> {
    let mut app = echo_app()?;
    let dev = app.add_device("acme", "cm12", Some("srv"))?;
    app.device_mut(dev).set_version("1.0");
    app.enable_device(dev, true)?;

    // The echo transport bounces the heartbeat straight back, as a
    // local hub would; one poll later the hub is confirmed.
    assert!(!app.device(dev).hub_confirmed());
    let msgs = app.poll(10)?;
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].schema().class(), "hbeat");
    assert_eq!(msgs[0].value("version"), Some("1.0"));
    assert!(app.device(dev).hub_confirmed());
    app.close()?;
    Ok(())
}

#[test]
fn broadcast_filter_drop() -> Result<()> {
    let (mut app, mut wire) = paired_app()?;
    let dev = app.add_device("mine", "dev", Some("a"))?;
    app.device_mut(dev).add_filter_from_string("stat.acme.*.*.sensor.basic")?;

    let hits = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let h = hits.clone();
    app.device_mut(dev).add_listener(None, None, None, move |_, _, _| {
        h.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });

    // A broadcast that matches no filter never reaches the listener.
    let mut x10 = Message::broadcast(
        MessageType::Command,
        "acme-x10.ctrl".parse()?,
        "x10.basic".parse()?,
    );
    x10.add_pair("command", "on")?;
    x10.add_pair("device", "a1")?;
    inject(&mut wire, &x10);
    app.poll(10)?;
    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 0);

    // One that matches does.
    let sensor = Message::broadcast(
        MessageType::Status,
        "acme-sensor.kitchen".parse()?,
        "sensor.basic".parse()?,
    );
    inject(&mut wire, &sensor);
    app.poll(10)?;
    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn config_round_trip() -> Result<()> {
    let (mut app, mut wire) = paired_app()?;
    let dev = app.add_configurable_device("acme", "sensor", None)?;
    app.device_mut(dev)
        .add_configurable("unit", ItemKind::Optional, 1)?;
    app.enable_device(dev, true)?;
    let id = app.device(dev).id().clone();
    drain(&mut wire);

    // The device announces config.app until someone configures it.
    assert_eq!(app.device(dev).heartbeat_interval(), 300);
    assert!(!app.device(dev).configured());

    let mut response = Message::targeted(
        MessageType::Command,
        "mgr-tool.pc".parse()?,
        id,
        "config.response".parse()?,
    );
    response.add_pair("newconf", "kitchen")?;
    response.add_pair("interval", "10")?;
    response.add_pair("group", "xpl-group.lights")?;
    inject(&mut wire, &response);
    app.poll(10)?;

    let dev_ref = app.device(dev);
    assert_eq!(dev_ref.id().instance(), "kitchen");
    assert_eq!(dev_ref.heartbeat_interval(), 600);
    assert_eq!(dev_ref.groups(), ["lights"]);
    assert!(dev_ref.configured());

    // The restart cycle announced the change on the wire: config.end
    // under the old instance, a heartbeat under the new one.
    let sent = drain(&mut wire);
    let schemas: Vec<String> = sent.iter().map(|m| m.schema().to_string()).collect();
    assert_eq!(schemas, ["config.end", "hbeat.basic"]);
    assert_eq!(sent[1].source().instance(), "kitchen");
    Ok(())
}

#[test]
fn config_list_and_current_queries() -> Result<()> {
    let (mut app, mut wire) = paired_app()?;
    let dev = app.add_configurable_device("acme", "sensor", None)?;
    app.device_mut(dev)
        .add_configurable("unit", ItemKind::Optional, 2)?;
    let id = app.device(dev).id().clone();

    let mut list = Message::targeted(
        MessageType::Command,
        "mgr-tool.pc".parse()?,
        id.clone(),
        "config.list".parse()?,
    );
    list.add_pair("command", "request")?;
    inject(&mut wire, &list);
    app.poll(10)?;
    let replies = drain(&mut wire);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].schema().to_string(), "config.list");
    assert!(
        replies[0]
            .body()
            .iter()
            .any(|p| p.name == "option" && p.value == "unit[2]")
    );

    let mut current = Message::targeted(
        MessageType::Command,
        "mgr-tool.pc".parse()?,
        id,
        "config.current".parse()?,
    );
    current.add_pair("command", "request")?;
    inject(&mut wire, &current);
    app.poll(10)?;
    let replies = drain(&mut wire);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].schema().to_string(), "config.current");
    assert_eq!(replies[0].value("interval"), Some("5"));
    Ok(())
}

#[test]
fn device_reply_over_the_wire() -> Result<()> {
    let (mut app, mut wire) = paired_app()?;
    let dev = app.add_device("mine", "lamp", Some("one"))?;
    app.device_mut(dev).add_listener(
        Some(MessageType::Command),
        Some("x10"),
        None,
        |d, msg, out| {
            let mut reply = Message::broadcast(
                MessageType::Trigger,
                d.id().clone(),
                msg.schema().clone(),
            );
            reply
                .add_pair("device", msg.value("device").unwrap_or(""))
                .unwrap();
            reply.add_pair("command", "on").unwrap();
            out.push(reply);
        },
    );

    let mut cmd = Message::targeted(
        MessageType::Command,
        "lan-ctrl.pc".parse()?,
        "mine-lamp.one".parse()?,
        "x10.basic".parse()?,
    );
    cmd.add_pair("command", "on")?;
    cmd.add_pair("device", "a1")?;
    inject(&mut wire, &cmd);
    app.poll(10)?;

    let sent = drain(&mut wire);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].typ(), MessageType::Trigger);
    assert_eq!(sent[0].source().to_string(), "mine-lamp.one");
    assert_eq!(sent[0].value("device"), Some("a1"));
    Ok(())
}
