//! Wires configured slots up into a running D-Bus service (`spec.md` §5, §6).
//!
//! Grounded on `original_source/src/app.cpp`'s `App::App`: builds the object
//! server, constructs one `MountPointStateMachine` plus D-Bus interface per
//! configured slot, shares a single udev monitor across all of them, kicks
//! each slot off with an initial `RegisterDBusEvent`, and tears everything
//! down on `SIGINT`/`SIGTERM`.

use std::cell::RefCell;
use std::rc::Rc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::dbus_iface::{self, DbusCompletionSink, SharedStatus, VirtualMediaInterface};
use crate::events::{Event, EventEnvelope, EventSender};
use crate::slot::{Slot, SlotMachine};
use crate::udev_monitor::UdevMonitor;

const SERVICE_NAME: &str = "xyz.openbmc_project.VirtualMedia";

/// Builds every configured slot, registers its D-Bus object, starts its
/// event loop, and runs until a termination signal arrives.
pub async fn run(config: Config) -> zbus::Result<()> {
    let connection = zbus::ConnectionBuilder::system()?.build().await?;

    let udev_monitor = Rc::new(RefCell::new(UdevMonitor::new()));
    let mut senders: Vec<EventSender> = Vec::with_capacity(config.slots.len());

    for slot_config in &config.slots {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = DbusCompletionSink::new();
        let status: SharedStatus = Rc::new(RefCell::new(dbus_iface::initial_status(slot_config)));

        let iface = VirtualMediaInterface {
            mode: slot_config.mode,
            events: tx.clone(),
            status: status.clone(),
        };

        let path = dbus_iface::object_path(slot_config.mode, &slot_config.name);
        connection.object_server().at(path.clone(), iface).await?;

        let emitter = zbus::SignalContext::new(&connection, path.clone())?.to_owned();
        sink.bind(emitter);

        let machine = SlotMachine::new(
            slot_config.clone(),
            config.gadget_prefix.clone(),
            config.bus_prefix.clone(),
            tx.clone(),
            udev_monitor.clone(),
            sink,
            status,
        );

        log::info!("slot {}: registered at {path}", slot_config.name);

        tokio::task::spawn_local(Slot::new(machine, rx).run());
        senders.push(tx);
    }

    connection.request_name(SERVICE_NAME).await?;

    tokio::task::spawn_local(async move {
        if let Err(e) = UdevMonitor::run(udev_monitor).await {
            log::error!("udev monitor stopped: {e}");
        }
    });

    for tx in &senders {
        let _ = tx.send(EventEnvelope::internal(Event::RegisterDbus));
    }

    wait_for_shutdown().await;
    log::info!("shutting down");
    Ok(())
}

/// Waits for `SIGINT` or `SIGTERM`. Dropping every `Slot` (and with it every
/// `Process`/`Gadget`) on return runs their synchronous teardown as the
/// executor unwinds, matching `spec.md` §5's "Signals" paragraph.
async fn wait_for_shutdown() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(s) => s,
        Err(e) => {
            log::warn!("failed to install SIGTERM handler: {e}");
            std::future::pending().await
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("received SIGINT");
        }
        _ = sigterm.recv() => {
            log::info!("received SIGTERM");
        }
    }
}
