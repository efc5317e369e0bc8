//! End-to-end slot-lifecycle scenarios, driven directly against the state
//! machine rather than through a real kernel NBD device, configfs tree, or
//! D-Bus connection — mirroring `original_source/tests/src/mocks/*`'s
//! approach of substituting fakes for every external collaborator so the
//! transition logic itself is what's under test.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::mpsc;

use virtmedia::config::{Mode, SlotConfig};
use virtmedia::dbus_iface;
use virtmedia::events::{DeviceState, Event, EventEnvelope, MountTarget};
use virtmedia::nbd::NbdDevice;
use virtmedia::notify::CompletionSink;
use virtmedia::resources::{Credentials, Process};
use virtmedia::slot::SlotMachine;
use virtmedia::state::{activating, active, deactivating, SlotState};
use virtmedia::udev_monitor::UdevMonitor;

#[derive(Default)]
struct RecordingSink(RefCell<Vec<i32>>);

impl CompletionSink for RecordingSink {
    fn emit(&self, errno: i32) {
        self.0.borrow_mut().push(errno);
    }
}

/// Builds a slot machine with a scratch `gadget_prefix` and a `bus_prefix`
/// containing one fake UDC entry, so `Gadget::configure` exercises real
/// directory/symlink/file operations without touching the kernel.
fn test_machine(mode: Mode) -> (SlotMachine, Rc<RecordingSink>, tempfile::TempDir, tempfile::TempDir) {
    let gadget_prefix = tempfile::tempdir().unwrap();
    let bus_prefix = tempfile::tempdir().unwrap();
    std::fs::create_dir(bus_prefix.path().join("fake_udc.0")).unwrap();

    let config = SlotConfig {
        name: "Slot_0".to_string(),
        mode,
        nbd_device: NbdDevice::parse("nbd0"),
        unix_socket: PathBuf::from("/run/virtmedia/Slot_0.sock"),
        endpoint_id: Some("slot0".to_string()),
        timeout: Duration::from_secs(5),
        block_size: None,
    };

    let (tx, _rx) = mpsc::unbounded_channel::<EventEnvelope>();
    let udev_monitor = Rc::new(RefCell::new(UdevMonitor::new()));
    let sink = Rc::new(RecordingSink::default());
    let status = Rc::new(RefCell::new(dbus_iface::initial_status(&config)));

    let machine = SlotMachine::new(
        config,
        gadget_prefix.path().to_path_buf(),
        bus_prefix.path().to_path_buf(),
        tx,
        udev_monitor,
        sink.clone() as Rc<dyn CompletionSink>,
        status,
    );

    (machine, sink, gadget_prefix, bus_prefix)
}

/// S1 — Proxy happy path: an already-running supervised process (standing in
/// for `nbd-client`, which this sandbox doesn't have installed) receives the
/// udev "inserted" notification and the slot settles into `Active`.
#[tokio::test(flavor = "current_thread")]
async fn proxy_happy_path_reaches_active() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (mut machine, sink, _g, _b) = test_machine(Mode::Proxy);
            let (events_tx, _events_rx) = mpsc::unbounded_channel();

            // A `Mount()` call would have started the notifier before handing
            // off to `Activating`; replicate that here since we enter the
            // state directly.
            machine.notifier.start(machine.config.timeout);
            machine.process = Some(
                Process::spawn(&machine.name, "/bin/sh", &["-c".to_string(), "sleep 5".to_string()], events_tx)
                    .unwrap(),
            );

            let result = activating::handle(
                &mut machine,
                Event::UdevChange {
                    state: DeviceState::Inserted,
                },
            );
            assert!(matches!(result.next, SlotState::Active));
            assert_eq!(result.reply, Ok(true));

            let mut state = result.next;
            while let Some(next) = state.on_enter(&mut machine) {
                state = next;
            }

            assert_eq!(*sink.0.borrow(), vec![0]);
            assert_eq!(machine.exit_code, -1);
            assert!(machine.process.is_some());

            machine.process.take().unwrap().stop().await;
        })
        .await;
}

/// S2 — Proxy spawn failure: activation against a slot with no usable nbd
/// device fails the same way a real `nbd-client` spawn failure would —
/// `Activating::on_enter` falls straight back to `Ready` with `ECONNREFUSED`.
#[tokio::test(flavor = "current_thread")]
async fn proxy_spawn_failure_returns_to_ready() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (mut machine, sink, _g, _b) = test_machine(Mode::Proxy);
            machine.config.nbd_device = NbdDevice::parse("not-a-device");
            machine.notifier.start(machine.config.timeout);

            let next = activating::on_enter(&mut machine).expect("activation must fail fast");
            match &next {
                SlotState::Ready {
                    pending: Some(Err(errno)),
                } => assert_eq!(*errno, libc::ECONNREFUSED),
                other => panic!("expected Ready{{pending: Err}}, got {other:?}"),
            }

            state_enter_ready(&mut machine, next);
            assert_eq!(*sink.0.borrow(), vec![libc::ECONNREFUSED]);
            assert!(machine.process.is_none());
        })
        .await;
}

fn state_enter_ready(machine: &mut SlotMachine, mut state: SlotState) {
    while let Some(next) = state.on_enter(machine) {
        state = next;
    }
}

/// S3 — `Active` → `Unmount`: once both the udev "removed" signal and the
/// subprocess exit have been observed, the slot settles back into `Ready`
/// with a clean completion.
#[tokio::test(flavor = "current_thread")]
async fn active_unmount_settles_into_ready() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (mut machine, sink, _g, _b) = test_machine(Mode::Proxy);
            let (events_tx, _events_rx) = mpsc::unbounded_channel();
            machine.process = Some(
                Process::spawn(&machine.name, "/bin/sh", &["-c".to_string(), "sleep 5".to_string()], events_tx)
                    .unwrap(),
            );

            let result = active::handle(&mut machine, Event::Unmount);
            assert_eq!(result.reply, Ok(true));
            let SlotState::Deactivating(mut data) = result.next else {
                panic!("expected Deactivating");
            };

            // `on_enter` drops the gadget (none configured here) and spawns a
            // detached `stop()` for the process; neither signal has arrived
            // yet so it stays in `Deactivating`.
            assert!(deactivating::on_enter(&mut machine, &mut data).is_none());
            assert!(machine.process.is_none());

            let result = deactivating::handle(
                &mut machine,
                data,
                Event::UdevChange {
                    state: DeviceState::Removed,
                },
            );
            let SlotState::Deactivating(data) = result.next else {
                panic!("expected still Deactivating after only one signal");
            };

            let result = deactivating::handle(&mut machine, data, Event::SubprocessStopped { exit_code: 0 });
            match &result.next {
                SlotState::Ready {
                    pending: Some(Ok(())),
                } => {}
                other => panic!("expected Ready{{pending: Ok}}, got {other:?}"),
            }

            let mut state = result.next;
            while let Some(next) = state.on_enter(&mut machine) {
                state = next;
            }
            assert_eq!(*sink.0.borrow(), vec![0]);
        })
        .await;
}

/// S4 — Premature subprocess exit while still `Activating`: the real exit
/// watcher posts `SubprocessStopped` on its own; the slot falls back to
/// `Ready` with the observed exit code and `ECONNREFUSED`.
#[tokio::test(flavor = "current_thread")]
async fn premature_exit_during_activating_returns_to_ready() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (mut machine, sink, _g, _b) = test_machine(Mode::Proxy);
            let (events_tx, mut events_rx) = mpsc::unbounded_channel();
            machine.process = Some(
                Process::spawn(&machine.name, "/bin/sh", &["-c".to_string(), "exit 1".to_string()], events_tx)
                    .unwrap(),
            );

            let envelope = events_rx.recv().await.expect("exit watcher posts an event");
            let event = envelope.event;
            assert!(matches!(event, Event::SubprocessStopped { exit_code: 1 }));

            let result = activating::handle(&mut machine, event);
            match &result.next {
                SlotState::Ready {
                    pending: Some(Err(errno)),
                } => assert_eq!(*errno, libc::ECONNREFUSED),
                other => panic!("expected Ready{{pending: Err}}, got {other:?}"),
            }
            assert_eq!(machine.exit_code, 1);

            let mut state = result.next;
            while let Some(next) = state.on_enter(&mut machine) {
                state = next;
            }
            assert_eq!(*sink.0.borrow(), vec![libc::ECONNREFUSED]);
        })
        .await;
}

/// S5 — Standard mode with credentials: the secret file is written with
/// mode 0600 as part of `nbdkit` argument construction, then disappears once
/// the slot returns to `Ready` and drops the activation's `MountTarget`.
#[tokio::test(flavor = "current_thread")]
async fn standard_with_credentials_materializes_and_cleans_up_secret() {
    use std::os::unix::fs::PermissionsExt;

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (mut machine, _sink, _g, _b) = test_machine(Mode::Standard);
            machine.target = Some(MountTarget {
                image_url: "https://host/x.iso".to_string(),
                rw: false,
                credentials: Credentials::parse(b"u\0p\0"),
                mount: None,
                secret: None,
            });

            // `nbdkit` is not installed in this sandbox, so activation itself
            // fails — but the secret file is written before that spawn is
            // attempted, so its lifecycle is still observable.
            let next = activating::on_enter(&mut machine);

            let secret_path = machine
                .target
                .as_ref()
                .and_then(|t| t.secret.as_ref())
                .map(|s| s.path().to_path_buf())
                .expect("secret file must have been written");

            let meta = std::fs::metadata(&secret_path).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o600);

            if let Some(mut state) = next {
                while let Some(n) = state.on_enter(&mut machine) {
                    state = n;
                }
            }

            assert!(!secret_path.exists());
        })
        .await;
}

/// S6 — Invalid request while `Active`: `Mount()` is rejected synchronously,
/// the slot stays `Active`, and no completion fires.
#[tokio::test(flavor = "current_thread")]
async fn mount_while_active_is_rejected() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (mut machine, sink, _g, _b) = test_machine(Mode::Proxy);

            let result = active::handle(
                &mut machine,
                Event::Mount {
                    target: Some(MountTarget {
                        image_url: "https://host/y.iso".to_string(),
                        rw: false,
                        credentials: None,
                        mount: None,
                        secret: None,
                    }),
                },
            );

            assert!(matches!(result.next, SlotState::Active));
            assert_eq!(result.reply, Err(virtmedia::MediaError::NotPermitted));
            assert!(sink.0.borrow().is_empty());
        })
        .await;
}
