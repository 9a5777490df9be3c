// Integration tests for an extension session talking to a real host.
//
// Each test joins a `Session` and a `Host` with two OS pipes and runs the
// host on its own thread, so both ends exercise the real frame codec and
// real SysV shared memory.

use std::thread;

use extlink::demo::{self, gradient_pixel, DemoOptions};
use extlink::host::{AutoAcceptDriver, DialogScript, Host, HostExit, ScriptedDriver};
use extlink::session::{run_session, ItemId, Session};
use extlink::shm::{Access, Attachment};
use extlink::wire::pipe::channel_pair;
use extlink::wire::{ColorTarget, ImageKind, Rgba};
use extlink::{Config, WireError};

/// Attach count of a segment as seen by the kernel.
fn attach_count(shm_id: i32) -> u64 {
    // SAFETY: zeroed shmid_ds is a valid out-parameter for IPC_STAT.
    let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
    // SAFETY: `ds` is live and writable.
    let ret = unsafe { libc::shmctl(shm_id, libc::IPC_STAT, &mut ds) };
    assert_eq!(ret, 0, "IPC_STAT on segment {shm_id}");
    ds.shm_nattch as u64
}

fn start_host(host: Host) -> thread::JoinHandle<(Host, HostExit)> {
    thread::spawn(move || {
        let mut host = host;
        let exit = host.serve().expect("host serve failed");
        (host, exit)
    })
}

#[test]
fn new_image_is_true_shared_memory() {
    let (ext, host_end) = channel_pair().unwrap();
    let server = start_host(Host::new(host_end, AutoAcceptDriver));
    let mut session = Session::new(ext);

    let handle = session.image_new(100, 50, ImageKind::Rgb, "scenario").unwrap();
    let desc = session.image(handle).unwrap().descriptor().clone();
    assert_eq!((desc.width, desc.height, desc.channels), (100, 50, 3));
    assert!(desc.shm_id >= 0);
    assert_eq!(session.image(handle).unwrap().pixels().len(), 100 * 50 * 3);

    session.image_mut(handle).unwrap().pixels_mut().unwrap()[0] = 0x5A;
    session.release_image(handle).unwrap();
    assert_eq!(session.attached_count(), 0);

    // Second, independent view of the same segment.
    let view = Attachment::attach(desc.shm_id, desc.byte_len(), Access::ReadOnly).unwrap();
    assert_eq!(view.as_slice()[0], 0x5A);
    view.detach().unwrap();

    // And again through the protocol, read-only this time.
    let again = session.image_get(desc.id, false).unwrap();
    assert_eq!(session.image(again).unwrap().pixels()[0], 0x5A);
    assert!(session.image_mut(again).unwrap().pixels_mut().is_none());

    session.quit().unwrap();
    let (_host, exit) = server.join().unwrap();
    assert_eq!(exit, HostExit::Quit);
}

#[test]
fn releases_return_registry_to_empty() {
    let (ext, host_end) = channel_pair().unwrap();
    let server = start_host(Host::new(host_end, AutoAcceptDriver));
    let mut session = Session::new(ext);

    let handles: Vec<_> = [(4, 4, ImageKind::Rgb), (8, 2, ImageKind::Gray), (3, 3, ImageKind::Indexed)]
        .into_iter()
        .map(|(w, h, kind)| session.image_new(w, h, kind, "tmp").unwrap())
        .collect();
    let extra = session.image_get(1, true).unwrap();
    assert_eq!(session.attached_count(), 4);

    for handle in handles.into_iter().chain([extra]) {
        session.release_image(handle).unwrap();
    }
    assert_eq!(session.attached_count(), 0);

    // Double release is refused rather than detaching twice.
    assert!(session.release_image(extra).unwrap_err().is_protocol_violation());

    session.quit().unwrap();
    server.join().unwrap();
}

#[test]
fn quit_drains_every_attachment_first() {
    let (ext, host_end) = channel_pair().unwrap();
    let server = thread::spawn(move || {
        let mut host = Host::new(host_end, AutoAcceptDriver);
        let exit = host.serve().unwrap();
        // QUIT is only sent after the drain, so nothing may still be mapped.
        let counts: Vec<u64> = (1..=3)
            .map(|id| attach_count(host.image_descriptor(id).unwrap().shm_id))
            .collect();
        (exit, counts)
    });

    let mut session = Session::new(ext);
    for _ in 0..3 {
        session.image_new(16, 16, ImageKind::Gray, "leak?").unwrap();
    }
    assert_eq!(session.attached_count(), 3);
    session.quit().unwrap();

    let (exit, counts) = server.join().unwrap();
    assert_eq!(exit, HostExit::Quit);
    assert_eq!(counts, vec![0, 0, 0]);
}

#[test]
fn input_images_are_mapped_read_only() {
    let (ext, host_end) = channel_pair().unwrap();
    let mut host = Host::new(host_end, AutoAcceptDriver);
    let id = host.add_image(2, 1, ImageKind::Rgb, "input", &[9, 8, 7, 6, 5, 4]).unwrap();
    let server = start_host(host);

    let mut session = Session::new(ext);
    let handle = session.image_get(id, false).unwrap();
    let image = session.image(handle).unwrap();
    assert_eq!(image.pixels(), &[9, 8, 7, 6, 5, 4]);
    assert_eq!(image.access(), Access::ReadOnly);
    assert_eq!(image.descriptor().name, "input");

    session.quit().unwrap();
    server.join().unwrap();
}

#[test]
fn unknown_image_is_a_resource_failure() {
    let (ext, host_end) = channel_pair().unwrap();
    let server = start_host(Host::new(host_end, AutoAcceptDriver));
    let mut session = Session::new(ext);

    let err = session.image_get(42, false).unwrap_err();
    assert!(matches!(err, WireError::SharedMemory { .. }));
    assert_eq!(session.attached_count(), 0);

    session.quit().unwrap();
    server.join().unwrap();
}

#[test]
fn colors_come_from_host_config() {
    let (ext, host_end) = channel_pair().unwrap();
    let mut config = Config::default();
    config.foreground = Rgba { r: 1.0, g: 0.0, b: 0.0, a: 1.0 };
    let server = start_host(Host::new(host_end, AutoAcceptDriver).with_config(&config));
    let mut session = Session::new(ext);

    assert_eq!(session.color(ColorTarget::Foreground).unwrap().r, 1.0);
    assert_eq!(session.color(ColorTarget::Background).unwrap(), config.background);
    session.progress(7.5, "clamped").unwrap();

    session.quit().unwrap();
    server.join().unwrap();
}

#[test]
fn demo_runs_against_scripted_host() {
    let (ext, host_end) = channel_pair().unwrap();
    // Toggle is the second item: Group(1) > Toggle(2), Button(3).
    let driver = ScriptedDriver::new([DialogScript::close_with(3)
        .event(ItemId(2), b"on".to_vec())
        .event(ItemId(9), b"stray".to_vec())]);
    let server = start_host(Host::new(host_end, driver));

    let mut session = Session::new(ext);
    let options = DemoOptions {
        width: 8,
        height: 4,
        fault: false,
    };
    let report = demo::run(&mut session, &options).unwrap();
    assert_eq!(report.dialog_result, 3);
    assert_eq!(report.toggle_events, vec![b"on".to_vec()]);
    assert_eq!(report.foreground, [0, 0, 0]);
    assert_eq!(session.attached_count(), 0);
    session.quit().unwrap();

    let (host, exit) = server.join().unwrap();
    assert_eq!(exit, HostExit::Quit);
    let pixels = host.image_pixels(report.image_id).unwrap().unwrap();
    assert_eq!(&pixels[..3], &gradient_pixel(0, 0, 8, 4));
    let last = pixels.len() - 3;
    assert_eq!(&pixels[last..], &gradient_pixel(7, 3, 8, 4));
}

#[test]
fn host_terminate_interrupts_a_call() {
    let (ext, host_end) = channel_pair().unwrap();
    let mut host = Host::new(host_end, AutoAcceptDriver);
    host.terminate().unwrap();

    let mut session = Session::new(ext);
    let err = session.color(ColorTarget::Foreground).unwrap_err();
    assert!(err.is_orderly());
    drop(host);
}

#[test]
fn panicking_body_still_sends_quit() {
    let (ext, host_end) = channel_pair().unwrap();
    let server = thread::spawn(move || {
        let mut host = Host::new(host_end, AutoAcceptDriver);
        let exit = host.serve().unwrap();
        let shm_id = host.image_descriptor(1).unwrap().shm_id;
        (exit, attach_count(shm_id))
    });

    let result = run_session(Session::new(ext), |session| {
        session.image_new(4, 4, ImageKind::Rgb, "abandoned")?;
        panic!("body gave up");
    });
    let err = result.unwrap_err();
    assert!(err.to_string().contains("body gave up"), "{err:#}");

    let (exit, attached) = server.join().unwrap();
    assert_eq!(exit, HostExit::Quit);
    assert_eq!(attached, 0);
}

#[test]
fn failing_body_keeps_its_error_and_quits() {
    let (ext, host_end) = channel_pair().unwrap();
    let server = start_host(Host::new(host_end, AutoAcceptDriver));

    let err = run_session(Session::new(ext), |session| {
        session.image_get(77, false)?;
        Ok(())
    })
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<WireError>(),
        Some(WireError::SharedMemory { .. })
    ));

    let (_host, exit) = server.join().unwrap();
    assert_eq!(exit, HostExit::Quit);
}

#[test]
fn demo_accepts_zero_sized_image() {
    for (width, height) in [(0, 4), (5, 0)] {
        let (ext, host_end) = channel_pair().unwrap();
        let server = start_host(Host::new(host_end, AutoAcceptDriver));
        let mut session = Session::new(ext);

        let options = DemoOptions {
            width,
            height,
            fault: false,
        };
        let report = demo::run(&mut session, &options).unwrap();
        assert_eq!(report.dialog_result, 0);
        session.quit().unwrap();

        let (host, exit) = server.join().unwrap();
        assert_eq!(exit, HostExit::Quit);
        assert_eq!(host.image_pixels(report.image_id).unwrap().unwrap().len(), 0);
    }
}
