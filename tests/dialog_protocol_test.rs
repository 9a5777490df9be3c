// Integration tests for the dialog state machine and the call convention,
// driven by a hand-scripted peer instead of the real host so each test can
// send exactly the frames it needs, including wrong ones.

use std::cell::RefCell;
use std::rc::Rc;
use std::thread;

use extlink::session::{DialogState, ItemKind, Session};
use extlink::wire::pipe::channel_pair;
use extlink::wire::{
    Channel, DialogId, DialogReply, DialogRequest, ImageKind, ItemId, Message, MessageKind,
};
use extlink::WireError;

/// Run `script` as the host on its own thread.
fn scripted_peer<F>(script: F) -> (Session, thread::JoinHandle<()>)
where
    F: FnOnce(&mut Channel) + Send + 'static,
{
    let (ext, mut host) = channel_pair().unwrap();
    let peer = thread::spawn(move || script(&mut host));
    (Session::new(ext), peer)
}

fn expect_dialog(host: &mut Channel) -> DialogRequest {
    match host.receive().unwrap() {
        Message::Dialog(request) => request,
        other => panic!("expected a dialog request, got {other:?}"),
    }
}

fn reply(host: &mut Channel, reply: DialogReply) {
    host.send(&Message::DialogReply(reply)).unwrap();
}

#[test]
fn item_ids_must_increase() {
    let (mut session, peer) = scripted_peer(|host| {
        expect_dialog(host);
        reply(host, DialogReply::Created { dialog: DialogId(1) });
        for _ in 0..2 {
            expect_dialog(host);
            reply(host, DialogReply::ItemCreated { dialog: DialogId(1), item: ItemId(2) });
        }
    });

    let dialog = session.dialog_new("ids").unwrap();
    let first = session
        .dialog_add_item(dialog, ItemId::ROOT, ItemKind::Label, "a")
        .unwrap();
    assert_eq!(first, ItemId(2));
    let err = session
        .dialog_add_item(dialog, ItemId::ROOT, ItemKind::Label, "b")
        .unwrap_err();
    assert!(err.is_protocol_violation());
    assert_eq!(session.dialog(dialog).unwrap().items().len(), 1);
    peer.join().unwrap();
}

#[test]
fn close_while_shown_unblocks_show_and_keeps_handle() {
    let (mut session, peer) = scripted_peer(|host| {
        expect_dialog(host);
        reply(host, DialogReply::Created { dialog: DialogId(1) });
        expect_dialog(host);
        reply(host, DialogReply::ItemCreated { dialog: DialogId(1), item: ItemId(1) });

        assert_eq!(expect_dialog(host), DialogRequest::Show { dialog: DialogId(1) });
        reply(host, DialogReply::Shown { dialog: DialogId(1) });
        for (dialog, item, data) in [(1, 1, "a"), (1, 5, "no handler"), (9, 1, "no dialog"), (1, 1, "b")] {
            host.send(&Message::DialogEvent {
                dialog: DialogId(dialog),
                item: ItemId(item),
                data: data.as_bytes().to_vec(),
            })
            .unwrap();
        }
        host.send(&Message::DialogClose { dialog: DialogId(1), result: 7 }).unwrap();
    });

    let dialog = session.dialog_new("modal").unwrap();
    let button = session
        .dialog_add_item(dialog, ItemId::ROOT, ItemKind::Button, "OK")
        .unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    session
        .set_item_callback(dialog, button, move |data| {
            sink.borrow_mut().push(String::from_utf8_lossy(data).into_owned());
        })
        .unwrap();

    assert_eq!(session.dialog_show(dialog).unwrap(), 7);
    assert_eq!(*seen.borrow(), vec!["a", "b"]);

    let handle = session.dialog(dialog).unwrap();
    assert_eq!(handle.state(), DialogState::Closed(7));
    assert_eq!(handle.result(), Some(7));
    assert!(!handle.is_shown());
    peer.join().unwrap();
}

#[test]
fn close_while_not_shown_deletes_handle() {
    let (mut session, peer) = scripted_peer(|host| {
        for id in [1, 2] {
            expect_dialog(host);
            reply(host, DialogReply::Created { dialog: DialogId(id) });
        }
        expect_dialog(host);
        reply(host, DialogReply::Shown { dialog: DialogId(1) });
        host.send(&Message::DialogClose { dialog: DialogId(2), result: 0 }).unwrap();
        host.send(&Message::DialogClose { dialog: DialogId(1), result: 4 }).unwrap();
    });

    let shown = session.dialog_new("shown").unwrap();
    let discarded = session.dialog_new("discarded").unwrap();
    session.set_item_callback(discarded, ItemId(1), |_| {}).unwrap();

    assert_eq!(session.dialog_show(shown).unwrap(), 4);
    assert!(session.dialog(discarded).is_none());
    assert!(session.dialog(shown).is_some());
    // Callbacks went with it.
    assert!(matches!(
        session.set_item_callback(discarded, ItemId(1), |_| {}),
        Err(WireError::UnknownDialog(_))
    ));
    peer.join().unwrap();
}

#[test]
fn delete_forgets_dialog() {
    let (mut session, peer) = scripted_peer(|host| {
        expect_dialog(host);
        reply(host, DialogReply::Created { dialog: DialogId(3) });
        assert_eq!(expect_dialog(host), DialogRequest::Delete { dialog: DialogId(3) });
        reply(host, DialogReply::Deleted { dialog: DialogId(3) });
    });

    let dialog = session.dialog_new("short-lived").unwrap();
    session.dialog_delete(dialog).unwrap();
    assert!(session.dialog(dialog).is_none());
    assert!(session.dialog_delete(dialog).is_err());
    peer.join().unwrap();
}

#[test]
fn terminate_while_shown_is_orderly() {
    let (mut session, peer) = scripted_peer(|host| {
        expect_dialog(host);
        reply(host, DialogReply::Created { dialog: DialogId(1) });
        expect_dialog(host);
        reply(host, DialogReply::Shown { dialog: DialogId(1) });
        host.send(&Message::Terminate).unwrap();
    });

    let dialog = session.dialog_new("doomed").unwrap();
    let err = session.dialog_show(dialog).unwrap_err();
    assert!(matches!(err, WireError::Terminated));
    peer.join().unwrap();
}

#[test]
fn wrong_reply_kind_is_fatal() {
    let (mut session, peer) = scripted_peer(|host| {
        assert_eq!(host.receive().unwrap().kind(), MessageKind::ImageNew);
        host.send(&Message::TextAck).unwrap();
    });

    let err = session.image_new(10, 10, ImageKind::Rgb, "x").unwrap_err();
    assert!(matches!(
        err,
        WireError::UnexpectedReply {
            expected: MessageKind::ImageNewReply,
            received: MessageKind::TextAck,
        }
    ));
    assert_eq!(session.attached_count(), 0);
    peer.join().unwrap();

    // The channel stays poisoned; nothing else goes out.
    assert!(session.progress(0.1, "after").unwrap_err().is_protocol_violation());
}

#[test]
fn wrong_dialog_reply_tag_is_fatal() {
    let (mut session, peer) = scripted_peer(|host| {
        expect_dialog(host);
        reply(host, DialogReply::Deleted { dialog: DialogId(1) });
    });

    assert!(session.dialog_new("t").unwrap_err().is_protocol_violation());
    assert!(session.dialog(DialogId(1)).is_none());
    peer.join().unwrap();
}

#[test]
fn unsolicited_frame_during_show_is_fatal() {
    let (mut session, peer) = scripted_peer(|host| {
        expect_dialog(host);
        reply(host, DialogReply::Created { dialog: DialogId(1) });
        expect_dialog(host);
        reply(host, DialogReply::Shown { dialog: DialogId(1) });
        host.send(&Message::ProgressAck).unwrap();
    });

    let dialog = session.dialog_new("t").unwrap();
    assert!(session.dialog_show(dialog).unwrap_err().is_protocol_violation());
    peer.join().unwrap();
}
