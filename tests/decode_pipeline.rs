//! End-to-end decode pipeline tests
//!
//! Feeds literal ITM byte streams through the decoder into the trace
//! store, and runs the full capture path (reader thread over TCP) against
//! a local socket pair.

mod common;

use std::net::{Ipv4Addr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::builders::{ItmStreamBuilder, ScriptedCtf};
use common::wait_for;
use swotrace_rs::{
    ChannelRegistry, ItmDecoder, SampleMap, TraceSession, TraceStore, TransportConfig,
};

/// Decode `frames` and route emissions through a registry check into the
/// store, the way the session does.
fn decode_frames(
    decoder: &mut ItmDecoder,
    store: &mut TraceStore,
    registry: &ChannelRegistry,
    frames: &[(&[u8], f64)],
) -> u32 {
    let mut errors = 0;
    for &(data, timestamp) in frames {
        let result = decoder.decode_text_frame(data, &mut |channel, payload| {
            if registry.is_enabled(channel as usize) {
                store.append_text(channel, payload, timestamp);
            }
        });
        if result.is_err() {
            errors += 1;
        }
    }
    errors
}

fn two_channel_registry() -> ChannelRegistry {
    let mut registry = ChannelRegistry::new();
    registry.configure(0, true, Some("A"), [255, 0, 0, 255]);
    registry.configure(1, true, Some("B"), [0, 255, 0, 255]);
    registry
}

#[test]
fn test_hello_frame() {
    let mut decoder = ItmDecoder::new();
    let mut store = TraceStore::new();
    let registry = two_channel_registry();

    let frame = ItmStreamBuilder::new().text(0, "Hi\n").build();
    decode_frames(&mut decoder, &mut store, &registry, &[(&frame, 1.0)]);

    assert_eq!(store.len(), 1);
    let line = store.line(0).unwrap();
    assert_eq!(line.channel, 0);
    assert_eq!(line.text(), "Hi");
    assert!(line.is_sealed());
    assert_eq!(line.time_label(), "0.000");
}

#[test]
fn test_auto_width_grows_on_word_write() {
    let mut decoder = ItmDecoder::new();
    let mut store = TraceStore::new();
    let registry = two_channel_registry();

    let frame = ItmStreamBuilder::new().word(0, 0xefbe_adde).build();
    assert_eq!(frame, vec![0x03, 0xde, 0xad, 0xbe, 0xef]);
    decode_frames(&mut decoder, &mut store, &registry, &[(&frame, 1.0)]);

    assert_eq!(decoder.payload_width(), 4);
    assert_eq!(store.len(), 1);
    assert_eq!(store.line(0).unwrap().text_bytes(), &[0xde, 0xad, 0xbe, 0xef]);
}

#[test]
fn test_packet_split_across_frames() {
    let mut decoder = ItmDecoder::new();
    let mut store = TraceStore::new();
    let registry = two_channel_registry();

    decode_frames(
        &mut decoder,
        &mut store,
        &registry,
        &[(&[0x01, b'H'], 1.00), (&[0x01, b'i', 0x01, b'\n'], 1.01)],
    );

    assert_eq!(store.len(), 1);
    let line = store.line(0).unwrap();
    assert_eq!(line.text(), "Hi");
    assert!(line.is_sealed());
}

#[test]
fn test_pc_sample_profiling() {
    let mut decoder = ItmDecoder::new();
    let mut samples = SampleMap::new(0x2000_1000, 0x2000_2000);

    let frame = ItmStreamBuilder::new().pc_sample(0x2000_1000).build();
    assert_eq!(frame, vec![0x17, 0x00, 0x10, 0x00, 0x20]);
    let stats = decoder.decode_profile_frame(&frame, &mut samples).unwrap();

    assert_eq!(stats.samples, 1);
    assert_eq!(samples.count(0), 1);
}

#[test]
fn test_invalid_header_recovery() {
    let mut decoder = ItmDecoder::new();
    let mut store = TraceStore::new();
    let registry = two_channel_registry();

    let errors = decode_frames(
        &mut decoder,
        &mut store,
        &registry,
        &[(&[0xff, 0x00, 0x00], 1.0)],
    );
    assert_eq!(errors, 1);
    assert_eq!(decoder.packet_errors(false), 1);
    assert!(store.is_empty());

    // the next frame decodes cleanly
    let frame = ItmStreamBuilder::new().text(0, "ok\n").build();
    decode_frames(&mut decoder, &mut store, &registry, &[(&frame, 1.1)]);
    assert_eq!(store.len(), 1);
    assert_eq!(store.line(0).unwrap().text(), "ok");
    assert_eq!(decoder.packet_errors(false), 1);
}

#[test]
fn test_continuation_timeout() {
    let registry = two_channel_registry();
    let foo = ItmStreamBuilder::new().text(0, "foo").build();
    let bar = ItmStreamBuilder::new().text(0, "bar").build();

    // 50 ms apart: one line
    let mut decoder = ItmDecoder::new();
    let mut store = TraceStore::new();
    decode_frames(
        &mut decoder,
        &mut store,
        &registry,
        &[(&foo, 1.0), (&bar, 1.05)],
    );
    assert_eq!(store.len(), 1);
    assert_eq!(store.line(0).unwrap().text(), "foobar");

    // 200 ms apart: two lines
    let mut decoder = ItmDecoder::new();
    let mut store = TraceStore::new();
    decode_frames(
        &mut decoder,
        &mut store,
        &registry,
        &[(&foo, 1.0), (&bar, 1.2)],
    );
    assert_eq!(store.len(), 2);
    assert_eq!(store.line(0).unwrap().text(), "foo");
    assert_eq!(store.line(1).unwrap().text(), "bar");
}

#[test]
fn test_disabled_channel_never_materializes() {
    let mut decoder = ItmDecoder::new();
    let mut store = TraceStore::new();
    let mut registry = two_channel_registry();
    registry.set_enabled(1, false);

    let frame = ItmStreamBuilder::new()
        .text(1, "dropped")
        .text(0, "kept\n")
        .build();
    decode_frames(&mut decoder, &mut store, &registry, &[(&frame, 1.0)]);

    assert_eq!(store.len(), 1);
    assert_eq!(store.line(0).unwrap().text(), "kept");
    assert_eq!(store.line(0).unwrap().channel, 0);
}

#[test]
fn test_decode_matches_across_frame_boundaries() {
    // an arbitrary 64-byte framing of a stream must decode identically to
    // the unsplit stream
    let registry = two_channel_registry();
    let stream = ItmStreamBuilder::new()
        .text(0, "first line\n")
        .word(0, 0x6867_6665)
        .text(1, "other channel\n")
        .text(0, "and back again\n")
        .build();

    let mut whole_decoder = ItmDecoder::new();
    let mut whole_store = TraceStore::new();
    decode_frames(
        &mut whole_decoder,
        &mut whole_store,
        &registry,
        &[(&stream, 2.0)],
    );

    for frame_size in [1usize, 3, 7, 64] {
        let mut decoder = ItmDecoder::new();
        let mut store = TraceStore::new();
        let frames: Vec<(&[u8], f64)> =
            stream.chunks(frame_size).map(|chunk| (chunk, 2.0)).collect();
        decode_frames(&mut decoder, &mut store, &registry, &frames);

        assert_eq!(store.len(), whole_store.len(), "frame size {}", frame_size);
        for (split, whole) in store.lines().zip(whole_store.lines()) {
            assert_eq!(split.channel, whole.channel, "frame size {}", frame_size);
            assert_eq!(
                split.text_bytes(),
                whole.text_bytes(),
                "frame size {}",
                frame_size
            );
        }
        assert_eq!(decoder.packet_errors(false), 0);
    }
}

// --- full capture path over a local TCP socket pair ---

fn open_tcp_session(session: &mut TraceSession, wakes: Arc<AtomicUsize>) -> TcpListener {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let port = listener.local_addr().unwrap().port();
    let config = TransportConfig::Tcp {
        address: Ipv4Addr::LOCALHOST,
        port,
    };
    session
        .open(&config, Arc::new(move || {
            wakes.fetch_add(1, Ordering::Relaxed);
        }))
        .expect("open session");
    listener
}

#[test]
fn test_tcp_capture_end_to_end() {
    let mut session = TraceSession::new();
    session.registry_mut().configure(0, true, Some("console"), [0, 0, 0, 255]);
    let wakes = Arc::new(AtomicUsize::new(0));
    let listener = open_tcp_session(&mut session, wakes.clone());

    let payload = ItmStreamBuilder::new().text(0, "Hi\n").build();
    let server = std::thread::spawn(move || {
        use std::io::Write;
        let (mut socket, _) = listener.accept().unwrap();
        socket.write_all(&payload).unwrap();
        socket.flush().unwrap();
        std::thread::sleep(Duration::from_millis(300));
    });

    wait_for(2000, || {
        session.process_text(true);
        session
            .store()
            .line(0)
            .map(|line| line.is_sealed())
            .unwrap_or(false)
    });
    assert_eq!(session.store().line(0).unwrap().text(), "Hi");
    assert!(wakes.load(Ordering::Relaxed) > 0);

    server.join().unwrap();
    // remote close surfaces as a status message
    wait_for(2000, || {
        session.process_text(true);
        !session.status().is_empty()
    });
    assert!(session.status().get(0).unwrap().text.contains("closed"));

    let start = Instant::now();
    session.close();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!session.is_open());

    // history survives close
    assert_eq!(session.store().len(), 1);
}

#[test]
fn test_double_open_is_a_noop() {
    let mut session = TraceSession::new();
    let listener = open_tcp_session(&mut session, Arc::new(AtomicUsize::new(0)));
    let config = TransportConfig::Tcp {
        address: Ipv4Addr::LOCALHOST,
        port: listener.local_addr().unwrap().port(),
    };
    // second open must not spawn a second reader or fail
    session.open(&config, Arc::new(|| {})).expect("double open");
    session.close();
}

#[test]
fn test_ctf_channel_produces_messages() {
    let mut session = TraceSession::new();
    session.registry_mut().set_enabled(0, true);
    session.set_ctf_stream(Box::new(ScriptedCtf::new(0)));
    let listener = open_tcp_session(&mut session, Arc::new(AtomicUsize::new(0)));

    let payload = ItmStreamBuilder::new().text(0, "A").build();
    let server = std::thread::spawn(move || {
        use std::io::Write;
        let (mut socket, _) = listener.accept().unwrap();
        socket.write_all(&payload).unwrap();
        std::thread::sleep(Duration::from_millis(300));
    });

    wait_for(2000, || {
        session.process_text(true);
        !session.store().is_empty()
    });
    let line = session.store().line(0).unwrap();
    assert_eq!(line.text(), "event 41");
    assert!(line.is_sealed());

    server.join().unwrap();
    session.close();
}
