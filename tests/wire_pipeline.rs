//! Black-box tests that drive the wire pipeline (framing, addressing, scheduling,
//! reassembly) between independent `FileManager`s the way two real connections would,
//! without any socket or async runtime involved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use apx_core::{
    AddressHeader, BufferedTransmitHandler, Command, DigestType, File, FileKind, FileManager, FileMap, FileNotificationHandler,
    FileType, RuntimeLimits,
};

struct NoopHandler;
impl FileNotificationHandler for NoopHandler {
    fn file_written(&self, _address: u32, _offset: usize, _data: &[u8]) {}
}

fn encode_command_frame(cmd: &Command) -> Vec<u8> {
    let address = apx_core::config::RMF_CMD_START_ADDR;
    let header = AddressHeader::new(address, false);
    let mut addr_bytes = vec![0u8; header.encoded_len()];
    apx_core::wire::address::encode(&header, &mut addr_bytes).unwrap();
    let payload = cmd.encode();
    let mut body = addr_bytes;
    body.extend_from_slice(&payload);
    let mut frame = apx_core::wire::framing::encode_to_vec(body.len()).unwrap();
    frame.extend_from_slice(&body);
    frame
}

#[test]
fn published_file_is_visible_on_the_peer_after_one_tick() {
    let limits = RuntimeLimits::default();
    let publisher = FileManager::new(&limits);
    let file = publisher
        .create_local_file(
            FileKind::PortData,
            b"VehicleSpeed.provide".to_vec(),
            2,
            FileType::Fixed,
            DigestType::None,
            [0u8; 32],
            Arc::new(NoopHandler),
        )
        .unwrap();
    publisher.publish_local_file(&file);

    let mut transmit = BufferedTransmitHandler::new(4096);
    publisher.run(&mut transmit).unwrap();
    let wire_bytes = transmit.take_staged();
    assert!(!wire_bytes.is_empty());

    let subscriber = FileManager::new(&limits);
    let consumed = subscriber.message_received(&wire_bytes).unwrap();
    assert_eq!(consumed, wire_bytes.len());

    let remote = subscriber.find_remote_by_address(file.address).unwrap();
    assert_eq!(remote.name, b"VehicleSpeed.provide");
    assert_eq!(remote.size, 2);
}

#[test]
fn remote_open_file_request_opens_the_local_file_and_fires_the_handler() {
    let limits = RuntimeLimits::default();
    let manager = FileManager::new(&limits);

    let opened = Arc::new(AtomicBool::new(false));
    struct OpenRecorder(Arc<AtomicBool>);
    impl FileNotificationHandler for OpenRecorder {
        fn file_opened(&self, _address: u32) {
            self.0.store(true, Ordering::SeqCst);
        }
        fn file_written(&self, _address: u32, _offset: usize, _data: &[u8]) {}
    }

    let file = manager
        .create_local_file(
            FileKind::PortData,
            b"Counter.require".to_vec(),
            4,
            FileType::Fixed,
            DigestType::None,
            [0u8; 32],
            Arc::new(OpenRecorder(opened.clone())),
        )
        .unwrap();
    assert!(!file.is_open());

    let open_request = encode_command_frame(&Command::OpenFile { address: file.address });
    let consumed = manager.message_received(&open_request).unwrap();
    assert_eq!(consumed, open_request.len());

    assert!(file.is_open());
    assert!(opened.load(Ordering::SeqCst));
}

/// Drain every complete frame out of `bytes`, feeding data frames to `reassembler`
/// and leaving command frames (there are none in this scenario) untouched.
fn feed_data_frames(bytes: &[u8], reassembler: &mut apx_core::transport::ReceiveReassembler, remote: &mut FileMap) {
    let mut pos = 0;
    while pos < bytes.len() {
        let (size, header_len) = match apx_core::wire::framing::decode(&bytes[pos..]) {
            apx_core::wire::framing::Decoded::Complete { size, header_len } => (size, header_len),
            apx_core::wire::framing::Decoded::NeedMore => break,
        };
        let body_start = pos + header_len;
        let body = &bytes[body_start..body_start + size];
        let (addr_header, addr_len) = apx_core::wire::address::decode(body).unwrap();
        let payload = &body[addr_len..];
        reassembler
            .on_data(addr_header.address, payload, addr_header.more, remote)
            .unwrap();
        pos = body_start + size;
    }
}

#[test]
fn a_file_fragmented_across_many_small_sends_reassembles_byte_for_byte() {
    let limits = RuntimeLimits::default();
    let file_addr = 0x400u32;
    let original: Vec<u8> = (0..352u32).map(|i| (i % 251) as u8).collect();

    let mut scheduler = apx_core::transport::SendScheduler::new(&limits);
    scheduler.enqueue(apx_core::transport::Msg::SendFile {
        address: file_addr,
        data: Arc::from(original.clone().into_boxed_slice()),
    });

    let mut remote = FileMap::new();
    let remote_file = Arc::new(File::new(
        file_addr,
        b"Definition.apx".to_vec(),
        352,
        FileType::Dynamic32,
        DigestType::None,
        [0u8; 32],
        FileKind::Definition,
    ));

    struct Recorder(parking_lot::Mutex<Vec<u8>>);
    impl FileNotificationHandler for Recorder {
        fn file_written(&self, _address: u32, offset: usize, data: &[u8]) {
            let mut buf = self.0.lock();
            let end = offset + data.len();
            if buf.len() < end {
                buf.resize(end, 0);
            }
            buf[offset..end].copy_from_slice(data);
        }
    }
    let recorder = Arc::new(Recorder(parking_lot::Mutex::new(Vec::new())));
    remote_file.install_handler(recorder.clone());
    remote_file.mark_open().unwrap();
    remote.insert(remote_file).unwrap();

    let mut reassembler = apx_core::transport::ReceiveReassembler::new(limits.reassembly_buffer_capacity);

    // A 200-byte send buffer forces this 352-byte file across multiple fragments;
    // every tick a fresh buffer stands in for whatever room the transport has free.
    let mut ticks = 0;
    loop {
        let mut transmit = BufferedTransmitHandler::new(200);
        scheduler.run(&mut transmit).unwrap();
        let staged = transmit.take_staged();
        if !staged.is_empty() {
            feed_data_frames(&staged, &mut reassembler, &mut remote);
        }
        ticks += 1;
        if !scheduler.has_pending_work() {
            break;
        }
        assert!(ticks < 20, "fragmented write never converged");
    }
    assert!(ticks > 1, "352 bytes through a 200-byte buffer should take more than one tick");

    assert_eq!(*recorder.0.lock(), original);
}
