#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

use memgrid_core::protocol::ClientMessageCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let mut codec = ClientMessageCodec::new();
    let mut buf = BytesMut::from(data);

    while let Ok(Some(msg)) = codec.decode(&mut buf) {
        let _ = msg.message_type();
        let _ = msg.correlation_id();
        let _ = msg.partition_id();
        let _ = msg.is_event();
        let _ = msg.is_exception();
        let _ = msg.wire_size();
    }
});
