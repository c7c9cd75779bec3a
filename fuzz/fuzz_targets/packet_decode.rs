#![no_main]

use libfuzzer_sys::fuzz_target;
use ntorrent::ndn::packet::{Data, Interest};

fuzz_target!(|data: &[u8]| {
    if let Ok(packet) = Data::decode(data) {
        // A decodable packet must re-encode and keep a stable digest.
        let wire = packet.encode();
        let again = Data::decode(&wire).expect("re-encoded packet must decode");
        assert_eq!(again.implicit_digest(), packet.implicit_digest());
    }
    let _ = Interest::decode(data);
});
