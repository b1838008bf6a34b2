use openmsx_proto::{
    Message, OutputParser, ReplyStatus,
    framing::escape_xml,
    hexcode::{decode_block, encode_block},
};
use proptest::prelude::*;

const SESSION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<openmsx-output>\n\
<reply result=\"ok\">false</reply>\n\
<reply result=\"ok\">0</reply>\n\
<log level=\"info\">Opening socket &amp; listening</log>\n\
<update type=\"status\" name=\"cpu\">suspended</update>\n\
<reply result=\"ok\">{CPU regs} memory {physical VRAM}</reply>\n\
<reply result=\"nok\">can't read \"x\": no such variable</reply>\n\
<reply result=\"ok\"/>\n\
<update type=\"setting\" name=\"a&lt;b\">1 &gt; 0</update>\n\
<reply result=\"ok\">00FF10AB</reply>\n";

fn parse_chunks(chunks: &[&[u8]]) -> Vec<Message> {
    let mut parser = OutputParser::new();
    let mut out = Vec::new();
    for chunk in chunks {
        parser.feed(chunk, &mut out).unwrap();
    }
    out
}

#[test]
fn session_parses_in_order() {
    let messages = parse_chunks(&[SESSION.as_bytes()]);
    assert_eq!(messages.len(), 9);
    assert_eq!(
        messages[2],
        Message::Log {
            level: "info".into(),
            text: "Opening socket & listening".into()
        }
    );
    assert_eq!(
        messages[7],
        Message::Update {
            kind: "setting".into(),
            name: "a<b".into(),
            body: "1 > 0".into()
        }
    );
    let replies: Vec<_> = messages
        .iter()
        .filter_map(|m| match m {
            Message::Reply { status, body } => Some((*status, body.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(
        replies,
        vec![
            (ReplyStatus::Ok, "false"),
            (ReplyStatus::Ok, "0"),
            (ReplyStatus::Ok, "{CPU regs} memory {physical VRAM}"),
            (ReplyStatus::Nok, "can't read \"x\": no such variable"),
            (ReplyStatus::Ok, ""),
            (ReplyStatus::Ok, "00FF10AB"),
        ]
    );
}

#[test]
fn every_two_way_split_gives_the_same_messages() {
    let whole = parse_chunks(&[SESSION.as_bytes()]);
    let bytes = SESSION.as_bytes();
    for split in 0..=bytes.len() {
        let (a, b) = bytes.split_at(split);
        assert_eq!(parse_chunks(&[a, b]), whole, "split at {split}");
    }
}

proptest! {
    #[test]
    fn arbitrary_chunking_gives_the_same_messages(cuts in prop::collection::vec(0..SESSION.len(), 0..12)) {
        let bytes = SESSION.as_bytes();
        let mut cuts = cuts;
        cuts.sort_unstable();
        let mut chunks = Vec::new();
        let mut start = 0;
        for cut in cuts {
            chunks.push(&bytes[start..cut]);
            start = cut;
        }
        chunks.push(&bytes[start..]);
        prop_assert_eq!(parse_chunks(&chunks), parse_chunks(&[bytes]));
    }

    #[test]
    fn escaped_reply_bodies_survive(body in "[ -~]{0,40}") {
        let doc = format!("<openmsx-output><reply result=\"ok\">{}</reply>", escape_xml(&body));
        let messages = parse_chunks(&[doc.as_bytes()]);
        prop_assert_eq!(messages, vec![Message::Reply { status: ReplyStatus::Ok, body }]);
    }

    #[test]
    fn hex_blocks_round_trip(data in prop::collection::vec(any::<u8>(), 0..256)) {
        let text = encode_block(&data);
        prop_assert_eq!(text.len(), data.len() * 2);
        let mut out = vec![0u8; data.len()];
        decode_block(&text, &mut out).unwrap();
        prop_assert_eq!(&out, &data);
        decode_block(&text.to_lowercase(), &mut out).unwrap();
        prop_assert_eq!(out, data);
    }
}
