//! 解码器属性测试
//!
//! 使用 proptest 验证解码器在任意输入下的不变量。

use linkhub_protocol::*;
use proptest::prelude::*;

/// 不含控制码、结束符的数据字节
fn data_byte() -> impl Strategy<Value = u8> {
    any::<u8>().prop_filter("data byte", |b| {
        !is_control_code(*b) && *b != ALT_TERMINATOR
    })
}

fn message_body() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(data_byte(), 0..16)
}

fn count_messages(events: &[DecodedEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, DecodedEvent::Message(_)))
        .count()
}

proptest! {
    /// 帧内每条消息都继承帧头声明的类型与数组标志
    #[test]
    fn prop_messages_inherit_header(
        code in b'a'..=b'z',
        count in 0u32..10,
        bodies in prop::collection::vec(message_body(), 1..6),
    ) {
        let mut chunk = vec![code];
        chunk.extend_from_slice(count.to_string().as_bytes());
        chunk.push(HEADER_DELIMITER);
        for body in &bodies {
            chunk.extend_from_slice(body);
            chunk.push(ALT_TERMINATOR);
        }

        let mut decoder = FrameDecoder::new();
        let events = decoder.decode_all(&chunk).unwrap();
        prop_assert_eq!(events.len(), bodies.len());
        for (event, body) in events.iter().zip(&bodies) {
            match event {
                DecodedEvent::Message(msg) => {
                    let expected: String = body.iter().map(|&b| char::from(b)).collect();
                    prop_assert_eq!(&msg.payload, &expected);
                    prop_assert_eq!(msg.data_type.code(), code);
                    prop_assert_eq!(msg.is_array, count > 1);
                },
                other => prop_assert!(false, "unexpected event {:?}", other),
            }
        }
        prop_assert_eq!(decoder.pending(), "");
    }

    /// 心跳控制码无论出现在何处都只产生一个控制事件，且不进入 payload
    #[test]
    fn prop_heartbeat_code_anywhere(
        body in message_body(),
        at in 0usize..16,
    ) {
        let at = at.min(body.len());
        let mut payload = body.clone();
        payload.insert(at, HB_ON_FLAG);

        let mut chunk = b"S1 ".to_vec();
        chunk.extend_from_slice(&payload);
        chunk.push(ACK_FLAG);

        let mut decoder = FrameDecoder::new();
        let events = decoder.decode_all(&chunk).unwrap();
        let on = events.iter().filter(|e| **e == DecodedEvent::HeartbeatOn).count();
        prop_assert_eq!(on, 1);
        prop_assert_eq!(count_messages(&events), 1);

        let expected: String = body.iter().map(|&b| char::from(b)).collect();
        let msg = events.iter().find_map(|e| match e {
            DecodedEvent::Message(m) => Some(m),
            _ => None,
        }).unwrap();
        prop_assert_eq!(&msg.payload, &expected);
    }

    /// 任意字节输入都不会 panic；帧头错误时缓冲区保持不变
    #[test]
    fn prop_arbitrary_chunks_never_panic(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..8),
    ) {
        let mut decoder = FrameDecoder::new();
        for chunk in &chunks {
            let before = decoder.pending().to_string();
            match decoder.decode(chunk) {
                Ok(iter) => {
                    let _ = iter.count();
                },
                Err(_) => prop_assert_eq!(decoder.pending(), before.as_str()),
            }
        }
    }

    /// 消息跨越多个帧时内容完整拼接
    #[test]
    fn prop_message_split_across_chunks(
        body in prop::collection::vec(data_byte().prop_filter("no space", |b| *b != b' '), 1..32),
        split in 0usize..32,
    ) {
        let split = split.min(body.len());
        let (first, second) = body.split_at(split);

        let mut decoder = FrameDecoder::new();
        let mut chunk1 = b"i1 ".to_vec();
        chunk1.extend_from_slice(first);
        prop_assert_eq!(count_messages(&decoder.decode_all(&chunk1).unwrap()), 0);

        let mut chunk2 = b"i1 ".to_vec();
        chunk2.extend_from_slice(second);
        chunk2.push(b'#');
        let events = decoder.decode_all(&chunk2).unwrap();
        prop_assert_eq!(count_messages(&events), 1);
        if let DecodedEvent::Message(msg) = &events[0] {
            let expected: String = body.iter().map(|&b| char::from(b)).collect();
            prop_assert_eq!(&msg.payload, &expected);
        }
    }
}
