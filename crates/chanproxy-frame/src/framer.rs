use bytes::BytesMut;
use serde_json::Value;

use crate::codec::{FrameConfig, FrameScanner};
use crate::error::Result;

/// Push-style frame accumulator.
///
/// Feed it bytes as they arrive, in chunks of any size, and it returns every
/// message completed by that chunk. Incomplete trailing bytes are kept for
/// the next push, and the delimiter search resumes where it stopped.
#[derive(Debug, Default)]
pub struct StreamFramer {
    buf: BytesMut,
    config: FrameConfig,
    scanner: FrameScanner,
}

impl StreamFramer {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::new(),
            config,
            scanner: FrameScanner::default(),
        }
    }

    /// Append `chunk` and drain every frame it completes, in wire order.
    ///
    /// A bad frame yields an `Err` in its position and is dropped. Frames on
    /// either side of it are still returned.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Value>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        loop {
            match self.scanner.decode(&mut self.buf, &self.config) {
                Ok(Some(value)) => out.push(Ok(value)),
                Ok(None) => break,
                Err(err) => out.push(Err(err)),
            }
        }
        out
    }

    /// Bytes held for a frame that has not been terminated yet.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_frame;
    use crate::error::FrameError;
    use serde_json::json;

    fn wire(values: &[Value]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for value in values {
            encode_frame(value, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    fn values(results: Vec<Result<Value>>) -> Vec<Value> {
        results
            .into_iter()
            .collect::<Result<Vec<_>>>()
            .expect("frames should decode")
    }

    #[test]
    fn test_every_split_point_yields_same_sequence() {
        let expected = vec![
            json!({"id": "a", "n": 1}),
            json!({"id": "b", "body": {"nested": [1, 2, 3]}}),
            json!("plain string"),
        ];
        let bytes = wire(&expected);

        for split in 0..=bytes.len() {
            let mut framer = StreamFramer::default();
            let mut got = values(framer.push(&bytes[..split]));
            got.extend(values(framer.push(&bytes[split..])));
            assert_eq!(got, expected, "split at {split}");
            assert_eq!(framer.buffered_len(), 0);
        }
    }

    #[test]
    fn test_byte_by_byte_thousand_frames() {
        let expected: Vec<Value> = (0..1000).map(|i| json!({"seq": i})).collect();
        let bytes = wire(&expected);

        let mut framer = StreamFramer::default();
        let mut got = Vec::new();
        for byte in &bytes {
            got.extend(values(framer.push(std::slice::from_ref(byte))));
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn test_partial_frame_yields_nothing() {
        let bytes = wire(&[json!({"k": "v"})]);
        let mut framer = StreamFramer::default();

        assert!(framer.push(&bytes[..bytes.len() - 1]).is_empty());
        assert_eq!(framer.buffered_len(), bytes.len() - 1);

        let got = values(framer.push(&bytes[bytes.len() - 1..]));
        assert_eq!(got, vec![json!({"k": "v"})]);
    }

    #[test]
    fn test_empty_segments_between_frames() {
        let mut bytes = b";".to_vec();
        bytes.extend(wire(&[json!(1)]));
        bytes.extend(b";;;");
        bytes.extend(wire(&[json!(2)]));

        let mut framer = StreamFramer::default();
        assert_eq!(values(framer.push(&bytes)), vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_bounded_framer_rejects_oversized_stream() {
        let mut framer = StreamFramer::new(FrameConfig::bounded(32));
        let results = framer.push(&[b'A'; 64]);
        assert!(matches!(
            results.as_slice(),
            [Err(FrameError::FrameTooLarge { .. })]
        ));
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn test_recovers_after_bad_frame() {
        let mut framer = StreamFramer::default();
        assert!(matches!(
            framer.push(b"@@@;").as_slice(),
            [Err(FrameError::Base64(_))]
        ));
        assert_eq!(values(framer.push(&wire(&[json!(true)]))), vec![json!(true)]);
    }

    #[test]
    fn test_bad_frame_keeps_neighbours_in_same_chunk() {
        let mut bytes = wire(&[json!("before")]);
        bytes.extend(b"@@@;");
        bytes.extend(wire(&[json!("after")]));

        let results = StreamFramer::default().push(&bytes);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().ok(), Some(&json!("before")));
        assert!(matches!(results[1], Err(FrameError::Base64(_))));
        assert_eq!(results[2].as_ref().ok(), Some(&json!("after")));
    }
}
