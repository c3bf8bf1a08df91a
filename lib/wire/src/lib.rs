//! The wire format crate: the typed-value model and textual container serialization (C1), and
//! the length-delimited frame codec (C2).
pub mod container;
pub mod frame;
pub mod value;

pub use container::{Container, Header};
pub use frame::{DataMode, Frame, FrameReader};
pub use value::{NamedValue, Value};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_flat_container() {
        let mut c = Container::new_container("c1", "", "s", "", "binary_line", Vec::new());
        c.add(NamedValue::new("greeting", Value::String("hi".into())));
        c.add(NamedValue::new("count", Value::Long(-7)));
        c.add(NamedValue::new("flag", Value::Bool(true)));

        let bytes = c.serialize();
        let back = Container::deserialize(&bytes).expect("deserialize");
        assert_eq!(c, back);
    }

    #[test]
    fn round_trips_nested_container_with_escapes() {
        let nested = Value::container(vec![
            NamedValue::new("x", Value::String("a;b]c[d//e".into())),
            NamedValue::new("n", Value::Long(-7)),
            NamedValue::new("flag", Value::Bool(true)),
        ]);
        let mut c = Container::new_container("c1", "s1", "s", "", "echo", Vec::new());
        c.add(NamedValue::new("payload", nested));

        let bytes = c.serialize();
        let back = Container::deserialize(&bytes).expect("deserialize");
        assert_eq!(c, back);
    }

    #[test]
    fn swap_header_is_its_own_inverse() {
        let mut c = Container::new_container("a", "a1", "b", "b1", "echo", Vec::new());
        let original = c.clone();
        c.swap_header();
        c.swap_header();
        assert_eq!(c, original);
    }

    #[test]
    fn shallow_copy_shares_bytes_allocation() {
        let mut c = Container::new_container("a", "", "b", "", "binary_line", Vec::new());
        c.add(NamedValue::new("blob", Value::bytes(vec![1, 2, 3])));

        let shallow = c.copy(false);
        if let (Value::Bytes(a), Value::Bytes(b)) =
            (&c.value_array("blob")[0], &shallow.value_array("blob")[0])
        {
            assert!(std::sync::Arc::ptr_eq(a, b));
        } else {
            panic!("expected bytes values");
        }
    }

    #[test]
    fn deep_copy_allocates_fresh_bytes() {
        let mut c = Container::new_container("a", "", "b", "", "binary_line", Vec::new());
        c.add(NamedValue::new("blob", Value::bytes(vec![1, 2, 3])));

        let deep = c.copy(true);
        if let (Value::Bytes(a), Value::Bytes(b)) =
            (&c.value_array("blob")[0], &deep.value_array("blob")[0])
        {
            assert!(!std::sync::Arc::ptr_eq(a, b));
            assert_eq!(a, b);
        } else {
            panic!("expected bytes values");
        }
    }

    #[test]
    fn frame_round_trips_across_arbitrary_chunk_boundaries() {
        let frames = vec![
            Frame::new(DataMode::Binary, vec![1, 2, 3]),
            Frame::new(DataMode::Packet, Vec::new()),
            Frame::new(DataMode::File, vec![0xAB; 64]),
        ];
        let mut wire = Vec::new();
        for f in &frames {
            wire.extend_from_slice(&f.encode());
        }

        let mut reader = FrameReader::new();
        let mut decoded = Vec::new();
        for chunk in wire.chunks(3) {
            decoded.extend(reader.push(chunk).expect("push"));
        }
        assert_eq!(decoded, frames);
    }

    #[test]
    fn frame_reader_resyncs_past_garbage_before_start_code() {
        let frame = Frame::new(DataMode::Binary, vec![9, 9]);
        let mut wire = vec![0u8, 1, 2, 3];
        wire.extend_from_slice(&frame.encode());

        let mut reader = FrameReader::new();
        let decoded = reader.push(&wire).expect("push");
        assert_eq!(decoded, vec![frame]);
    }

    #[test]
    fn frame_reader_fails_session_on_bad_end_code() {
        let mut bytes = frame::START_CODE.to_vec();
        bytes.push(DataMode::Binary.as_byte());
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(b"xxxx");

        let mut reader = FrameReader::new();
        assert!(reader.push(&bytes).is_err());
        assert!(reader.push(&[]).is_err());
    }

    #[test]
    fn binary_payload_fields_round_trip() {
        let p = frame::fields::BinaryPayload {
            source_id: "c1".into(),
            source_sub_id: "".into(),
            target_id: "s".into(),
            target_sub_id: "".into(),
            data: vec![0x48, 0x69],
        };
        let encoded = p.encode();
        let back = frame::fields::BinaryPayload::decode(&encoded).expect("decode");
        assert_eq!(back.source_id, "c1");
        assert_eq!(back.data, vec![0x48, 0x69]);
    }
}
