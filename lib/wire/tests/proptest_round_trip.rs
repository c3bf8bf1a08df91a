use proptest::prelude::*;
use wire::{Container, DataMode, Frame, FrameReader, NamedValue, Value};

fn arb_leaf_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i8>().prop_map(Value::Short),
        any::<u8>().prop_map(Value::UShort),
        any::<i16>().prop_map(Value::Int),
        any::<u16>().prop_map(Value::UInt),
        any::<i32>().prop_map(Value::Long),
        any::<u32>().prop_map(Value::ULong),
        any::<i64>().prop_map(Value::LLong),
        any::<u64>().prop_map(Value::ULLong),
        any::<f32>().prop_filter("finite", |v| v.is_finite()).prop_map(Value::Float),
        any::<f64>().prop_filter("finite", |v| v.is_finite()).prop_map(Value::Double),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::bytes),
        "[a-zA-Z0-9 ;\\]\\[/]{0,16}".prop_map(Value::String),
    ]
}

fn arb_named_leaf() -> impl Strategy<Value = NamedValue> {
    ("[a-z_]{1,8}", arb_leaf_value()).prop_map(|(name, value)| NamedValue::new(name, value))
}

fn arb_values() -> impl Strategy<Value = Vec<NamedValue>> {
    prop::collection::vec(arb_named_leaf(), 0..5)
}

proptest! {
    #[test]
    fn container_round_trips(values in arb_values()) {
        let c = Container::new_container("src", "ss", "tgt", "ts", "echo", values);
        let encoded = c.serialize();
        let decoded = Container::deserialize(&encoded).expect("deserialize");
        prop_assert_eq!(decoded, c);
    }

    #[test]
    fn frame_round_trips_through_arbitrary_chunking(payload in prop::collection::vec(any::<u8>(), 0..256), chunk_size in 1usize..17) {
        let frame = Frame::new(DataMode::Binary, payload);
        let wire = frame.encode();

        let mut reader = FrameReader::new();
        let mut decoded = Vec::new();
        for chunk in wire.chunks(chunk_size) {
            decoded.extend(reader.push(chunk).expect("push"));
        }
        prop_assert_eq!(decoded, vec![frame]);
    }
}
