use tmx_value::value::ByteOrder;
use tmx_value::{named_enum, NamedEnum, Value};

named_enum! {
    pub enum FixMode: u8 {
        NotSeen = 0,
        NoFix = 1,
        TwoD = 2,
        ThreeD = 3,
    }
}

#[test]
fn test_null_conversions() {
    let v = Value::Null;
    assert!(!v.to_bool());
    assert_eq!(v.to_int(), 0);
    assert_eq!(v.to_float(), 0.0);
    assert_eq!(v.to_text(), "null");
    assert!(v.is_null());
    assert_eq!(v.len(), 0);
}

#[test]
fn test_missing_key_yields_null_without_mutation() {
    let mut v = Value::map();
    v.insert("present", 1i32);
    let before = v.clone();
    assert!(v.get("absent").is_null());
    assert!(v.at(17).is_null());
    assert_eq!(v, before);
    assert_eq!(v.len(), 1);
}

#[test]
fn test_read_accessor_on_scalar_yields_null() {
    let v = Value::from(42i32);
    assert!(v.get("key").is_null());
    assert!(v.at(0).is_null());
    assert_eq!(v.to_int(), 42);
}

#[test]
fn test_mutable_index_grows_array() {
    let mut v = Value::array();
    *v.at_mut(3) = Value::from(9i32);
    assert_eq!(v.len(), 4);
    assert_eq!(v.at(3).to_int(), 9);
    assert!(v.at(0).is_null());
    assert!(v.at(1).is_null());
}

#[test]
fn test_mutable_access_rewrites_shape() {
    // An integer indexed by string becomes a map, discarding the old value.
    let mut v = Value::from(5i32);
    *v.get_mut("key") = Value::from("x");
    assert!(v.is_map());
    assert_eq!(v.get("key").as_str(), Some("x"));

    // A map indexed by integer becomes an array.
    *v.at_mut(0) = Value::from(true);
    assert!(v.is_array());
    assert!(v.at(0).to_bool());
}

#[test]
fn test_container_to_int_is_element_count() {
    let mut a = Value::array();
    a.push(1i32);
    a.push(2i32);
    a.push(3i32);
    assert_eq!(a.to_int(), 3);

    let mut m = Value::map();
    m.insert("a", 1i32);
    m.insert("b", 2i32);
    assert_eq!(m.to_int(), 2);
}

#[test]
fn test_integer_bit_width_bounds_storage() {
    // A 10-bit unsigned integer truncates to its declared width.
    let v = Value::uint_with_bits(10, 0x7FF);
    assert_eq!(v.to_uint(), 0x3FF);

    // A 6-bit signed integer sign-extends from bit 5.
    let v = Value::int_with_bits(6, 0b100000);
    assert_eq!(v.to_int(), -32);
}

#[test]
fn test_numeric_equality_ignores_width() {
    assert_eq!(Value::uint_with_bits(10, 5), Value::from(5i64));
    assert_eq!(Value::from(5u8), Value::from(5i32));
    assert_ne!(Value::from(5i32), Value::from(6i32));
    assert_ne!(Value::from(5i32), Value::from("5"));
}

#[test]
fn test_enum_default_name_from_integer() {
    let v = Value::from_enum(FixMode::ThreeD);
    assert_eq!(v.enum_name().as_deref(), Some("ThreeD"));
    assert_eq!(v.to_int(), 3);

    // Name lookup is case-insensitive.
    assert_eq!(FixMode::from_name("threed"), Some(FixMode::ThreeD));
    assert_eq!(FixMode::from_name("nosuch"), None);
    assert_eq!(FixMode::name_of(2), Some("TwoD"));
    assert_eq!(FixMode::name_of(99), None);
}

#[test]
fn test_enum_without_name_stringifies_number() {
    let v = Value::Enum {
        value: 1005,
        name: None,
    };
    assert_eq!(v.enum_name().as_deref(), Some("1005"));
    assert_eq!(v.to_text(), "1005");
    // Enums compare to plain integers by underlying value.
    assert_eq!(v, Value::from(1005i64));
}

#[test]
fn test_string_conversions() {
    assert!(Value::from("true").to_bool());
    assert!(!Value::from("false").to_bool());
    assert!(Value::from("2").to_bool());
    assert!(!Value::from("0").to_bool());
    assert_eq!(Value::from("-17").to_int(), -17);
    assert_eq!(Value::from("3.5").to_float(), 3.5);
    assert_eq!(Value::from("bogus").to_int(), 0);
}

#[test]
fn test_bytes_render_as_hex() {
    let v = Value::bytes(vec![0xD3, 0x00, 0x13]);
    assert_eq!(v.to_text(), "d30013");
    assert_eq!(v.len(), 3);
    assert!(ByteOrder::Network.is_big());
    assert!(!ByteOrder::Little.is_big());
}

#[test]
fn test_from_str_guess() {
    assert_eq!(Value::from_str_guess("true"), Value::Bool(true));
    assert_eq!(Value::from_str_guess("42"), Value::from(42i64));
    assert_eq!(Value::from_str_guess("2.5"), Value::from(2.5f64));
    assert_eq!(Value::from_str_guess(""), Value::Null);
    assert_eq!(
        Value::from_str_guess("hello"),
        Value::String("hello".into())
    );
}

#[test]
fn test_map_retains_insertion_order() {
    let mut v = Value::map();
    v.insert("zulu", 1i32);
    v.insert("alpha", 2i32);
    v.insert("mike", 3i32);
    let keys: Vec<&str> = v.keys().collect();
    assert_eq!(keys, vec!["zulu", "alpha", "mike"]);
}

#[test]
fn test_display_containers() {
    let mut v = Value::map();
    v.insert("name", "rsu-1");
    v.insert("port", 2947i32);
    assert_eq!(v.to_text(), r#"{"name":"rsu-1","port":2947}"#);

    let mut a = Value::array();
    a.push("x");
    a.push(1i32);
    assert_eq!(a.to_text(), r#"["x",1]"#);
}
