use std::any::TypeId;
use std::sync::Arc;
use tmx_value::{TmxError, TmxResult, TypeRegistry, Value, BUILTIN_NAMESPACE};

#[derive(Debug, PartialEq)]
struct StationConfig {
    id: u32,
}

#[test]
fn test_register_and_lookup_by_name_and_id() {
    let reg = TypeRegistry::new("org::example").unwrap();
    let instance = Arc::new(StationConfig { id: 7 });
    reg.register_type(instance.clone(), "StationConfig").unwrap();

    let by_name = reg.get("StationConfig").expect("lookup by name");
    assert_eq!(by_name.fq_name(), "org::example::StationConfig");
    let held = by_name.instance_of::<StationConfig>().unwrap();
    assert_eq!(held.id, 7);

    let by_id = reg
        .get_by_id(TypeId::of::<StationConfig>(), false)
        .expect("lookup by id");
    assert_eq!(by_id.name, "StationConfig");

    assert!(reg.get("NoSuch").is_none());
}

#[test]
fn test_alias_resolves_to_same_instance() {
    let reg = TypeRegistry::new("org::example").unwrap();
    let instance = Arc::new(StationConfig { id: 3 });
    reg.register_type(instance.clone(), "StationConfig").unwrap();
    reg.register_type(instance, "station").unwrap();

    let a = reg.get("StationConfig").unwrap();
    let b = reg.get("station").unwrap();
    assert!(Arc::ptr_eq(
        &a.instance_of::<StationConfig>().unwrap(),
        &b.instance_of::<StationConfig>().unwrap()
    ));
    // Identity lookup keeps resolving through the primary name.
    let by_id = reg.get_by_id(TypeId::of::<StationConfig>(), true).unwrap();
    assert_eq!(by_id.name, "StationConfig");
}

#[test]
fn test_unregister_removes_binding() {
    let reg = TypeRegistry::new("org::example").unwrap();
    reg.register_type(Arc::new(StationConfig { id: 1 }), "StationConfig")
        .unwrap();
    reg.unregister("StationConfig").unwrap();
    assert!(reg.get("StationConfig").is_none());
    assert!(reg
        .get_by_id(TypeId::of::<StationConfig>(), false)
        .is_none());
}

#[test]
fn test_namespace_separator_variants() {
    for ns in [
        "org::example::types",
        "org.example.types",
        "org/example/types",
        "org\\example\\types",
        "  org::example::types  ",
    ] {
        let reg = TypeRegistry::new(ns).unwrap();
        assert_eq!(reg.namespace(), "org::example::types");
    }
}

#[test]
fn test_empty_segment_rejected() {
    assert!(TypeRegistry::new("org..example").is_err());
    assert!(TypeRegistry::new("org::example::").is_err());
    let reg = TypeRegistry::new("org").unwrap();
    assert!(reg.child("a//b").is_err());
}

#[test]
fn test_builtin_namespace_is_read_only() {
    let reg = TypeRegistry::new(BUILTIN_NAMESPACE).unwrap();
    let err = reg
        .register_type(Arc::new(StationConfig { id: 1 }), "StationConfig")
        .unwrap_err();
    assert_eq!(err.code, tmx_value::codes::EINVAL);

    // The built-in scalar names resolve.
    assert!(reg.get("Boolean").is_some());
    assert!(reg.get("Properties").is_some());
    assert!(reg.get("Int32").is_some());
    assert!(reg.get("NoSuchType").is_none());
}

#[test]
fn test_get_all_spans_child_namespaces() {
    let root = TypeRegistry::new("").unwrap();
    let reg = root.child("org::example").unwrap();
    reg.register_type(Arc::new(StationConfig { id: 1 }), "Root")
        .unwrap();
    let sub = reg.child("nested").unwrap();
    sub.register_type(Arc::new(StationConfig { id: 2 }), "Leaf")
        .unwrap();
    // A sibling namespace sharing a textual prefix must not leak in.
    let sibling = root.child("org::examples").unwrap();
    sibling
        .register_type(Arc::new(StationConfig { id: 3 }), "Stray")
        .unwrap();

    let all = reg.get_all(None);
    let names: Vec<String> = all.iter().map(|d| d.fq_name()).collect();
    assert_eq!(
        names,
        vec!["org::example::Root", "org::example::nested::Leaf"]
    );

    // The root view sees everything.
    assert_eq!(root.get_all(None).len(), 3);

    let ids = reg.get_all(Some(TypeId::of::<StationConfig>()));
    assert_eq!(ids.len(), 2);
}

#[test]
fn test_dispatch_checks_signature() {
    let reg = TypeRegistry::new("org::example").unwrap();
    let desc = reg
        .register_handler(
            |arg: &(i64, String)| {
                let (n, s) = arg;
                Ok(Value::from(format!("{}:{}", s, n)))
            },
            "combine",
        )
        .unwrap();

    let out = TypeRegistry::dispatch(&desc, &(5i64, "x".to_string())).unwrap();
    assert_eq!(out.as_str(), Some("x:5"));

    // Wrong argument tuple fails with NotSupported.
    let err = TypeRegistry::dispatch(&desc, &42u32).unwrap_err();
    assert_eq!(err.code, tmx_value::codes::ENOTSUP);
}

#[test]
fn test_handler_error_propagates() {
    let reg = TypeRegistry::new("org::example").unwrap();
    let desc = reg
        .register_handler(
            |_arg: &i64| -> TmxResult<Value> {
                Err(TmxError::protocol("simulated failure"))
            },
            "failing",
        )
        .unwrap();
    let err = TypeRegistry::dispatch(&desc, &1i64).unwrap_err();
    assert_eq!(err.code, tmx_value::codes::EPROTO);
}
